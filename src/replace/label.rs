use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Edit, MatchContext, ReplacementRequest};
use crate::docx::entities::decode;
use crate::docx::splice::splices_for_plain_range;
use crate::markers::PLACEHOLDER_PATTERN;

/// Identification fields whose labels are fixed across tender templates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CompanyField {
    RegistrationNumber,
    TaxId,
    RegisteredAddress,
    ContactPerson,
    Phone,
    Email,
    BankAccount,
    RegistryRecord,
}

impl CompanyField {
    pub const ALL: [CompanyField; 8] = [
        CompanyField::RegistrationNumber,
        CompanyField::TaxId,
        CompanyField::RegisteredAddress,
        CompanyField::ContactPerson,
        CompanyField::Phone,
        CompanyField::Email,
        CompanyField::BankAccount,
        CompanyField::RegistryRecord,
    ];

    /// Label spellings, longest first so that e.g. `IČO` wins over `IČ`.
    pub fn labels(self) -> &'static [&'static str] {
        match self {
            CompanyField::RegistrationNumber => &["Identifikační číslo", "IČO", "IČ"],
            CompanyField::TaxId => &["Daňové identifikační číslo", "DIČ"],
            CompanyField::RegisteredAddress => {
                &["Místo podnikání", "Adresa sídla", "Se sídlem", "Sídlo"]
            }
            CompanyField::ContactPerson => &["Osoba oprávněná jednat", "Kontaktní osoba"],
            CompanyField::Phone => &["Telefon", "Tel."],
            CompanyField::Email => &["e-mailová adresa", "E-mail", "Email"],
            CompanyField::BankAccount => {
                &["Číslo bankovního účtu", "Bankovní spojení", "Číslo účtu"]
            }
            CompanyField::RegistryRecord => {
                &["Zapsán v obchodním rejstříku", "Spisová značka", "Zápis v OR"]
            }
        }
    }
}

/// Supplied value per field; fields without a value are never label-matched.
#[derive(Clone, Debug, Default)]
pub struct LabelValues(BTreeMap<CompanyField, String>);

impl LabelValues {
    pub fn set(&mut self, field: CompanyField, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            self.0.remove(&field);
        } else {
            self.0.insert(field, value.to_string());
        }
    }

    pub fn get(&self, field: CompanyField) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }
}

struct LabelPatterns {
    /// Whole `original` is "label + placeholder".
    request: Regex,
    /// Label followed by a placeholder somewhere in paragraph text; group `ph` is the placeholder.
    paragraph: Regex,
}

static PATTERNS: Lazy<Vec<(CompanyField, LabelPatterns)>> = Lazy::new(|| {
    CompanyField::ALL
        .iter()
        .map(|&field| {
            let labels = field
                .labels()
                .iter()
                .map(|l| regex::escape(l))
                .collect::<Vec<_>>()
                .join("|");
            let request = Regex::new(&format!(
                r"(?i)^\s*(?:{labels})\s*[:.\-]?\s*(?:{PLACEHOLDER_PATTERN})\s*[.,;]?\s*$"
            ))
            .expect("label request regex");
            let paragraph = Regex::new(&format!(
                r"(?i)(?:^|[^\p{{L}}\p{{N}}])(?:{labels})\s*[:.\-]?\s*(?P<ph>{PLACEHOLDER_PATTERN})"
            ))
            .expect("label paragraph regex");
            (field, LabelPatterns { request, paragraph })
        })
        .collect()
});

/// Field whose label plus placeholder make up the whole of `original`.
pub fn field_for_original(original: &str) -> Option<CompanyField> {
    PATTERNS
        .iter()
        .find(|(_, pats)| pats.request.is_match(original))
        .map(|(field, _)| *field)
}

/// Ignores the model's wording and writes the supplied value right after the field label.
pub(super) fn label(ctx: &MatchContext<'_>, req: &ReplacementRequest) -> Option<Edit> {
    let original = decode(&req.original);
    let field = field_for_original(&original)?;
    let value = ctx.labels.get(field)?;
    let (_, pats) = PATTERNS.iter().find(|(f, _)| *f == field)?;

    ctx.paragraphs.iter().find_map(|p| {
        let ph = pats.paragraph.captures(&p.plain_text)?.name("ph")?;
        let splices = splices_for_plain_range(ctx.markup, p, ph.range(), value)?;
        log::debug!("label {field:?} filled in paragraph {}", p.index);
        Some(Edit::new(splices, value))
    })
}

#[cfg(test)]
mod tests {
    use super::{field_for_original, CompanyField, LabelValues};
    use crate::docx::paragraphs::build_paragraph_map;
    use crate::replace::{MatchConfig, ReplacementRequest, Replacer, Snapshot, Strategy};

    #[test]
    fn decomposes_label_and_placeholder() {
        assert_eq!(field_for_original("IČO: [doplní účastník]"), Some(CompanyField::RegistrationNumber));
        assert_eq!(field_for_original("DIČ: ______"), Some(CompanyField::TaxId));
        assert_eq!(field_for_original("e-mail: <doplnit>"), Some(CompanyField::Email));
        assert_eq!(field_for_original("IČO: 07023987"), None);
        assert_eq!(field_for_original("Název: [doplní účastník]"), None);
    }

    #[test]
    fn fills_the_placeholder_after_the_label_whatever_the_model_guessed() {
        let markup = concat!(
            r#"<w:p><w:r><w:t xml:space="preserve">DIČ: ……… </w:t></w:r></w:p>"#,
            r#"<w:p><w:r><w:t xml:space="preserve">IČO: (doplní účastník)</w:t></w:r></w:p>"#
        )
        .to_string();
        let mut labels = LabelValues::default();
        labels.set(CompanyField::RegistrationNumber, "07023987");
        labels.set(CompanyField::TaxId, "CZ07023987");
        let cfg = MatchConfig::default();

        let (snap, outcome) = Replacer::new(&cfg, &labels).apply(
            Snapshot::new(markup).expect("snap"),
            &ReplacementRequest::new("IČO: [doplní účastník]", "IČO: 07023987"),
        );
        assert_eq!(outcome.strategy, Some(Strategy::Label));
        assert_eq!(outcome.applied_text, vec!["07023987".to_string()]);
        let texts: Vec<String> = build_paragraph_map(snap.markup())
            .expect("map")
            .into_iter()
            .map(|p| p.plain_text)
            .collect();
        assert_eq!(texts, vec!["DIČ: ……… ".to_string(), "IČO: 07023987".to_string()]);
    }
}
