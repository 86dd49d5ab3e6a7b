use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::docx::package::DocxPackage;
use crate::docx::paragraphs::{build_paragraph_map, plain_text};
use crate::markers::has_unfilled;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCategory {
    CoverSheet,
    SwornStatement,
    SubcontractorList,
    PurchaseContract,
    TechnicalSpecification,
}

impl TemplateCategory {
    pub const ALL: [TemplateCategory; 5] = [
        TemplateCategory::CoverSheet,
        TemplateCategory::SwornStatement,
        TemplateCategory::SubcontractorList,
        TemplateCategory::PurchaseContract,
        TemplateCategory::TechnicalSpecification,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TemplateCategory::CoverSheet => "cover_sheet",
            TemplateCategory::SwornStatement => "sworn_statement",
            TemplateCategory::SubcontractorList => "subcontractor_list",
            TemplateCategory::PurchaseContract => "purchase_contract",
            TemplateCategory::TechnicalSpecification => "technical_specification",
        }
    }

    fn file_name_pattern(self) -> &'static str {
        match self {
            TemplateCategory::CoverSheet => r"kryc[ií]\s*list|cover\s*sheet",
            TemplateCategory::SwornStatement => {
                r"[cč]estn[eéaá]\s*prohl[aá][sš]en|prohl[aá][sš]en[ií]|sworn|affidavit"
            }
            TemplateCategory::SubcontractorList => r"poddodavatel|subdodavatel|subcontractor",
            TemplateCategory::PurchaseContract => {
                r"kupn[ií]\s*smlouv|n[aá]vrh\s*smlouv|smlouv[ay]|purchase\s*contract|contract"
            }
            TemplateCategory::TechnicalSpecification => {
                r"technick[aáé]\s*specifikac|specifikac|technical\s*spec"
            }
        }
    }

    fn content_keywords(self) -> &'static [&'static str] {
        match self {
            TemplateCategory::CoverSheet => &["krycí list", "identifikační údaje účastníka"],
            TemplateCategory::SwornStatement => {
                &["čestné prohlášení", "čestně prohlašuje", "čestně prohlašujeme"]
            }
            TemplateCategory::SubcontractorList => &["seznam poddodavatelů", "poddodavatel"],
            TemplateCategory::PurchaseContract => &["kupní smlouva", "kupující", "prodávající"],
            TemplateCategory::TechnicalSpecification => {
                &["technická specifikace", "technické parametry", "minimální požadavky"]
            }
        }
    }
}

static FILE_NAME_RES: Lazy<Vec<(TemplateCategory, Regex)>> = Lazy::new(|| {
    TemplateCategory::ALL
        .iter()
        .map(|&c| {
            let re = Regex::new(&format!("(?i){}", c.file_name_pattern())).expect("file name regex");
            (c, re)
        })
        .collect()
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifiedBy {
    FileName,
    Content,
}

#[derive(Clone, Debug, Serialize)]
pub struct ClassifiedTemplate {
    pub path: PathBuf,
    pub category: TemplateCategory,
    pub by: ClassifiedBy,
    pub sha256: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Classification {
    pub templates: Vec<ClassifiedTemplate>,
    pub skipped: Vec<SkippedFile>,
}

impl Classification {
    pub fn by_category(&self) -> BTreeMap<TemplateCategory, Vec<&Path>> {
        let mut out: BTreeMap<TemplateCategory, Vec<&Path>> = BTreeMap::new();
        for t in &self.templates {
            out.entry(t.category).or_default().push(&t.path);
        }
        out
    }

    fn skip(&mut self, path: &Path, reason: impl Into<String>) {
        let reason = reason.into();
        log::debug!("classify skip {}: {reason}", path.display());
        self.skipped.push(SkippedFile {
            path: path.to_path_buf(),
            reason,
        });
    }
}

/// Separators in file names are read as spaces before matching.
pub fn classify_file_name(name: &str) -> Option<TemplateCategory> {
    let name = name.replace(['_', '-', '.'], " ");
    FILE_NAME_RES
        .iter()
        .find(|(_, re)| re.is_match(&name))
        .map(|(c, _)| *c)
}

/// Keyword classification, only for text that still has something to fill in.
pub fn classify_content(text: &str) -> Option<TemplateCategory> {
    if !has_unfilled(text) {
        return None;
    }
    let lower = text.to_lowercase();
    TemplateCategory::ALL
        .iter()
        .copied()
        .find(|c| c.content_keywords().iter().any(|k| lower.contains(k)))
}

/// Classifies the `.docx` and `.txt` files directly inside `dir`, in file name order,
/// keeping at most `max_per_category` files per category.
pub fn classify_dir(dir: &Path, max_per_category: usize) -> anyhow::Result<Classification> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("read dir: {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut out = Classification::default();
    let mut seen: HashMap<String, PathBuf> = HashMap::new();
    let mut per_category: HashMap<TemplateCategory, usize> = HashMap::new();

    for path in files {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with("~$") {
            continue;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        let is_docx = match ext.as_deref() {
            Some("docx") => true,
            Some("txt") => false,
            _ => continue,
        };

        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) => {
                out.skip(&path, format!("unreadable: {e}"));
                continue;
            }
        };
        let sha256 = hex::encode(Sha256::digest(&bytes));
        if let Some(first) = seen.get(&sha256) {
            out.skip(&path, format!("duplicate of {}", first.display()));
            continue;
        }
        seen.insert(sha256.clone(), path.clone());

        let (category, by) = match classify_file_name(name) {
            Some(c) => (c, ClassifiedBy::FileName),
            None => {
                let text = if is_docx {
                    docx_text(&bytes)
                } else {
                    Ok(decode_text(&bytes))
                };
                let text = match text {
                    Ok(t) => t,
                    Err(e) => {
                        out.skip(&path, format!("unreadable: {e:#}"));
                        continue;
                    }
                };
                match classify_content(&text) {
                    Some(c) => (c, ClassifiedBy::Content),
                    None => {
                        out.skip(&path, "no category or no unfilled placeholders");
                        continue;
                    }
                }
            }
        };

        let count = per_category.entry(category).or_insert(0);
        if *count >= max_per_category {
            out.skip(&path, format!("{} limit reached", category.as_str()));
            continue;
        }
        *count += 1;
        out.templates.push(ClassifiedTemplate {
            path,
            category,
            by,
            sha256,
        });
    }

    log::info!(
        "classified {} template(s), skipped {}",
        out.templates.len(),
        out.skipped.len()
    );
    Ok(out)
}

fn docx_text(bytes: &[u8]) -> anyhow::Result<String> {
    let pkg = DocxPackage::from_reader(Cursor::new(bytes))?;
    let markup = pkg.main_document()?;
    Ok(plain_text(&build_paragraph_map(&markup)?))
}

/// UTF-8 or UTF-16 by BOM, then strict UTF-8, falling back to windows-1250.
pub fn decode_text(bytes: &[u8]) -> String {
    if let Some((enc, bom_len)) = encoding_rs::Encoding::for_bom(bytes) {
        let (text, _) = enc.decode_without_bom_handling(&bytes[bom_len..]);
        return text.into_owned();
    }
    if let Some(text) = encoding_rs::UTF_8.decode_without_bom_handling_and_without_replacement(bytes) {
        return text.into_owned();
    }
    let (text, _, _) = encoding_rs::WINDOWS_1250.decode(bytes);
    text.into_owned()
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::Path;

    use super::{classify_content, classify_dir, classify_file_name, decode_text, ClassifiedBy, TemplateCategory};

    fn write_docx(path: &Path, paragraphs: &[&str]) {
        let body: String = paragraphs
            .iter()
            .map(|t| format!("<w:p><w:r><w:t>{t}</w:t></w:r></w:p>"))
            .collect();
        let xml = format!("<w:document><w:body>{body}</w:body></w:document>");
        let file = std::fs::File::create(path).expect("create");
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .expect("start");
        zip.write_all(xml.as_bytes()).expect("write");
        zip.finish().expect("finish");
    }

    #[test]
    fn file_names_win_over_content() {
        assert_eq!(classify_file_name("Příloha_1_Krycí_list.docx"), Some(TemplateCategory::CoverSheet));
        assert_eq!(classify_file_name("cestne-prohlaseni.docx"), Some(TemplateCategory::SwornStatement));
        assert_eq!(classify_file_name("Seznam poddodavatelů.docx"), Some(TemplateCategory::SubcontractorList));
        assert_eq!(classify_file_name("Návrh kupní smlouvy.docx"), Some(TemplateCategory::PurchaseContract));
        assert_eq!(
            classify_file_name("priloha_3_technicka_specifikace.docx"),
            Some(TemplateCategory::TechnicalSpecification)
        );
        assert_eq!(classify_file_name("Výzva k podání nabídek.docx"), None);
    }

    #[test]
    fn content_needs_a_placeholder() {
        assert_eq!(classify_content("Čestné prohlášení o bezdlužnosti."), None);
        assert_eq!(
            classify_content("Čestné prohlášení\nJméno: [doplní účastník]"),
            Some(TemplateCategory::SwornStatement)
        );
    }

    #[test]
    fn decodes_bom_utf8_and_windows_1250() {
        assert_eq!(decode_text("\u{feff}Krycí list".as_bytes()), "Krycí list");
        assert_eq!(decode_text("účastník".as_bytes()), "účastník");
        // "čestné" in windows-1250
        assert_eq!(decode_text(&[0xE8, 0x65, 0x73, 0x74, 0x6E, 0xE9]), "čestné");
    }

    #[test]
    fn classifies_a_directory_deterministically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let d = dir.path();
        write_docx(&d.join("01_kryci_list.docx"), &["Krycí list nabídky", "IČO: ______"]);
        std::fs::copy(d.join("01_kryci_list.docx"), d.join("02_copy.docx")).expect("copy");
        write_docx(&d.join("03_priloha.docx"), &["Technická specifikace", "Výkon: [doplní účastník]"]);
        write_docx(&d.join("04_vyzva.docx"), &["Technická specifikace je v příloze."]);
        std::fs::write(d.join("05_prohlaseni.txt"), "Čestné prohlášení ……").expect("txt");
        std::fs::write(d.join("~$01_kryci_list.docx"), b"lock").expect("lock");
        std::fs::write(d.join("notes.pdf"), b"%PDF").expect("pdf");
        for i in 0..5 {
            std::fs::write(d.join(format!("1{i}_smlouva.txt")), format!("Kupní smlouva č. {i}")).expect("txt");
        }

        let out = classify_dir(d, 4).expect("classify");
        let names: Vec<String> = out
            .templates
            .iter()
            .map(|t| t.path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "01_kryci_list.docx",
                "03_priloha.docx",
                "05_prohlaseni.txt",
                "10_smlouva.txt",
                "11_smlouva.txt",
                "12_smlouva.txt",
                "13_smlouva.txt",
            ]
        );
        assert_eq!(out.templates[1].by, ClassifiedBy::Content);
        assert_eq!(out.templates[1].category, TemplateCategory::TechnicalSpecification);
        assert_eq!(out.by_category()[&TemplateCategory::PurchaseContract].len(), 4);

        let skipped: Vec<&str> = out.skipped.iter().map(|s| s.reason.as_str()).collect();
        assert!(skipped.iter().any(|r| r.starts_with("duplicate of")));
        assert!(skipped.iter().any(|r| r.starts_with("no category")));
        assert!(skipped.iter().any(|r| r.contains("limit reached")));
    }
}
