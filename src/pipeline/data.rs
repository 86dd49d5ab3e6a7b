use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::replace::{CompanyField, LabelValues};

/// Everything the filler may write into a template.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FillData {
    pub company: CompanyProfile,
    pub tender: TenderInfo,
    /// Free-form keys, available to `{{tags}}` and to the proposer.
    pub extra: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanyProfile {
    pub name: String,
    pub registration_number: String,
    pub tax_id: String,
    pub registered_address: String,
    pub contact_person: String,
    pub phone: String,
    pub email: String,
    pub bank_account: String,
    pub registry_record: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TenderInfo {
    pub title: String,
    pub contracting_authority: String,
    pub reference: String,
    pub deadline: String,
    pub summary: String,
}

impl CompanyProfile {
    fn fields(&self) -> [(&'static str, &str); 9] {
        [
            ("name", self.name.as_str()),
            ("registration_number", self.registration_number.as_str()),
            ("tax_id", self.tax_id.as_str()),
            ("registered_address", self.registered_address.as_str()),
            ("contact_person", self.contact_person.as_str()),
            ("phone", self.phone.as_str()),
            ("email", self.email.as_str()),
            ("bank_account", self.bank_account.as_str()),
            ("registry_record", self.registry_record.as_str()),
        ]
    }

    pub fn label_values(&self) -> LabelValues {
        let mut out = LabelValues::default();
        out.set(CompanyField::RegistrationNumber, &self.registration_number);
        out.set(CompanyField::TaxId, &self.tax_id);
        out.set(CompanyField::RegisteredAddress, &self.registered_address);
        out.set(CompanyField::ContactPerson, &self.contact_person);
        out.set(CompanyField::Phone, &self.phone);
        out.set(CompanyField::Email, &self.email);
        out.set(CompanyField::BankAccount, &self.bank_account);
        out.set(CompanyField::RegistryRecord, &self.registry_record);
        out
    }
}

impl TenderInfo {
    fn fields(&self) -> [(&'static str, &str); 5] {
        [
            ("title", self.title.as_str()),
            ("contracting_authority", self.contracting_authority.as_str()),
            ("reference", self.reference.as_str()),
            ("deadline", self.deadline.as_str()),
            ("summary", self.summary.as_str()),
        ]
    }
}

impl FillData {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read fill data: {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parse fill data: {}", path.display()))
    }

    /// Lowercase `{{tag}}` keys: `company.*`, `tender.*`, bare field names and `extra` keys.
    /// Empty values are left out so their tags stay visible.
    pub fn template_values(&self) -> HashMap<String, String> {
        let mut out = HashMap::new();
        let mut put = |key: String, value: &str| {
            if !value.trim().is_empty() {
                out.entry(key.to_lowercase()).or_insert_with(|| value.to_string());
            }
        };
        for (k, v) in self.company.fields() {
            put(format!("company.{k}"), v);
        }
        for (k, v) in self.tender.fields() {
            put(format!("tender.{k}"), v);
        }
        for (k, v) in self.company.fields() {
            put(k.to_string(), v);
        }
        for (k, v) in self.tender.fields() {
            put(k.to_string(), v);
        }
        for (k, v) in &self.extra {
            put(k.clone(), v);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::FillData;
    use crate::replace::CompanyField;

    #[test]
    fn parses_partial_json_and_builds_tag_values() {
        let data: FillData = serde_json::from_str(
            r#"{"company": {"name": "Alfa s.r.o.", "registration_number": "07023987"},
                "tender": {"title": "Dodávka serverů"},
                "extra": {"Price": "1 000 Kč", "title": "ignored"}}"#,
        )
        .expect("json");
        let values = data.template_values();
        assert_eq!(values.get("company.name").map(String::as_str), Some("Alfa s.r.o."));
        assert_eq!(values.get("registration_number").map(String::as_str), Some("07023987"));
        assert_eq!(values.get("tender.title").map(String::as_str), Some("Dodávka serverů"));
        assert_eq!(values.get("title").map(String::as_str), Some("Dodávka serverů"));
        assert_eq!(values.get("price").map(String::as_str), Some("1 000 Kč"));
        assert!(!values.contains_key("company.tax_id"));

        let labels = data.company.label_values();
        assert_eq!(labels.get(CompanyField::RegistrationNumber), Some("07023987"));
        assert_eq!(labels.get(CompanyField::TaxId), None);
    }
}
