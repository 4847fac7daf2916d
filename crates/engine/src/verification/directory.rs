use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use super::{TaxpayerRecord, VerificationOutcome, VerificationService};

/// Fixed set of records, for local runs without a gateway.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    records: Vec<TaxpayerRecord>,
}

impl StaticDirectory {
    pub fn new(records: Vec<TaxpayerRecord>) -> Self {
        Self { records }
    }

    /// Records from a YAML list.
    pub fn from_yaml_file(path: &Path) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::new(serde_yaml::from_str(&raw)?))
    }
}

#[async_trait]
impl VerificationService for StaticDirectory {
    async fn search(&self, name: &str) -> Result<Vec<TaxpayerRecord>> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .records
            .iter()
            .filter(|record| record.name.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn verify(&self, nif: &str) -> Result<VerificationOutcome> {
        let record = self.records.iter().find(|record| record.nif == nif.trim()).cloned();
        Ok(VerificationOutcome {
            verified: record.is_some(),
            reason: if record.is_none() {
                Some("not_found".to_string())
            } else {
                None
            },
            record,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> StaticDirectory {
        StaticDirectory::new(vec![
            TaxpayerRecord {
                nif: "123456789".to_string(),
                name: "Jean Dupont".to_string(),
                address: None,
                activity: None,
            },
            TaxpayerRecord {
                nif: "987654321".to_string(),
                name: "Marie Dupont".to_string(),
                address: Some("Abidjan".to_string()),
                activity: None,
            },
        ])
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive() {
        let dir = directory();
        assert_eq!(dir.search("jean dupont").await.unwrap().len(), 1);
        assert_eq!(dir.search("DUPONT").await.unwrap().len(), 2);
        assert!(dir.search("  ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_verify() {
        let dir = directory();
        let found = dir.verify("987654321").await.unwrap();
        assert!(found.verified);
        assert_eq!(found.record.unwrap().name, "Marie Dupont");

        let missing = dir.verify("000").await.unwrap();
        assert!(!missing.verified);
        assert_eq!(missing.reason.as_deref(), Some("not_found"));
    }
}
