use std::collections::BTreeMap;
use std::path::Path;

use crate::error::EngineError;

/// The domain taxonomy from a catalog's YAML side file: a map from domain
/// name to its allowed sub-domains.
///
/// Enforced uniformly across every catalog file in the same root: an entry
/// declaring a domain must use a known domain, and its sub-domain must be
/// in that domain's list. Entries without a domain are exempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainTaxonomy {
    domains: BTreeMap<String, Vec<String>>,
}

impl DomainTaxonomy {
    /// An empty taxonomy accepts any domain pair.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the side file, typically `domains.yaml` in a catalog root.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCatalog` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::invalid_catalog(format!(
                "cannot read taxonomy {}: {e}",
                path.display()
            ))
        })?;
        Self::from_yaml(&text)
    }

    /// Parse taxonomy YAML.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCatalog` for malformed YAML.
    pub fn from_yaml(text: &str) -> Result<Self, EngineError> {
        let domains: BTreeMap<String, Vec<String>> = serde_yaml::from_str(text)
            .map_err(|e| EngineError::invalid_catalog(format!("malformed taxonomy: {e}")))?;
        Ok(Self { domains })
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Validate a catalog entry's domain/sub-domain pair.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCatalog` when the domain is unknown or the
    /// sub-domain is not in the domain's list.
    pub fn validate(
        &self,
        entry_id: &str,
        domain: Option<&str>,
        sub_domain: Option<&str>,
    ) -> Result<(), EngineError> {
        let Some(domain) = domain else {
            return Ok(());
        };
        if self.is_empty() {
            return Ok(());
        }
        let Some(allowed) = self.domains.get(domain) else {
            return Err(EngineError::invalid_catalog(format!(
                "entry \"{entry_id}\": unknown domain \"{domain}\""
            )));
        };
        if let Some(sub) = sub_domain {
            if !allowed.iter().any(|s| s == sub) {
                return Err(EngineError::invalid_catalog(format!(
                    "entry \"{entry_id}\": sub-domain \"{sub}\" is not in domain \"{domain}\" (allowed: {})",
                    allowed.join(", ")
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const YAML: &str = "SYSTEM: [MISC, POWER]\nCONNECTIVITY: [BT, WIFI]\n";

    #[test]
    fn parses_side_file() {
        let tax = DomainTaxonomy::from_yaml(YAML).unwrap();
        assert!(!tax.is_empty());
        assert!(tax.validate("X", Some("SYSTEM"), Some("POWER")).is_ok());
    }

    #[test]
    fn unknown_domain_rejected() {
        let tax = DomainTaxonomy::from_yaml(YAML).unwrap();
        let err = tax
            .validate("X", Some("STORAGE"), Some("EMMC"))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidCatalog);
    }

    #[test]
    fn sub_domain_outside_domain_rejected() {
        let tax = DomainTaxonomy::from_yaml(YAML).unwrap();
        let err = tax.validate("X", Some("SYSTEM"), Some("BT")).unwrap_err();
        assert!(err.message.contains("BT"));
    }

    #[test]
    fn entries_without_domain_are_exempt() {
        let tax = DomainTaxonomy::from_yaml(YAML).unwrap();
        assert!(tax.validate("X", None, None).is_ok());
    }

    #[test]
    fn empty_taxonomy_accepts_anything() {
        let tax = DomainTaxonomy::empty();
        assert!(tax.validate("X", Some("ANY"), Some("PAIR")).is_ok());
    }

    #[test]
    fn malformed_yaml_rejected() {
        assert!(DomainTaxonomy::from_yaml("SYSTEM: {broken").is_err());
    }
}
