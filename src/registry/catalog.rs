//! Parsing of the embedded capability catalog.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const CATALOG_YAML: &str = include_str!("catalog.yaml");

/// Sentinel-encoded "how many active keys can this backend hold at once".
///
/// §9 DESIGN NOTES: use a tagged sum type, never a distinguished unsigned
/// value, so "unlimited" and "unknown" can never be confused with a literal
/// cap of 0 or `u32::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxActiveKeys {
    /// The catalog recorded the literal string `"unlimited"`.
    Unlimited,
    /// The catalog had no entry for this backend.
    Unknown,
    /// A literal positive cap.
    Limited(u32),
}

impl MaxActiveKeys {
    /// Encode per spec.md §4.1: -1 = unlimited, 0 = unknown, N = literal cap.
    pub fn as_i64(self) -> i64 {
        match self {
            MaxActiveKeys::Unlimited => -1,
            MaxActiveKeys::Unknown => 0,
            MaxActiveKeys::Limited(n) => n as i64,
        }
    }

    pub fn at_least(self, n: u32) -> bool {
        match self {
            MaxActiveKeys::Unlimited => true,
            MaxActiveKeys::Unknown => false,
            MaxActiveKeys::Limited(cap) => cap >= n,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(untagged)]
enum RawMaxActiveKeys {
    Number(i64),
    Tagged(String),
}

impl From<RawMaxActiveKeys> for MaxActiveKeys {
    fn from(raw: RawMaxActiveKeys) -> Self {
        match raw {
            RawMaxActiveKeys::Number(n) if n > 0 => MaxActiveKeys::Limited(n as u32),
            RawMaxActiveKeys::Number(_) => MaxActiveKeys::Unknown,
            RawMaxActiveKeys::Tagged(s) if s.eq_ignore_ascii_case("unlimited") => {
                MaxActiveKeys::Unlimited
            }
            RawMaxActiveKeys::Tagged(_) => MaxActiveKeys::Unknown,
        }
    }
}

/// Immutable capability record for one secret backend provider.
#[derive(Debug, Clone)]
pub struct ProviderCapability {
    pub display_name: String,
    pub max_active_keys: MaxActiveKeys,
    pub supports_expiration: bool,
    pub supports_versioning: bool,
    pub supports_revocation: bool,
    pub rotation_api: String,
    /// Ordered; the first entry is the recommended default strategy.
    pub recommended_strategies: Vec<String>,
}

/// Risk classification for a rotation strategy's unavoidable downtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DowntimeRisk {
    None,
    Low,
    Medium,
    High,
}

/// Immutable description of a rotation strategy (`immediate`, `two-key`, ...).
#[derive(Debug, Clone)]
pub struct StrategyDefinition {
    pub name: String,
    pub description: String,
    pub downtime_risk: DowntimeRisk,
    pub complexity: String,
    pub requirements: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct RawProvider {
    display_name: String,
    max_active_keys: RawMaxActiveKeys,
    supports_expiration: bool,
    supports_versioning: bool,
    supports_revocation: bool,
    rotation_api: String,
    #[serde(default)]
    recommended_strategies: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct RawStrategy {
    name: String,
    description: String,
    downtime_risk: DowntimeRisk,
    complexity: String,
    #[serde(default)]
    requirements: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct RawCatalog {
    providers: HashMap<String, RawProvider>,
    strategies: HashMap<String, RawStrategy>,
}

/// JSON Schema for the capability catalog's YAML shape, generated from the
/// same structs `Catalog::parse` deserializes into. Lets an operator
/// authoring a custom catalog validate it before it's embedded and
/// compiled in (spec §6: the catalog is an external interface).
pub fn catalog_json_schema() -> schemars::Schema {
    schemars::schema_for!(RawCatalog)
}

/// Parsed, immutable catalog contents.
pub struct Catalog {
    pub providers: HashMap<String, ProviderCapability>,
    pub strategies: HashMap<String, StrategyDefinition>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to parse embedded capability catalog: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Normalize a provider/strategy name for case- and trim-insensitive lookup.
pub fn normalize_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl Catalog {
    /// Parse the embedded YAML catalog. Pure and infallible in practice
    /// (the embedded file is checked at compile time by tests), but kept
    /// fallible so a corrupt catalog never panics the process.
    pub fn load() -> Result<Self, CatalogError> {
        Self::parse(CATALOG_YAML)
    }

    fn parse(yaml: &str) -> Result<Self, CatalogError> {
        let raw: RawCatalog = serde_yaml::from_str(yaml)?;

        let providers = raw
            .providers
            .into_iter()
            .map(|(name, p)| {
                (
                    normalize_key(&name),
                    ProviderCapability {
                        display_name: p.display_name,
                        max_active_keys: p.max_active_keys.into(),
                        supports_expiration: p.supports_expiration,
                        supports_versioning: p.supports_versioning,
                        supports_revocation: p.supports_revocation,
                        rotation_api: p.rotation_api,
                        recommended_strategies: p.recommended_strategies,
                    },
                )
            })
            .collect();

        let strategies = raw
            .strategies
            .into_iter()
            .map(|(name, s)| {
                (
                    normalize_key(&name),
                    StrategyDefinition {
                        name: s.name,
                        description: s.description,
                        downtime_risk: s.downtime_risk,
                        complexity: s.complexity,
                        requirements: s.requirements,
                    },
                )
            })
            .collect();

        Ok(Catalog {
            providers,
            strategies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_catalog_parses() {
        let catalog = Catalog::load().expect("embedded catalog must parse");
        assert!(catalog.providers.contains_key("bitwarden"));
        assert!(catalog.strategies.contains_key("immediate"));
    }

    #[test]
    fn unlimited_sentinel_decodes_to_minus_one() {
        let catalog = Catalog::load().expect("embedded catalog must parse");
        let aws = &catalog.providers["aws-secrets-manager"];
        assert_eq!(aws.max_active_keys.as_i64(), -1);
    }

    #[test]
    fn literal_cap_decodes_to_itself() {
        let catalog = Catalog::load().expect("embedded catalog must parse");
        let bw = &catalog.providers["bitwarden"];
        assert_eq!(bw.max_active_keys.as_i64(), 2);
    }

    #[test]
    fn unknown_provider_cap_defaults_to_zero() {
        assert_eq!(MaxActiveKeys::Unknown.as_i64(), 0);
    }

    #[test]
    fn catalog_schema_describes_the_top_level_maps() {
        let schema = catalog_json_schema();
        let value = serde_json::to_value(&schema).expect("schema serializes");
        let properties = value["properties"].as_object().expect("schema has properties");
        assert!(properties.contains_key("providers"));
        assert!(properties.contains_key("strategies"));
    }
}
