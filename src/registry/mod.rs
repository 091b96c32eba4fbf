//! Capability Registry & Strategy Validator (spec §4.1).
//!
//! Loads the embedded catalog once, behind a double-checked single
//! initialization barrier, and exposes read-only queries over it. The
//! catalog is immutable after load and shared by reference — there is no
//! mutation path once `get_or_init` has run.

pub mod catalog;

use catalog::{normalize_key, Catalog, CatalogError, DowntimeRisk, MaxActiveKeys};
use std::sync::{Arc, OnceLock, RwLock};

pub use catalog::{catalog_json_schema, ProviderCapability, StrategyDefinition};

/// Outcome of a successful validation. Carries a warning when the strategy
/// is technically legal but its definition is flagged `downtime_risk: high`
/// (spec §4.1: "reported as a warning-class validation result, distinct
/// from hard failure").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    ValidWithWarning(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),
    #[error("strategy '{strategy}' is not a recommended strategy for provider '{provider}'")]
    NotRecommended { provider: String, strategy: String },
    #[error("requirement unmet: {0}")]
    RequirementUnmet(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// The capability registry. One process-wide instance is reached through
/// [`global`]; tests construct their own with [`Registry::new`].
pub struct Registry {
    inner: RwLock<Option<Arc<Catalog>>>,
}

impl Registry {
    pub const fn new() -> Self {
        Registry {
            inner: RwLock::new(None),
        }
    }

    /// Load the catalog if not already loaded. Double-checked: a cheap read
    /// lock covers the common case, the write lock is only taken on first
    /// use. If loading fails the latch is left empty so a later call can
    /// retry (§9: "on failure, the latch is re-armed").
    fn get_or_init(&self) -> Result<Arc<Catalog>, RegistryError> {
        if let Some(existing) = self
            .inner
            .read()
            .expect("registry lock poisoned")
            .as_ref()
        {
            return Ok(existing.clone());
        }

        let mut guard = self.inner.write().expect("registry lock poisoned");
        if let Some(existing) = guard.as_ref() {
            return Ok(existing.clone());
        }

        let catalog = Arc::new(Catalog::load()?);
        *guard = Some(catalog.clone());
        Ok(catalog)
    }

    pub fn get_provider_capability(
        &self,
        provider: &str,
    ) -> Result<ProviderCapability, ValidationError> {
        let catalog = self.get_or_init().map_err(|e| {
            ValidationError::UnknownProvider(format!("registry load failed: {e}"))
        })?;
        catalog
            .providers
            .get(&normalize_key(provider))
            .cloned()
            .ok_or_else(|| ValidationError::UnknownProvider(provider.to_string()))
    }

    pub fn get_strategy_definition(
        &self,
        strategy: &str,
    ) -> Result<StrategyDefinition, ValidationError> {
        let catalog = self.get_or_init().map_err(|e| {
            ValidationError::UnknownStrategy(format!("registry load failed: {e}"))
        })?;
        catalog
            .strategies
            .get(&normalize_key(strategy))
            .cloned()
            .ok_or_else(|| ValidationError::UnknownStrategy(strategy.to_string()))
    }

    /// Falls back to `"immediate"` if the provider is unknown or has no
    /// recommended strategies.
    pub fn get_recommended_strategy(&self, provider: &str) -> String {
        match self.get_provider_capability(provider) {
            Ok(cap) => cap
                .recommended_strategies
                .first()
                .cloned()
                .unwrap_or_else(|| "immediate".to_string()),
            Err(_) => "immediate".to_string(),
        }
    }

    /// Unknown provider yields true only for `"immediate"`. Unknown
    /// strategy name always yields false.
    pub fn supports_strategy(&self, provider: &str, strategy: &str) -> bool {
        let strategy_key = normalize_key(strategy);
        let cap = match self.get_provider_capability(provider) {
            Ok(cap) => cap,
            Err(_) => return strategy_key == "immediate",
        };
        if self.get_strategy_definition(&strategy_key).is_err() {
            return false;
        }
        self.check_requirement(&cap, &strategy_key).is_ok()
    }

    /// -1 = unlimited, 0 = unknown provider, N = literal cap.
    pub fn get_max_active_keys(&self, provider: &str) -> i64 {
        match self.get_provider_capability(provider) {
            Ok(cap) => cap.max_active_keys.as_i64(),
            Err(_) => 0,
        }
    }

    fn check_requirement(
        &self,
        cap: &ProviderCapability,
        strategy_key: &str,
    ) -> Result<(), String> {
        match strategy_key {
            "two-key" => {
                if cap.max_active_keys.at_least(2) {
                    Ok(())
                } else {
                    Err("two-key requires \u{2265} 2 active keys".to_string())
                }
            }
            "overlap" => {
                if cap.supports_expiration {
                    Ok(())
                } else {
                    Err("overlap requires the backend to support expiration".to_string())
                }
            }
            "versioned" => {
                if cap.supports_versioning {
                    Ok(())
                } else {
                    Err("versioned requires the backend to support versioning".to_string())
                }
            }
            _ => Ok(()),
        }
    }

    /// Full legality check for using `strategy` against `provider`.
    pub fn validate_provider_strategy(
        &self,
        provider: &str,
        strategy: &str,
    ) -> Result<ValidationOutcome, ValidationError> {
        let cap = self.get_provider_capability(provider)?;
        let strategy_key = normalize_key(strategy);
        let def = self.get_strategy_definition(&strategy_key)?;

        if let Err(cause) = self.check_requirement(&cap, &strategy_key) {
            return Err(ValidationError::RequirementUnmet(cause));
        }

        if !cap
            .recommended_strategies
            .iter()
            .any(|s| normalize_key(s) == strategy_key)
        {
            return Err(ValidationError::NotRecommended {
                provider: provider.to_string(),
                strategy: strategy_key,
            });
        }

        if def.downtime_risk == DowntimeRisk::High {
            return Ok(ValidationOutcome::ValidWithWarning(format!(
                "strategy '{}' carries high downtime risk",
                def.name
            )));
        }

        Ok(ValidationOutcome::Valid)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// The process-wide registry instance (spec I6: loaded at most once).
pub fn global() -> &'static Registry {
    GLOBAL.get_or_init(Registry::new)
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
