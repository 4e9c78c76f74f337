//! Provider registry.
//!
//! The registry is the closed set of configured probe providers plus the
//! designated analysis backend. It is constructed once at process start and
//! dependency-injected into the pipeline; nothing initializes a provider
//! lazily on first use.

use std::sync::Arc;

use tracing::{info, warn};

use geolens_core::{Error, GenerationBackend, Result};

use crate::backend::{OpenAiCompatBackend, OpenAiCompatConfig};

/// A configured probe provider.
#[derive(Clone)]
pub struct RegisteredProvider {
    /// Provider identifier (e.g. "openai", "perplexity", "gemini").
    pub id: String,
    /// The generation backend answering probe queries for this provider.
    pub backend: Arc<dyn GenerationBackend>,
}

/// Registry of configured providers and the analysis backend.
pub struct ProviderRegistry {
    probes: Vec<RegisteredProvider>,
    analyst: Arc<dyn GenerationBackend>,
}

impl ProviderRegistry {
    /// Create a registry with the given analysis backend and no probes yet.
    pub fn new(analyst: Arc<dyn GenerationBackend>) -> Self {
        Self {
            probes: Vec::new(),
            analyst,
        }
    }

    /// Register a probe provider. Replaces any provider with the same id.
    pub fn register(&mut self, id: impl Into<String>, backend: Arc<dyn GenerationBackend>) {
        let id = id.into();
        info!(provider = %id, model = backend.model_name(), "Registering probe provider");
        self.probes.retain(|p| p.id != id);
        self.probes.push(RegisteredProvider { id, backend });
    }

    /// All registered probe providers.
    pub fn probes(&self) -> &[RegisteredProvider] {
        &self.probes
    }

    /// Registered probe provider ids.
    pub fn probe_ids(&self) -> Vec<&str> {
        self.probes.iter().map(|p| p.id.as_str()).collect()
    }

    /// Look up a probe provider by id.
    pub fn get(&self, id: &str) -> Option<&RegisteredProvider> {
        self.probes.iter().find(|p| p.id == id)
    }

    /// Select the providers a job's spec names. Unknown ids are logged and
    /// skipped; an empty selection is an error (the job cannot probe
    /// anything).
    pub fn select(&self, ids: &[String]) -> Result<Vec<RegisteredProvider>> {
        let mut selected = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get(id) {
                Some(provider) => selected.push(provider.clone()),
                None => warn!(provider = %id, "Job spec names unregistered provider, skipping"),
            }
        }
        if selected.is_empty() {
            return Err(Error::Config(format!(
                "no registered provider matches the job spec (requested: {:?}, registered: {:?})",
                ids,
                self.probe_ids()
            )));
        }
        Ok(selected)
    }

    /// The backend used for extraction and aggregation calls.
    pub fn analyst(&self) -> Arc<dyn GenerationBackend> {
        self.analyst.clone()
    }

    /// Build the registry from environment variables.
    ///
    /// `GEOLENS_PROVIDERS` is a comma-separated provider id list; each id is
    /// configured through `GEOLENS_PROVIDER_<ID>_*` variables (see
    /// [`OpenAiCompatConfig::from_env_for`]). The analysis backend reads
    /// `GEOLENS_ANALYSIS_*` variables the same way.
    pub fn from_env() -> Result<Self> {
        let analyst_config = OpenAiCompatConfig::from_env_for("ANALYSIS");
        let analyst: Arc<dyn GenerationBackend> =
            Arc::new(OpenAiCompatBackend::new(analyst_config)?);

        let mut registry = Self::new(analyst);

        let ids = std::env::var("GEOLENS_PROVIDERS")
            .map_err(|_| Error::Config("GEOLENS_PROVIDERS is not set".to_string()))?;

        for id in ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let config = OpenAiCompatConfig::from_env_for(id);
            registry.register(id, Arc::new(OpenAiCompatBackend::new(config)?));
        }

        if registry.probes.is_empty() {
            return Err(Error::Config(
                "GEOLENS_PROVIDERS names no providers".to_string(),
            ));
        }

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;

    fn mock(model: &str) -> Arc<dyn GenerationBackend> {
        Arc::new(MockBackend::new().with_model(model))
    }

    fn sample_registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new(mock("analyst-model"));
        registry.register("openai", mock("gpt-4o-mini"));
        registry.register("perplexity", mock("sonar"));
        registry
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = sample_registry();
        assert_eq!(registry.probe_ids(), vec!["openai", "perplexity"]);
        assert!(registry.get("openai").is_some());
        assert!(registry.get("gemini").is_none());
    }

    #[test]
    fn test_register_replaces_same_id() {
        let mut registry = sample_registry();
        registry.register("openai", mock("gpt-4.1"));
        assert_eq!(registry.probes().len(), 2);
        assert_eq!(
            registry.get("openai").unwrap().backend.model_name(),
            "gpt-4.1"
        );
    }

    #[test]
    fn test_select_filters_unknown_ids() {
        let registry = sample_registry();
        let selected = registry
            .select(&["openai".to_string(), "gemini".to_string()])
            .unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "openai");
    }

    #[test]
    fn test_select_empty_is_error() {
        let registry = sample_registry();
        let result = registry.select(&["gemini".to_string()]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_analyst_is_shared() {
        let registry = sample_registry();
        assert_eq!(registry.analyst().model_name(), "analyst-model");
    }
}
