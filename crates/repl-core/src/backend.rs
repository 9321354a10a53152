//! Backend Selection
//!
//! Keeps the registered providers in priority order, the model selected for
//! each, and which one is current. Sessions hold an `Arc<BackendSelector>` and
//! the loop reads the current provider at the start of every round, so a
//! switch takes effect on the next round without touching the conversation.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{AgentError, Result};
use crate::provider::LlmProvider;

/// Snapshot of one registered backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BackendDescriptor {
    pub name: String,
    /// Credentials present at the time of the snapshot
    pub available: bool,
    /// Model currently selected for this provider
    pub model: String,
    pub current: bool,
}

/// The provider a round should use
#[derive(Clone)]
pub struct ActiveBackend {
    pub provider: Arc<dyn LlmProvider>,
    pub name: String,
    pub model: String,
}

impl std::fmt::Debug for ActiveBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveBackend")
            .field("name", &self.name)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

struct Backend {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

#[derive(Default)]
struct SelectorState {
    backends: Vec<Backend>,
    current: Option<String>,
}

impl SelectorState {
    fn find(&self, name: &str) -> Option<&Backend> {
        self.backends.iter().find(|b| b.provider.name() == name)
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut Backend> {
        self.backends.iter_mut().find(|b| b.provider.name() == name)
    }

    fn first_available(&self) -> Option<&Backend> {
        self.backends.iter().find(|b| b.provider.is_available())
    }

    fn credential_vars(&self) -> Vec<String> {
        let mut vars: Vec<String> = self
            .backends
            .iter()
            .flat_map(|b| b.provider.credential_vars())
            .collect();
        vars.dedup();
        vars
    }
}

/// Registered providers plus the current selection
#[derive(Default)]
pub struct BackendSelector {
    state: RwLock<SelectorState>,
}

impl BackendSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration, in priority order
    pub fn with_provider(self, provider: Arc<dyn LlmProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Register a provider with its default model, replacing one with the same name
    pub fn register(&self, provider: Arc<dyn LlmProvider>) {
        let model = provider.default_model().to_string();
        let mut state = self.state.write();
        if let Some(existing) = state.find_mut(provider.name()) {
            existing.provider = provider;
            existing.model = model;
        } else {
            state.backends.push(Backend { provider, model });
        }
    }

    /// Provider name to availability
    pub fn list_providers(&self) -> BTreeMap<String, bool> {
        self.state
            .read()
            .backends
            .iter()
            .map(|b| (b.provider.name().to_string(), b.provider.is_available()))
            .collect()
    }

    /// Full descriptors in priority order
    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        let state = self.state.read();
        state
            .backends
            .iter()
            .map(|b| BackendDescriptor {
                name: b.provider.name().to_string(),
                available: b.provider.is_available(),
                model: b.model.clone(),
                current: state.current.as_deref() == Some(b.provider.name()),
            })
            .collect()
    }

    pub fn current_name(&self) -> Option<String> {
        self.state.read().current.clone()
    }

    /// Make `name` the current backend
    pub fn switch(&self, name: &str) -> Result<BackendDescriptor> {
        let mut state = self.state.write();
        let backend = state
            .find(name)
            .ok_or_else(|| AgentError::UnknownProvider(name.to_string()))?;

        if !backend.provider.is_available() {
            let hint = backend.provider.credential_vars().join(" or ");
            return Err(AgentError::ProviderUnavailable(format!(
                "{name} has no credentials (set {hint})"
            )));
        }

        let model = backend.model.clone();
        state.current = Some(name.to_string());
        tracing::info!(backend = name, model = %model, "Switched backend");

        Ok(BackendDescriptor {
            name: name.to_string(),
            available: true,
            model,
            current: true,
        })
    }

    /// Select the model for the current backend
    pub fn set_model(&self, model: impl Into<String>) -> Result<()> {
        let current = self
            .current_name()
            .ok_or_else(|| AgentError::Config("no backend selected".into()))?;
        self.set_model_for(&current, model)
    }

    /// Select the model for a named backend
    pub fn set_model_for(&self, name: &str, model: impl Into<String>) -> Result<()> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(AgentError::Config("model name is empty".into()));
        }
        let mut state = self.state.write();
        let backend = state
            .find_mut(name)
            .ok_or_else(|| AgentError::UnknownProvider(name.to_string()))?;
        tracing::info!(backend = name, model = %model, "Selected model");
        backend.model = model;
        Ok(())
    }

    /// Fail with `NoProviderAvailable` when nothing has credentials, otherwise
    /// make sure the current backend is an available one.
    pub fn ensure_ready(&self) -> Result<BackendDescriptor> {
        let mut state = self.state.write();

        let current_ok = state
            .current
            .as_deref()
            .and_then(|name| state.find(name))
            .is_some_and(|b| b.provider.is_available());

        if !current_ok {
            let fallback = state
                .first_available()
                .map(|b| b.provider.name().to_string())
                .ok_or_else(|| AgentError::NoProviderAvailable(state.credential_vars()))?;
            tracing::info!(backend = %fallback, "Selected default backend");
            state.current = Some(fallback);
        }

        let name = state.current.clone().unwrap_or_default();
        let model = state.find(&name).map(|b| b.model.clone()).unwrap_or_default();
        Ok(BackendDescriptor {
            name,
            available: true,
            model,
            current: true,
        })
    }

    /// The backend the next round should use, read fresh
    pub fn current(&self) -> Result<ActiveBackend> {
        let selected = self.current_name();
        let Some(name) = selected else {
            self.ensure_ready()?;
            return self.current();
        };

        let state = self.state.read();
        let backend = state
            .find(&name)
            .ok_or_else(|| AgentError::UnknownProvider(name.clone()))?;

        if !backend.provider.is_available() {
            return Err(AgentError::ProviderUnavailable(format!(
                "{name} credentials are no longer present"
            )));
        }

        Ok(ActiveBackend {
            provider: Arc::clone(&backend.provider),
            name,
            model: backend.model.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;

    fn selector() -> (BackendSelector, Arc<ScriptedProvider>, Arc<ScriptedProvider>) {
        let openai = Arc::new(ScriptedProvider::new("openai").unavailable());
        let anthropic = Arc::new(ScriptedProvider::new("anthropic"));
        let selector = BackendSelector::new()
            .with_provider(openai.clone())
            .with_provider(anthropic.clone());
        (selector, openai, anthropic)
    }

    #[test]
    fn test_list_providers_reflects_credentials() {
        let (selector, openai, _) = selector();
        let listed = selector.list_providers();
        assert_eq!(listed.get("openai"), Some(&false));
        assert_eq!(listed.get("anthropic"), Some(&true));

        openai.set_available(true);
        assert_eq!(selector.list_providers().get("openai"), Some(&true));
    }

    #[test]
    fn test_ensure_ready_picks_first_available() {
        let (selector, _, _) = selector();
        let ready = selector.ensure_ready().unwrap();
        assert_eq!(ready.name, "anthropic");
        assert_eq!(selector.current().unwrap().name, "anthropic");
    }

    #[test]
    fn test_no_provider_available() {
        let selector = BackendSelector::new()
            .with_provider(Arc::new(ScriptedProvider::new("openai").unavailable()));
        let err = selector.ensure_ready().unwrap_err();
        assert!(matches!(err, AgentError::NoProviderAvailable(ref vars) if vars == &["SCRIPTED_OPENAI_KEY"]));
    }

    #[test]
    fn test_switch_errors() {
        let (selector, _, _) = selector();
        assert!(matches!(selector.switch("gemini"), Err(AgentError::UnknownProvider(_))));
        assert!(matches!(selector.switch("openai"), Err(AgentError::ProviderUnavailable(_))));
        assert!(selector.current_name().is_none());
    }

    #[test]
    fn test_switch_and_model() {
        let (selector, openai, _) = selector();
        openai.set_available(true);
        selector.switch("openai").unwrap();
        selector.set_model("gpt-4o").unwrap();

        let active = selector.current().unwrap();
        assert_eq!(active.name, "openai");
        assert_eq!(active.model, "gpt-4o");

        let descriptors = selector.descriptors();
        assert!(descriptors.iter().any(|d| d.name == "openai" && d.current && d.model == "gpt-4o"));
        assert!(descriptors.iter().any(|d| d.name == "anthropic" && !d.current));
    }

    #[test]
    fn test_current_rechecks_availability() {
        let (selector, openai, _) = selector();
        openai.set_available(true);
        selector.switch("openai").unwrap();
        openai.set_available(false);
        assert!(matches!(selector.current(), Err(AgentError::ProviderUnavailable(_))));

        // ensure_ready falls back to a backend that still has credentials
        assert_eq!(selector.ensure_ready().unwrap().name, "anthropic");
    }
}
