//! REPL Configuration
//!
//! Read from the environment after `.env` has been loaded.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use repl_core::{AgentError, DispatchMode, ExecutorConfig, Result};

/// Everything the binary needs to start a session
#[derive(Clone, Debug)]
pub struct ReplConfig {
    pub executor: ExecutorConfig,

    /// Backend to start on instead of the first available one
    pub backend: Option<String>,

    /// Model override for the starting backend
    pub model: Option<String>,

    /// Root directory for the local tools
    pub workdir: PathBuf,
}

impl ReplConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = ExecutorConfig::default();

        let max_rounds: usize = parse_var(&get, "REPL_MAX_ROUNDS", defaults.max_rounds)?;
        if max_rounds == 0 {
            return Err(AgentError::Config("REPL_MAX_ROUNDS must be at least 1".into()));
        }
        let round_timeout = parse_var(&get, "REPL_ROUND_TIMEOUT_SECS", defaults.round_timeout.as_secs())?;
        let tool_timeout = parse_var(&get, "REPL_TOOL_TIMEOUT_SECS", defaults.tool_timeout.as_secs())?;
        if round_timeout == 0 {
            return Err(AgentError::Config("REPL_ROUND_TIMEOUT_SECS must be at least 1".into()));
        }
        if tool_timeout == 0 {
            return Err(AgentError::Config("REPL_TOOL_TIMEOUT_SECS must be at least 1".into()));
        }
        let concurrent = parse_flag(&get, "REPL_CONCURRENT_TOOLS")?;
        let max_context_tokens = parse_var(&get, "REPL_MAX_CONTEXT_TOKENS", defaults.max_context_tokens)?;

        let workdir = match get("REPL_WORKDIR") {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir()?,
        };

        Ok(Self {
            executor: ExecutorConfig {
                max_rounds,
                round_timeout: Duration::from_secs(round_timeout),
                tool_timeout: Duration::from_secs(tool_timeout),
                dispatch: if concurrent {
                    DispatchMode::Concurrent
                } else {
                    DispatchMode::Sequential
                },
                max_context_tokens,
                ..defaults
            },
            backend: get("REPL_BACKEND"),
            model: get("REPL_MODEL"),
            workdir,
        })
    }
}

fn parse_var<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(key).map_or(Ok(default), |raw| {
        raw.parse()
            .map_err(|e| AgentError::Config(format!("{key}={raw:?} is not valid: {e}")))
    })
}

fn parse_flag(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<bool> {
    match get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        None | Some("0" | "false" | "no" | "off") => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some(other) => Err(AgentError::Config(format!("{key}={other:?} is not a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ReplConfig> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).into(), (*v).into())).collect();
        ReplConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.executor.max_rounds, 10);
        assert_eq!(config.executor.round_timeout, Duration::from_secs(120));
        assert_eq!(config.executor.tool_timeout, Duration::from_secs(60));
        assert_eq!(config.executor.dispatch, DispatchMode::Sequential);
        assert_eq!(config.executor.max_context_tokens, 32_768);
        assert!(config.backend.is_none());
        assert!(config.model.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("REPL_MAX_ROUNDS", "3"),
            ("REPL_TOOL_TIMEOUT_SECS", "5"),
            ("REPL_CONCURRENT_TOOLS", "true"),
            ("REPL_BACKEND", "anthropic"),
            ("REPL_MODEL", " claude-haiku-4-5 "),
            ("REPL_WORKDIR", "/tmp/work"),
        ])
        .unwrap();
        assert_eq!(config.executor.max_rounds, 3);
        assert_eq!(config.executor.tool_timeout, Duration::from_secs(5));
        assert_eq!(config.executor.dispatch, DispatchMode::Concurrent);
        assert_eq!(config.backend.as_deref(), Some("anthropic"));
        assert_eq!(config.model.as_deref(), Some("claude-haiku-4-5"));
        assert_eq!(config.workdir, PathBuf::from("/tmp/work"));
    }

    #[test]
    fn test_invalid_numbers_are_config_errors() {
        assert!(matches!(config(&[("REPL_MAX_ROUNDS", "many")]), Err(AgentError::Config(_))));
        assert!(matches!(config(&[("REPL_MAX_ROUNDS", "0")]), Err(AgentError::Config(_))));
        assert!(matches!(config(&[("REPL_ROUND_TIMEOUT_SECS", "-1")]), Err(AgentError::Config(_))));
        assert!(matches!(config(&[("REPL_ROUND_TIMEOUT_SECS", "0")]), Err(AgentError::Config(_))));
        assert!(matches!(config(&[("REPL_TOOL_TIMEOUT_SECS", "0")]), Err(AgentError::Config(_))));
        assert!(matches!(config(&[("REPL_CONCURRENT_TOOLS", "maybe")]), Err(AgentError::Config(_))));
    }
}
