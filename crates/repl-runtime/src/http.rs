//! Shared HTTP plumbing for the REST adapters.

use std::time::Duration;

use repl_core::AgentError;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;

/// Longest slice of an error body kept in error messages
const MAX_ERROR_BODY: usize = 500;

/// Environment-backed credential, read on every use
#[derive(Clone, Debug)]
pub struct EnvCredential {
    var: String,
}

impl EnvCredential {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    pub fn var(&self) -> &str {
        &self.var
    }

    /// Current non-blank value
    pub fn value(&self) -> Option<String> {
        std::env::var(&self.var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn is_present(&self) -> bool {
        self.value().is_some()
    }
}

pub(crate) fn build_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {}", e);
            Client::new()
        })
}

/// Classify a transport failure
pub(crate) fn transport_error(provider: &str, err: &reqwest::Error) -> AgentError {
    if err.is_connect() || err.is_timeout() {
        AgentError::ProviderUnavailable(format!("{provider}: {err}"))
    } else {
        AgentError::Provider(format!("{provider}: {err}"))
    }
}

/// Map a non-success HTTP status to the error taxonomy
pub(crate) fn status_error(provider: &str, status: StatusCode, body: &str) -> AgentError {
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AgentError::Auth(format!("{provider}: {body}")),
        StatusCode::TOO_MANY_REQUESTS => AgentError::RateLimited(format!("{provider}: {body}")),
        _ => AgentError::Provider(format!("{provider} returned {status}: {body}")),
    }
}

/// Decode a JSON body, turning error statuses into typed errors
pub(crate) async fn read_json<T: DeserializeOwned>(provider: &str, response: Response) -> repl_core::Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(provider, status, &body));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| AgentError::Provider(format!("{provider}: unreadable response: {e}")))
}
