//! OpenAI-compatible client configuration with sensible defaults.

use crate::error::{KihubError, Result};
use async_openai::{config::OpenAIConfig, Client};
use std::time::Duration;

/// Default timeout for API requests (5 minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Create a client for an OpenAI-compatible endpoint with a request timeout.
///
/// `api_base` selects another provider (Groq, a local server); `None` keeps api.openai.com.
pub fn create_client(
    api_base: Option<&str>,
    api_key: &str,
    timeout: Duration,
) -> Result<Client<OpenAIConfig>> {
    let http_client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| KihubError::Config(format!("Failed to create HTTP client: {}", e)))?;

    let mut config = OpenAIConfig::new().with_api_key(api_key);
    if let Some(base) = api_base {
        config = config.with_api_base(base.trim_end_matches('/'));
    }

    Ok(Client::with_config(config).with_http_client(http_client))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_client_with_custom_base() {
        let client = create_client(
            Some("https://api.groq.com/openai/v1/"),
            "test-key",
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        );
        assert!(client.is_ok());
    }
}
