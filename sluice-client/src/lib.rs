//! Sluice HTTP Client
//!
//! A small, type-safe HTTP client for the engine supervisor's status API.
//!
//! # Example
//!
//! ```no_run
//! use sluice_client::EngineClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = EngineClient::new("http://localhost:8090");
//!
//!     client.health().await?;
//!     let status = client.status().await?;
//!
//!     println!("running: {}", status.running);
//!     Ok(())
//! }
//! ```

pub mod error;
mod executions;
mod status;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Sluice status API
///
/// Endpoints are grouped by concern:
/// - Liveness and worker pool status
/// - Execution record monitoring
#[derive(Debug, Clone)]
pub struct EngineClient {
    /// Base URL of the status API (e.g., "http://localhost:8090")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl EngineClient {
    /// Create a new engine client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the status API (e.g., "http://localhost:8090")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new engine client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the status API
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    ///
    /// This method checks the status code and returns an appropriate error if
    /// the request failed, or deserializes the response body if successful.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::debug!("Request failed with {}: {}", status, error_text);
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response whose body is not needed
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = EngineClient::new("http://localhost:8090");
        assert_eq!(client.base_url(), "http://localhost:8090");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = EngineClient::new("http://localhost:8090/");
        assert_eq!(client.base_url(), "http://localhost:8090");
    }

    #[test]
    fn test_client_with_custom_client() {
        let http_client = Client::new();
        let client = EngineClient::with_client("http://localhost:8090", http_client);
        assert_eq!(client.base_url(), "http://localhost:8090");
    }
}
