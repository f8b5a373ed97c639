//! Configuration module

use sluice_client::EngineClient;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the engine's status API
    pub engine_url: String,
}

impl Config {
    pub fn client(&self) -> EngineClient {
        EngineClient::new(&self.engine_url)
    }
}
