use std::time::Duration;

use anyhow::{Context, Result};

use crate::pipeline::orchestrator::{OrchestratorConfig, DEFAULT_STAGE_TIMEOUT};
use crate::pipeline::result::Topology;

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    pub topology: Topology,
    pub stage_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("Required environment variable '{key}' is not set"))
        };

        let topology = match lookup("PIPELINE_TOPOLOGY") {
            Some(raw) => raw
                .parse::<Topology>()
                .map_err(anyhow::Error::msg)
                .context("PIPELINE_TOPOLOGY must be 'parallel' or 'sequential'")?,
            None => Topology::default(),
        };

        let stage_timeout = match lookup("STAGE_TIMEOUT_SECS") {
            Some(raw) => {
                let secs = raw
                    .trim()
                    .parse::<u64>()
                    .context("STAGE_TIMEOUT_SECS must be a whole number of seconds")?;
                anyhow::ensure!(secs > 0, "STAGE_TIMEOUT_SECS must be greater than zero");
                Duration::from_secs(secs)
            }
            None => DEFAULT_STAGE_TIMEOUT,
        };

        Ok(Config {
            anthropic_api_key: require("ANTHROPIC_API_KEY")?,
            port: lookup("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            topology,
            stage_timeout,
        })
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            topology: self.topology,
            stage_timeout: self.stage_timeout,
        }
    }
}
