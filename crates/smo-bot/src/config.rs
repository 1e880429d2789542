//! Application configuration.
//!
//! Loaded from a TOML file; the `EXCHANGESERVICE` environment variable
//! overrides the gateway endpoint, `LOCAL=1` switches to the in-process
//! store and disables outbound leverage pushes.

use serde::{Deserialize, Serialize};
use std::path::Path;

use smo_core::Plan;

use crate::error::{AppError, AppResult};

/// Gateway client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the exchange service.
    #[serde(default = "default_gateway_url")]
    pub base_url: String,
}

fn default_gateway_url() -> String {
    "http://localhost:8085".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_url(),
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Exchange name used for feed snapshot lookups.
    #[serde(default = "default_exchange")]
    pub exchange: String,
    /// Market poll interval (ms). Default: 60.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_exchange() -> String {
    "binance".to_string()
}

fn default_poll_interval_ms() -> u64 {
    60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exchange: default_exchange(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Plans to execute at startup.
    #[serde(default)]
    pub plans: Vec<Plan>,
}

impl AppConfig {
    /// Load from a TOML file with environment overrides.
    pub fn load(path: &Path) -> AppResult<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::default().separator("__"));

        let mut cfg: AppConfig = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;

        if let Ok(url) = std::env::var("EXCHANGESERVICE") {
            cfg.gateway.base_url = url;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Sanity checks that would otherwise surface as runtime faults.
    pub fn validate(&self) -> AppResult<()> {
        if self.gateway.base_url.is_empty() {
            return Err(AppError::Config("gateway.base_url is empty".into()));
        }
        if self.engine.poll_interval_ms == 0 {
            return Err(AppError::Config("engine.poll_interval_ms must be > 0".into()));
        }
        for plan in &self.plans {
            if plan.leverage == 0 {
                return Err(AppError::Config(format!(
                    "plan {}: leverage must be >= 1",
                    plan.id
                )));
            }
            if plan.exit_levels.is_empty()
                && plan.stop_loss_pct.is_zero()
                && plan.forced_loss_pct.is_zero()
                && !plan.stop_loss_external
            {
                return Err(AppError::Config(format!(
                    "plan {}: no exit levels and no stop configured",
                    plan.id
                )));
            }
        }
        Ok(())
    }
}
