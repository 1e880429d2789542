//! Application wiring: construct the shared collaborators once, spawn one
//! runtime per plan, stop everything on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use smo_engine::{PlanRuntime, RuntimeConfig};
use smo_feed::SnapshotMap;
use smo_gateway::HttpGateway;
use smo_store::{MemoryStore, StateStore};
use smo_telemetry::metrics::ACTIVE_PLANS;

use crate::config::AppConfig;
use crate::error::AppResult;

/// Running application: shared collaborators plus one runtime per plan.
pub struct App {
    config: AppConfig,
    store: Arc<MemoryStore>,
    feed: Arc<SnapshotMap>,
    runtimes: Vec<Arc<PlanRuntime>>,
}

impl App {
    /// Build the shared collaborators and one runtime per configured plan.
    pub async fn build(config: AppConfig) -> AppResult<Self> {
        let gateway = Arc::new(HttpGateway::new(config.gateway.base_url.clone()));
        let store = Arc::new(MemoryStore::new());
        let feed = Arc::new(SnapshotMap::new());

        // Seed the store with the configured plans and default precision;
        // a production deployment swaps in the real backend here.
        for plan in &config.plans {
            store.set_market_rules(
                plan.symbol.clone(),
                plan.market_kind,
                smo_core::MarketRules::new(2, 4),
            );
            store.insert_plan(plan.clone());
        }

        let runtime_config = RuntimeConfig {
            exchange: config.engine.exchange.clone(),
            poll_interval: Duration::from_millis(config.engine.poll_interval_ms),
        };

        let mut runtimes = Vec::with_capacity(config.plans.len());
        for plan in &config.plans {
            // The store is the source of truth; read the plan back from it.
            let plan = store
                .plan(&plan.id)
                .await?
                .unwrap_or_else(|| plan.clone());
            let runtime = PlanRuntime::new(
                plan,
                gateway.clone(),
                store.clone() as Arc<dyn StateStore>,
                feed.clone(),
                runtime_config.clone(),
            )
            .await?;
            runtimes.push(runtime);
        }

        Ok(Self {
            config,
            store,
            feed,
            runtimes,
        })
    }

    /// Shared feed map, for the feed process to write into.
    pub fn feed(&self) -> Arc<SnapshotMap> {
        self.feed.clone()
    }

    /// Shared store handle.
    pub fn store(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }

    /// Start every runtime and run until shutdown is requested.
    pub async fn run(self) -> AppResult<()> {
        info!(
            plans = self.runtimes.len(),
            exchange = %self.config.engine.exchange,
            "starting plan runtimes"
        );

        let mut handles = Vec::new();
        for runtime in &self.runtimes {
            match runtime.start().await {
                Ok(()) => {
                    ACTIVE_PLANS.inc();
                    handles.push(tokio::spawn(Arc::clone(runtime).run()));
                }
                Err(err) => {
                    warn!(error = %err, "plan failed to start, skipping");
                }
            }
        }

        tokio::signal::ctrl_c().await.ok();
        info!("shutdown requested, stopping plans");

        for runtime in &self.runtimes {
            if !runtime.is_stopped() {
                runtime.stop().await;
                ACTIVE_PLANS.dec();
            }
        }
        for handle in handles {
            handle.abort();
        }
        Ok(())
    }
}
