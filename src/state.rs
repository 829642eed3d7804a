//! Application state shared across handlers and tasks

use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::routes::metrics::Metrics;
use crate::services::{Checker, Stats};
use crate::tasks::scheduler::Scheduler;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Service registry and check history
    pub db: Arc<Database>,
    /// Runs checks and records their outcome
    pub checker: Checker,
    /// Read-side uptime statistics
    pub stats: Stats,
    /// Per-service check loops
    pub scheduler: Scheduler,
    /// Application metrics for Prometheus
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wire the engine together around an open database
    pub fn new(db: Database, config: &Config) -> Result<Self> {
        let db = Arc::new(db);
        let metrics = Arc::new(Metrics::new());
        let checker = Checker::new(Arc::clone(&db), Arc::clone(&metrics))?;
        let stats = Stats::new(Arc::clone(&db), config.online_window, config.hits_limit);
        let scheduler = Scheduler::new(
            Arc::clone(&db),
            checker.clone(),
            Arc::clone(&metrics),
            config.sync_interval,
        );

        Ok(Self {
            db,
            checker,
            stats,
            scheduler,
            metrics,
        })
    }
}
