//! Prometheus metrics endpoint

use axum::extract::State;
use axum::response::IntoResponse;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::state::AppState;

/// Process-wide counters for checks and history writes
#[derive(Default)]
pub struct Metrics {
    /// Checks run, successful or not
    pub checks_total: AtomicU64,
    /// Hits written
    pub hits_recorded_total: AtomicU64,
    /// Failures written
    pub failures_recorded_total: AtomicU64,
    /// Checks whose result could not be persisted
    pub persist_errors_total: AtomicU64,
    /// Services with a running check loop
    services_scheduled: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_checks(&self) {
        self.checks_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_hits(&self) {
        self.hits_recorded_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failures(&self) {
        self.failures_recorded_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_persist_errors(&self) {
        self.persist_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_services_scheduled(&self, count: u64) {
        self.services_scheduled.store(count, Ordering::Relaxed);
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            checks_total: self.checks_total.load(Ordering::Relaxed),
            hits_recorded_total: self.hits_recorded_total.load(Ordering::Relaxed),
            failures_recorded_total: self.failures_recorded_total.load(Ordering::Relaxed),
            persist_errors_total: self.persist_errors_total.load(Ordering::Relaxed),
            services_scheduled: self.services_scheduled.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub checks_total: u64,
    pub hits_recorded_total: u64,
    pub failures_recorded_total: u64,
    pub persist_errors_total: u64,
    pub services_scheduled: u64,
}

/// GET /metrics
///
/// Returns Prometheus-format metrics
pub async fn prometheus_metrics(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let snapshot = state.metrics.get_metrics();
    let online = state.stats.count_online().await?;

    let output = format!(
        r#"# HELP upcheck_checks_total Total number of service checks run
# TYPE upcheck_checks_total counter
upcheck_checks_total {}

# HELP upcheck_hits_recorded_total Total number of successful checks recorded
# TYPE upcheck_hits_recorded_total counter
upcheck_hits_recorded_total {}

# HELP upcheck_failures_recorded_total Total number of failed checks recorded
# TYPE upcheck_failures_recorded_total counter
upcheck_failures_recorded_total {}

# HELP upcheck_persist_errors_total Total number of check results that could not be stored
# TYPE upcheck_persist_errors_total counter
upcheck_persist_errors_total {}

# HELP upcheck_services_online Current number of services whose last check succeeded
# TYPE upcheck_services_online gauge
upcheck_services_online {}

# HELP upcheck_services_scheduled Current number of services with an active check loop
# TYPE upcheck_services_scheduled gauge
upcheck_services_scheduled {}

# HELP upcheck_info Build information
# TYPE upcheck_info gauge
upcheck_info{{version="{}"}} 1
"#,
        snapshot.checks_total,
        snapshot.hits_recorded_total,
        snapshot.failures_recorded_total,
        snapshot.persist_errors_total,
        online,
        snapshot.services_scheduled,
        env!("CARGO_PKG_VERSION"),
    );

    Ok((
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        output,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();
        metrics.inc_checks();
        metrics.inc_checks();
        metrics.inc_hits();
        metrics.inc_failures();
        metrics.inc_persist_errors();
        metrics.set_services_scheduled(4);

        assert_eq!(
            metrics.get_metrics(),
            MetricsSnapshot {
                checks_total: 2,
                hits_recorded_total: 1,
                failures_recorded_total: 1,
                persist_errors_total: 1,
                services_scheduled: 4,
            }
        );
    }
}
