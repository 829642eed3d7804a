//! Uptime statistics over a service's hit/failure history
//!
//! Every figure here is a read over the append-only history; nothing is
//! cached or maintained incrementally. Empty history never errors: it
//! yields zero counts and full uptime.

use crate::db::Database;
use crate::error::Result;
use crate::models::{ChartPoint, Failure, Hit, Service, ServiceSummary};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Display format for "Online since ..." texts, e.g. `Monday 3:04:05PM, Jan  2 2006`
const SINCE_FORMAT: &str = "%A %-I:%M:%S%p, %b %e %Y";

/// Uptime percentage for a set of records.
///
/// No failures means 100, whatever the hit count (including zero).
/// Otherwise `round(hits / (hits + failures) * 100)`.
pub fn uptime_percent(hits: u64, failures: u64) -> f64 {
    if failures == 0 {
        return 100.0;
    }
    let total = (hits + failures) as f64;
    (hits as f64 / total * 100.0).round()
}

/// Human-readable current state, e.g. `Online since Monday 3:04:05PM, Jan  2 2006`
pub fn status_text(online: bool, since: DateTime<Utc>) -> String {
    let state = if online { "Online" } else { "Offline" };
    format!("{} since {}", state, since.format(SINCE_FORMAT))
}

/// Read-side statistics engine
#[derive(Clone)]
pub struct Stats {
    db: Arc<Database>,
    window: Duration,
    hits_limit: usize,
}

impl Stats {
    /// `window` bounds [`Stats::online24`] and the latency chart;
    /// `hits_limit` bounds [`Stats::limited_hits`].
    pub fn new(db: Arc<Database>, window: Duration, hits_limit: usize) -> Self {
        Self {
            db,
            window,
            hits_limit,
        }
    }

    fn window_start(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.window)
            .ok()
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub async fn total_hits(&self, service: &Service) -> Result<u64> {
        self.db.count_hits(service.id, None).await
    }

    pub async fn total_failures(&self, service: &Service) -> Result<u64> {
        self.db.count_failures(service.id, None).await
    }

    /// Failures inside the trailing window
    pub async fn failures_in_window(&self, service: &Service) -> Result<u64> {
        self.db
            .count_failures(service.id, Some(self.window_start()))
            .await
    }

    /// Sum of all hit latencies, in seconds
    pub async fn sum(&self, service: &Service) -> Result<f64> {
        self.db.sum_latency(service.id).await
    }

    /// All hits, oldest first
    pub async fn hits(&self, service: &Service) -> Result<Vec<Hit>> {
        self.db.hits(service.id).await
    }

    /// The most recent hits, newest first, at most `hits_limit` of them
    pub async fn limited_hits(&self, service: &Service) -> Result<Vec<Hit>> {
        self.db
            .recent_hits(service.id, self.hits_limit as i64)
            .await
    }

    /// All failures, oldest first
    pub async fn failures(&self, service: &Service) -> Result<Vec<Failure>> {
        self.db.failures(service.id).await
    }

    /// The most recent failures, newest first, at most `hits_limit` of them
    pub async fn limited_failures(&self, service: &Service) -> Result<Vec<Failure>> {
        self.db
            .recent_failures(service.id, self.hits_limit as i64)
            .await
    }

    /// Uptime percentage over the trailing window (24 hours by default)
    pub async fn online24(&self, service: &Service) -> Result<f64> {
        let since = Some(self.window_start());
        let failures = self.db.count_failures(service.id, since).await?;
        if failures == 0 {
            return Ok(100.0);
        }
        let hits = self.db.count_hits(service.id, since).await?;
        Ok(uptime_percent(hits, failures))
    }

    /// Uptime percentage over the whole history, as an integer string
    pub async fn avg_uptime(&self, service: &Service) -> Result<String> {
        let failures = self.total_failures(service).await?;
        if failures == 0 {
            return Ok("100".to_string());
        }
        let hits = self.total_hits(service).await?;
        Ok(format!("{:.0}", uptime_percent(hits, failures)))
    }

    /// Mean hit latency in milliseconds, 0 without hits
    pub async fn avg_latency(&self, service: &Service) -> Result<f64> {
        let hits = self.total_hits(service).await?;
        if hits == 0 {
            return Ok(0.0);
        }
        let sum = self.sum(service).await?;
        Ok(sum / hits as f64 * 1000.0)
    }

    /// "Online since ..." / "Offline since ...".
    ///
    /// The time is the start of the current streak: the first hit after the
    /// latest failure when online, the first failure after the latest hit
    /// when offline. A service with no matching record uses its creation time.
    pub async fn small_text(&self, service: &Service) -> Result<String> {
        let since = if service.online {
            let last_failure = self.db.latest_failure_at(service.id).await?;
            self.db.first_hit_after(service.id, last_failure).await?
        } else {
            let last_hit = self.db.latest_hit_at(service.id).await?;
            self.db.first_failure_after(service.id, last_hit).await?
        };

        Ok(status_text(
            service.online,
            since.unwrap_or(service.created_at),
        ))
    }

    /// Hourly average latency across the trailing window
    pub async fn latency_chart(&self, service: &Service) -> Result<Vec<ChartPoint>> {
        self.db
            .hourly_latency(service.id, self.window_start())
            .await
    }

    /// Services whose last check succeeded, across the whole registry
    pub async fn count_online(&self) -> Result<u64> {
        self.db.count_online().await
    }

    /// All status-view figures for one service
    pub async fn summary(&self, service: &Service) -> Result<ServiceSummary> {
        Ok(ServiceSummary {
            status_text: self.small_text(service).await?,
            online_24h: self.online24(service).await?,
            avg_uptime: self.avg_uptime(service).await?,
            total_hits: self.total_hits(service).await?,
            total_failures: self.total_failures(service).await?,
            avg_latency_ms: self.avg_latency(service).await?,
            chart: self.latency_chart(service).await?,
            service: service.clone(),
        })
    }
}
