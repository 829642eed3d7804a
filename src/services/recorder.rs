//! Outcome recorder - appends hits and failures to a service's history

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{FailureData, Service};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Append-only writer for check history.
///
/// Every call inserts exactly one row; nothing already recorded is touched.
#[derive(Clone)]
pub struct Recorder {
    db: Arc<Database>,
}

impl Recorder {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record a successful check. `latency` is in seconds.
    ///
    /// Returns `None` if the service was deleted before the write landed.
    pub async fn record_hit(&self, service_id: Uuid, latency: f64) -> Result<Option<Uuid>> {
        let id = self.db.insert_hit(service_id, latency, Utc::now()).await?;
        match id {
            Some(hit_id) => debug!(service_id = %service_id, hit_id = %hit_id, latency, "Hit recorded"),
            None => debug!(service_id = %service_id, "Service gone, hit discarded"),
        }
        Ok(id)
    }

    /// Record a failed check or any other issue against a service.
    ///
    /// Returns `None` if the service was deleted before the write landed.
    pub async fn record_failure(&self, service_id: Uuid, issue: &str) -> Result<Option<Uuid>> {
        let id = self.db.insert_failure(service_id, issue, Utc::now()).await?;
        match id {
            Some(failure_id) => {
                warn!(service_id = %service_id, failure_id = %failure_id, issue, "Failure recorded")
            }
            None => debug!(service_id = %service_id, "Service gone, failure discarded"),
        }
        Ok(id)
    }

    /// Log an issue found outside the probe path (for example by a
    /// response validator) against `service`.
    pub async fn create_service_failure(
        &self,
        service: &Service,
        failure: FailureData,
    ) -> Result<Uuid> {
        if failure.issue.trim().is_empty() {
            return Err(AppError::InvalidRequest("issue cannot be empty".into()));
        }

        self.record_failure(service.id, &failure.issue)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("service {}", service.id)))
    }
}
