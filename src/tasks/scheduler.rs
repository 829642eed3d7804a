//! Scheduler task - keeps one check loop running per registered service

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::routes::metrics::Metrics;
use crate::services::Checker;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Delay before retrying a service whose record could not be read
const RETRY_DELAY: Duration = Duration::from_secs(30);

/// Missed reconcile rounds after which the scheduler counts as stalled
const STALE_SYNCS: u32 = 3;

/// Owns the per-service check loops.
///
/// Each loop re-reads its service before every check, so interval and
/// config edits apply from the next tick, and it exits on its own once the
/// service is deleted. Only one loop exists per service, so checks of the
/// same service never overlap.
#[derive(Clone)]
pub struct Scheduler {
    db: Arc<Database>,
    checker: Checker,
    metrics: Arc<Metrics>,
    sync_interval: Duration,
    last_sync: Arc<Mutex<Option<Instant>>>,
    loops: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
}

impl Scheduler {
    pub fn new(
        db: Arc<Database>,
        checker: Checker,
        metrics: Arc<Metrics>,
        sync_interval: Duration,
    ) -> Self {
        Self {
            db,
            checker,
            metrics,
            sync_interval,
            last_sync: Arc::new(Mutex::new(None)),
            loops: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a loop for `service_id` unless one is already running
    pub fn watch(&self, service_id: Uuid) -> bool {
        let mut loops = self.loops.lock();
        if loops.get(&service_id).is_some_and(|h| !h.is_finished()) {
            return false;
        }

        let handle = tokio::spawn(service_loop(
            Arc::clone(&self.db),
            self.checker.clone(),
            service_id,
        ));
        loops.insert(service_id, handle);
        self.metrics.set_services_scheduled(loops.len() as u64);
        true
    }

    /// Stop the loop for `service_id`, if any
    pub fn unwatch(&self, service_id: Uuid) -> bool {
        let mut loops = self.loops.lock();
        let removed = loops.remove(&service_id).map(|h| h.abort()).is_some();
        self.metrics.set_services_scheduled(loops.len() as u64);
        removed
    }

    /// Number of live loops
    pub fn scheduled(&self) -> usize {
        self.loops.lock().values().filter(|h| !h.is_finished()).count()
    }

    /// Reconcile running loops with the registry: start loops for new
    /// services, stop loops for removed ones. Returns the live loop count.
    pub async fn sync(&self) -> Result<usize> {
        let ids: HashSet<Uuid> = self
            .db
            .select_all_services()
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();

        {
            let mut loops = self.loops.lock();
            loops.retain(|id, handle| {
                if !ids.contains(id) {
                    handle.abort();
                    return false;
                }
                !handle.is_finished()
            });
        }

        let started = ids.iter().filter(|id| self.watch(**id)).count();
        let scheduled = self.scheduled();
        self.metrics.set_services_scheduled(scheduled as u64);
        *self.last_sync.lock() = Some(Instant::now());

        if started > 0 {
            info!(started = started, scheduled = scheduled, "Scheduled new services");
        }
        Ok(scheduled)
    }

    /// Time since the last successful reconcile, `None` before the first one
    pub fn since_last_sync(&self) -> Option<Duration> {
        self.last_sync.lock().map(|at| at.elapsed())
    }

    /// True once a reconcile has succeeded within the last few sync intervals
    pub fn is_healthy(&self) -> bool {
        self.since_last_sync()
            .is_some_and(|elapsed| elapsed <= self.sync_interval * STALE_SYNCS)
    }

    /// Stop every loop
    pub fn shutdown(&self) {
        let mut loops = self.loops.lock();
        for (_, handle) in loops.drain() {
            handle.abort();
        }
        self.metrics.set_services_scheduled(0);
    }

    /// Background task: reconcile with the registry every sync interval.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.sync_interval);

        info!(sync_interval_secs = self.sync_interval.as_secs(), "Scheduler started");

        loop {
            interval.tick().await;

            if let Err(e) = self.sync().await {
                error!(error = %e, "Failed to sync scheduled services");
            }
        }
    }
}

async fn service_loop(db: Arc<Database>, checker: Checker, service_id: Uuid) {
    debug!(service_id = %service_id, "Check loop started");

    loop {
        let service = match db.select_service(service_id).await {
            Ok(service) => service,
            Err(AppError::NotFound(_)) => {
                info!(service_id = %service_id, "Service removed, check loop stopped");
                return;
            }
            Err(e) => {
                error!(error = %e, service_id = %service_id, "Failed to load service");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };

        let interval = service.interval_duration();
        let report = checker.check(service).await;
        if let Some(e) = &report.persist_error {
            error!(error = %e, service_id = %service_id, "Check result not recorded");
        }

        tokio::time::sleep(interval).await;
    }
}
