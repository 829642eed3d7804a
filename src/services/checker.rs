//! Check dispatcher - runs the probe for a service and records what it saw

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{Outcome, Service};
use crate::probe::Probe;
use crate::routes::metrics::Metrics;
use crate::services::recorder::Recorder;
use futures_util::future::join_all;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of one check.
///
/// `service` carries the updated status fields even when `persist_error`
/// is set; only the history write failed in that case.
#[derive(Debug)]
pub struct CheckReport {
    pub service: Service,
    pub outcome: Outcome,
    pub persist_error: Option<AppError>,
}

impl CheckReport {
    /// The updated service, or the persistence error if there was one
    pub fn into_result(self) -> Result<Service> {
        match self.persist_error {
            Some(err) => Err(err),
            None => Ok(self.service),
        }
    }
}

/// Runs checks. Cheap to clone; clones share the HTTP client and the pool.
#[derive(Clone)]
pub struct Checker {
    db: Arc<Database>,
    recorder: Recorder,
    client: Client,
    metrics: Arc<Metrics>,
}

impl Checker {
    pub fn new(db: Arc<Database>, metrics: Arc<Metrics>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("upcheck/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            recorder: Recorder::new(Arc::clone(&db)),
            db,
            client,
            metrics,
        })
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Check `service` now.
    ///
    /// Probe problems (unreachable host, wrong status, timeout, bad
    /// configuration) end up as a failed outcome; they are never errors.
    pub async fn check(&self, mut service: Service) -> CheckReport {
        let outcome = match Probe::for_service(&service, &self.client) {
            Ok(probe) => probe.run(service.timeout_duration()).await,
            Err(issue) => {
                warn!(service_id = %service.id, issue = %issue, "Service misconfigured");
                Outcome::failure(format!("configuration error: {}", issue), Duration::ZERO, None)
            }
        };

        service.latency = outcome.latency_secs();
        service.last_status_code = outcome.status_code;
        service.online = outcome.success;

        self.metrics.inc_checks();
        let persist_error = match self.persist(&service, &outcome).await {
            Ok(()) => None,
            Err(e) => {
                self.metrics.inc_persist_errors();
                error!(service_id = %service.id, error = %e, "Failed to persist check result");
                Some(e)
            }
        };

        debug!(
            service_id = %service.id,
            name = %service.name,
            online = service.online,
            latency = service.latency,
            "Service checked"
        );

        CheckReport {
            service,
            outcome,
            persist_error,
        }
    }

    async fn persist(&self, service: &Service, outcome: &Outcome) -> Result<()> {
        if !self.db.update_service_status(service).await? {
            debug!(service_id = %service.id, "Service deleted while being checked");
            return Ok(());
        }

        if outcome.success {
            if self.recorder.record_hit(service.id, service.latency).await?.is_some() {
                self.metrics.inc_hits();
            }
        } else {
            let issue = outcome.issue.as_deref().unwrap_or("unknown failure");
            if self.recorder.record_failure(service.id, issue).await?.is_some() {
                self.metrics.inc_failures();
            }
        }

        Ok(())
    }

    /// Check every registered service concurrently, once
    pub async fn check_all(&self) -> Result<Vec<CheckReport>> {
        let services = self.db.select_all_services().await?;
        let count = services.len();

        let reports = join_all(services.into_iter().map(|service| self.check(service))).await;

        let online = reports.iter().filter(|r| r.service.online).count();
        info!(services = count, online = online, "Checked all services");
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewService;
    use crate::probe::TIMEOUT_ISSUE;
    use tokio::net::TcpListener;
    use uuid::Uuid;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup() -> (Arc<Database>, Checker) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let checker = Checker::new(Arc::clone(&db), Arc::new(Metrics::new())).unwrap();
        (db, checker)
    }

    async fn create(db: &Database, service: NewService) -> Service {
        let id = db.create_service(&service).await.unwrap();
        db.select_service(id).await.unwrap()
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_http_check_online() {
        let (db, checker) = setup().await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let service = create(&db, NewService::http("Google", server.uri())).await;
        let checked = checker.check(service).await.into_result().unwrap();

        assert_eq!(checked.name, "Google");
        assert!(checked.online);
        assert_eq!(checked.last_status_code, Some(200));
        assert!(checked.latency > 0.0);

        let stored = db.select_service(checked.id).await.unwrap();
        assert!(stored.online);
        assert_eq!(stored.last_status_code, Some(200));
        assert_eq!(db.hits(checked.id).await.unwrap().len(), 1);
        assert!(db.failures(checked.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_http_check_unreachable() {
        let (db, checker) = setup().await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut service = create(&db, NewService::http("Bad URL", server.uri())).await;
        let online = checker.check(service.clone()).await.into_result().unwrap();
        assert!(online.online);

        service.domain = format!("http://127.0.0.1:{}/iamnothere", closed_port().await);
        let service = db.update_service(&service).await.unwrap();
        let report = checker.check(service).await;

        assert!(report.persist_error.is_none());
        assert!(!report.service.online);
        assert_eq!(report.service.last_status_code, None);
        assert_eq!(report.service.latency, report.outcome.latency_secs());
        assert_ne!(report.service.latency, online.latency);

        let failures = db.failures(report.service.id).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].issue.starts_with("HTTP request failed"));
        assert_eq!(db.hits(report.service.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_http_check_timeout() {
        let (db, checker) = setup().await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let mut new = NewService::http("Slow", server.uri());
        new.timeout = 1;
        let service = create(&db, new).await;

        let report = checker.check(service).await;
        assert!(!report.service.online);
        assert!(report.service.latency >= 1.0);

        let failures = db.failures(report.service.id).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].issue, TIMEOUT_ISSUE);
    }

    #[tokio::test]
    async fn test_tcp_check_online_and_refused() {
        let (db, checker) = setup().await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while listener.accept().await.is_ok() {}
        });

        let service = create(&db, NewService::tcp("Local TCP", "127.0.0.1", port)).await;
        let checked = checker.check(service).await.into_result().unwrap();
        assert!(checked.online);
        assert!(checked.latency > 0.0);
        assert_eq!(checked.last_status_code, None);
        assert_eq!(db.hits(checked.id).await.unwrap().len(), 1);

        let refused = create(
            &db,
            NewService::tcp("Bad TCP", "127.0.0.1", closed_port().await),
        )
        .await;
        let checked = checker.check(refused).await.into_result().unwrap();
        assert!(!checked.online);
        assert_eq!(db.failures(checked.id).await.unwrap().len(), 1);
        assert!(db.hits(checked.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_misconfigured_service_is_a_failure() {
        let (db, checker) = setup().await;
        let mut service = create(&db, NewService::tcp("No port", "127.0.0.1", 1)).await;
        service.port = None;

        let report = checker.check(service).await;
        assert!(report.persist_error.is_none());
        assert!(!report.service.online);
        assert_eq!(report.service.latency, 0.0);

        let failures = db.failures(report.service.id).await.unwrap();
        assert_eq!(
            failures[0].issue,
            "configuration error: tcp service has no port configured"
        );
    }

    #[tokio::test]
    async fn test_unknown_type_is_a_failure() {
        let (db, checker) = setup().await;
        let mut service = create(&db, NewService::http("Gopher", "gopher://x")).await;
        service.service_type = "gopher".to_string();

        let report = checker.check(service).await;
        assert!(!report.service.online);
        assert_eq!(
            report.outcome.issue.as_deref(),
            Some("configuration error: unknown service type 'gopher'")
        );
    }

    #[tokio::test]
    async fn test_check_deleted_service_is_discarded() {
        let (db, checker) = setup().await;
        let service = create(&db, NewService::tcp("Gone", "127.0.0.1", closed_port().await)).await;
        db.delete_service(service.id).await.unwrap();

        let report = checker.check(service).await;
        assert!(report.persist_error.is_none());
        assert!(db.select_all_services().await.unwrap().is_empty());
        assert!(db.failures(report.service.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persist_error_keeps_status() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let metrics = Arc::new(Metrics::new());
        let checker = Checker::new(Arc::clone(&db), Arc::clone(&metrics)).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while listener.accept().await.is_ok() {}
        });

        let service = create(&db, NewService::tcp("Local TCP", "127.0.0.1", port)).await;
        db.pool().close().await;

        let report = checker.check(service).await;
        assert!(report.persist_error.is_some());
        assert!(report.service.online);
        assert!(report.service.latency > 0.0);
        assert_eq!(report.service.latency, report.outcome.latency_secs());

        let snapshot = metrics.get_metrics();
        assert_eq!(snapshot.checks_total, 1);
        assert_eq!(snapshot.persist_errors_total, 1);
        assert_eq!(snapshot.hits_recorded_total, 0);

        assert!(report.into_result().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_hits_are_all_recorded() {
        let (db, checker) = setup().await;
        let service = create(&db, NewService::tcp("Busy", "127.0.0.1", 1)).await;

        let ids = join_all(
            (0..16u32).map(|i| checker.recorder().record_hit(service.id, 0.01 * f64::from(i))),
        )
        .await;

        let ids: Vec<Uuid> = ids.into_iter().map(|id| id.unwrap().unwrap()).collect();
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 16);

        let hits = db.hits(service.id).await.unwrap();
        assert_eq!(hits.len(), 16);
        assert!(hits.iter().all(|hit| unique.contains(&hit.id)));
    }

    #[tokio::test]
    async fn test_check_all_runs_concurrently() {
        let (db, checker) = setup().await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        for i in 0..4 {
            create(&db, NewService::http(format!("svc-{}", i), server.uri())).await;
        }

        let started = std::time::Instant::now();
        let reports = checker.check_all().await.unwrap();

        assert_eq!(reports.len(), 4);
        assert!(reports.iter().all(|r| r.service.online));
        assert!(started.elapsed() < Duration::from_millis(1900));
        assert_eq!(db.count_online().await.unwrap(), 4);
    }
}
