//! Protocol probes
//!
//! A probe is one timeout-bounded attempt to reach a service. Protocol
//! knowledge stays in here; callers only ever see an [`Outcome`].

pub mod http;
pub mod tcp;

use crate::models::{Outcome, Service, ServiceType};
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

pub use self::http::HttpProbe;
pub use self::tcp::TcpProbe;

/// Issue recorded when a probe does not finish before its deadline
pub const TIMEOUT_ISSUE: &str = "timeout";

/// A probe for one service, selected by the service type
#[derive(Debug, Clone)]
pub enum Probe {
    Http(HttpProbe),
    Tcp(TcpProbe),
}

impl Probe {
    /// Build the probe matching `service.service_type`.
    ///
    /// Returns a description of the configuration problem when the service
    /// cannot be probed at all.
    pub fn for_service(service: &Service, client: &Client) -> Result<Self, String> {
        match service.kind() {
            Some(ServiceType::Http) => HttpProbe::from_service(service, client).map(Probe::Http),
            Some(ServiceType::Tcp) => TcpProbe::from_service(service).map(Probe::Tcp),
            None => Err(format!("unknown service type '{}'", service.service_type)),
        }
    }

    pub fn service_type(&self) -> ServiceType {
        match self {
            Probe::Http(_) => ServiceType::Http,
            Probe::Tcp(_) => ServiceType::Tcp,
        }
    }

    /// Run the probe, giving up after `deadline`.
    ///
    /// An expired deadline drops the in-flight attempt and yields a failure
    /// with issue [`TIMEOUT_ISSUE`].
    pub async fn run(&self, deadline: Duration) -> Outcome {
        let started = Instant::now();

        let outcome = match timeout(deadline, self.attempt()).await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::failure(TIMEOUT_ISSUE, started.elapsed(), None),
        };

        debug!(
            kind = %self.service_type(),
            success = outcome.success,
            latency_ms = outcome.latency.as_millis() as u64,
            "Probe finished"
        );
        outcome
    }

    async fn attempt(&self) -> Outcome {
        match self {
            Probe::Http(probe) => probe.attempt().await,
            Probe::Tcp(probe) => probe.attempt().await,
        }
    }
}

/// Flatten an error and its sources into one line, e.g.
/// `error sending request: tcp connect error: Connection refused`.
pub(crate) fn describe_error(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
