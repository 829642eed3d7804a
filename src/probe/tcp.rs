//! TCP connect probe

use crate::models::{Outcome, Service};
use std::time::Instant;
use tokio::net::TcpStream;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpProbe {
    host: String,
    port: u16,
}

impl TcpProbe {
    pub fn from_service(service: &Service) -> Result<Self, String> {
        let port = match service.port {
            Some(port) if port != 0 => port,
            _ => return Err("tcp service has no port configured".to_string()),
        };

        let host = host_of(&service.domain);
        if host.is_empty() {
            return Err("tcp service has no host configured".to_string());
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Open and immediately close a connection
    pub async fn attempt(&self) -> Outcome {
        let started = Instant::now();

        match TcpStream::connect((self.host.as_str(), self.port)).await {
            Ok(stream) => {
                let latency = started.elapsed();
                drop(stream);
                Outcome::success(latency, None)
            }
            Err(e) => Outcome::failure(
                format!("TCP connection to {}:{} failed: {}", self.host, self.port, e),
                started.elapsed(),
                None,
            ),
        }
    }
}

/// Accept `host`, `tcp://host`, `host/` or a bracketed IPv6 literal as the
/// domain of a TCP service
fn host_of(domain: &str) -> &str {
    let domain = domain.trim();
    let without_scheme = domain
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(domain);
    without_scheme
        .trim_end_matches('/')
        .trim_start_matches('[')
        .trim_end_matches(']')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::tests::service;
    use crate::probe::Probe;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_listening_port_is_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let probe = TcpProbe::from_service(&service("tcp", "127.0.0.1", Some(port))).unwrap();
        let outcome = Probe::Tcp(probe).run(Duration::from_secs(5)).await;

        assert!(outcome.success);
        assert_eq!(outcome.status_code, None);
        assert!(outcome.latency > Duration::ZERO);
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_refused_port_is_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = TcpProbe::from_service(&service("tcp", "127.0.0.1", Some(port))).unwrap();
        let outcome = probe.attempt().await;

        assert!(!outcome.success);
        assert_eq!(outcome.status_code, None);
        assert!(outcome
            .issue
            .unwrap()
            .starts_with(&format!("TCP connection to 127.0.0.1:{} failed", port)));
    }

    #[test]
    fn test_missing_port_is_config_error() {
        let err = TcpProbe::from_service(&service("tcp", "localhost", None)).unwrap_err();
        assert_eq!(err, "tcp service has no port configured");
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("8.8.8.8"), "8.8.8.8");
        assert_eq!(host_of("tcp://db.internal/"), "db.internal");
        assert_eq!(host_of("  localhost "), "localhost");
        assert_eq!(host_of("[::1]"), "::1");
        assert_eq!(host_of("tcp://[::1]/"), "::1");
    }

    #[tokio::test]
    async fn test_bracketed_ipv6_host() {
        let listener = match TcpListener::bind("[::1]:0").await {
            Ok(listener) => listener,
            // No IPv6 loopback on this host
            Err(_) => return,
        };
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        let probe = TcpProbe::from_service(&service("tcp", "[::1]", Some(port))).unwrap();
        let outcome = probe.attempt().await;

        assert!(outcome.success, "{:?}", outcome.issue);
        accept.await.unwrap().unwrap();
    }
}
