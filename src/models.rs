//! Core domain models for upcheck

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Probe timeout used when a service is stored with `timeout = 0`.
pub const DEFAULT_TIMEOUT_SECS: u32 = 30;
/// Check interval used when a service is stored with `interval = 0`.
pub const DEFAULT_INTERVAL_SECS: u32 = 60;
/// Status code an HTTP service must answer with unless configured otherwise.
pub const DEFAULT_EXPECTED_STATUS: u16 = 200;
pub const DEFAULT_METHOD: &str = "GET";

/// Transport a service is checked over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Http,
    Tcp,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Http => "http",
            ServiceType::Tcp => "tcp",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(ServiceType::Http),
            "tcp" => Ok(ServiceType::Tcp),
            other => Err(format!("unknown service type '{}'", other)),
        }
    }
}

/// A monitored endpoint: its configuration plus the state observed by the
/// most recent check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    /// Assigned on creation, never changes
    pub id: Uuid,
    pub name: String,
    /// URL for HTTP services, host name or address for TCP services
    pub domain: String,
    /// Only used by TCP services
    pub port: Option<u16>,
    /// Kept as text so a bad stored value surfaces at check time
    pub service_type: String,
    pub method: String,
    pub expected_status: u16,
    /// Regular expression the HTTP response body must match
    pub expected: Option<String>,
    /// Seconds between checks
    pub interval: u32,
    /// Seconds a single probe may take
    pub timeout: u32,
    /// Result of the last check
    pub online: bool,
    /// Status code of the last HTTP response
    pub last_status_code: Option<u16>,
    /// Duration of the last probe, in seconds
    pub latency: f64,
    pub created_at: DateTime<Utc>,
}

impl Service {
    /// Parsed transport, `None` if the stored type is not recognised
    pub fn kind(&self) -> Option<ServiceType> {
        self.service_type.parse().ok()
    }

    pub fn timeout_duration(&self) -> Duration {
        match self.timeout {
            0 => Duration::from_secs(DEFAULT_TIMEOUT_SECS as u64),
            secs => Duration::from_secs(secs as u64),
        }
    }

    pub fn interval_duration(&self) -> Duration {
        match self.interval {
            0 => Duration::from_secs(DEFAULT_INTERVAL_SECS as u64),
            secs => Duration::from_secs(secs as u64),
        }
    }

    pub fn expected_status(&self) -> u16 {
        match self.expected_status {
            0 => DEFAULT_EXPECTED_STATUS,
            code => code,
        }
    }

    pub fn method(&self) -> &str {
        let method = self.method.trim();
        if method.is_empty() {
            DEFAULT_METHOD
        } else {
            method
        }
    }

    /// Check the configuration fields for values that can never be probed
    pub fn validate(&self) -> Result<(), String> {
        validate_config(&self.name, &self.domain, &self.service_type, self.port)
    }
}

/// Configuration for a service that does not exist yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewService {
    pub name: String,
    pub domain: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub service_type: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    #[serde(default)]
    pub expected: Option<String>,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default = "default_timeout")]
    pub timeout: u32,
}

fn default_method() -> String {
    DEFAULT_METHOD.to_string()
}

fn default_expected_status() -> u16 {
    DEFAULT_EXPECTED_STATUS
}

fn default_interval() -> u32 {
    DEFAULT_INTERVAL_SECS
}

fn default_timeout() -> u32 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for NewService {
    fn default() -> Self {
        Self {
            name: String::new(),
            domain: String::new(),
            port: None,
            service_type: ServiceType::Http.to_string(),
            method: default_method(),
            expected_status: DEFAULT_EXPECTED_STATUS,
            expected: None,
            interval: DEFAULT_INTERVAL_SECS,
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl NewService {
    /// HTTP service with default method and expected status
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: url.into(),
            ..Self::default()
        }
    }

    /// TCP service checked by connecting to `host:port`
    pub fn tcp(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            domain: host.into(),
            port: Some(port),
            service_type: ServiceType::Tcp.to_string(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_config(&self.name, &self.domain, &self.service_type, self.port)
    }
}

fn validate_config(
    name: &str,
    domain: &str,
    service_type: &str,
    port: Option<u16>,
) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("name cannot be empty".to_string());
    }
    if domain.trim().is_empty() {
        return Err("domain cannot be empty".to_string());
    }
    let kind: ServiceType = service_type.parse()?;
    if kind == ServiceType::Tcp && port.unwrap_or(0) == 0 {
        return Err("tcp services require a port".to_string());
    }
    Ok(())
}

/// One successful check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub id: Uuid,
    pub service_id: Uuid,
    /// Seconds
    pub latency: f64,
    pub created_at: DateTime<Utc>,
}

/// One failed check or externally reported issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub id: Uuid,
    pub service_id: Uuid,
    pub issue: String,
    pub created_at: DateTime<Utc>,
}

/// Payload for reporting a failure outside of a probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureData {
    pub issue: String,
}

/// Protocol-agnostic result of a single probe
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub success: bool,
    /// Set whenever an HTTP response was received
    pub status_code: Option<u16>,
    pub latency: Duration,
    pub issue: Option<String>,
}

impl Outcome {
    pub fn success(latency: Duration, status_code: Option<u16>) -> Self {
        Self {
            success: true,
            status_code,
            latency,
            issue: None,
        }
    }

    pub fn failure(issue: impl Into<String>, latency: Duration, status_code: Option<u16>) -> Self {
        Self {
            success: false,
            status_code,
            latency,
            issue: Some(issue.into()),
        }
    }

    /// Latency in seconds
    pub fn latency_secs(&self) -> f64 {
        self.latency.as_secs_f64()
    }
}

/// Average hit latency for one hour of history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub bucket: DateTime<Utc>,
    pub hits: i64,
    pub avg_latency_ms: f64,
}

/// Everything the status view shows for one service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSummary {
    pub service: Service,
    pub status_text: String,
    pub online_24h: f64,
    pub avg_uptime: String,
    pub total_hits: u64,
    pub total_failures: u64,
    pub avg_latency_ms: f64,
    pub chart: Vec<ChartPoint>,
}
