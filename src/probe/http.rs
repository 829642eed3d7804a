//! HTTP probe

use super::describe_error;
use crate::models::{Outcome, Service};
use regex::Regex;
use reqwest::{Client, Method};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    url: String,
    method: Method,
    expected_status: u16,
    expected_body: Option<Regex>,
}

impl HttpProbe {
    pub fn from_service(service: &Service, client: &Client) -> Result<Self, String> {
        let method = Method::from_bytes(service.method().to_ascii_uppercase().as_bytes())
            .map_err(|_| format!("invalid HTTP method '{}'", service.method))?;

        let expected_body = match service.expected.as_deref().map(str::trim) {
            Some(pattern) if !pattern.is_empty() => Some(
                Regex::new(pattern)
                    .map_err(|e| format!("invalid expected body pattern: {}", e))?,
            ),
            _ => None,
        };

        Ok(Self {
            client: client.clone(),
            url: service.domain.trim().to_string(),
            method,
            expected_status: service.expected_status(),
            expected_body,
        })
    }

    /// One request, timed from send until the body has been read
    pub async fn attempt(&self) -> Outcome {
        let started = Instant::now();

        let response = match self
            .client
            .request(self.method.clone(), &self.url)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return Outcome::failure(
                    format!("HTTP request failed: {}", describe_error(&e)),
                    started.elapsed(),
                    None,
                )
            }
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Outcome::failure(
                    format!("Failed to read HTTP response body: {}", describe_error(&e)),
                    started.elapsed(),
                    Some(status),
                )
            }
        };
        let latency = started.elapsed();

        if status != self.expected_status {
            return Outcome::failure(
                format!(
                    "HTTP status code {} did not match expected {}",
                    status, self.expected_status
                ),
                latency,
                Some(status),
            );
        }

        if let Some(pattern) = &self.expected_body {
            if !pattern.is_match(&body) {
                return Outcome::failure(
                    format!("HTTP response body did not match '{}'", pattern.as_str()),
                    latency,
                    Some(status),
                );
            }
        }

        Outcome::success(latency, Some(status))
    }
}
