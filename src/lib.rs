//! upcheck library exports
//!
//! Probes HTTP and TCP services, records every check as a hit or a failure,
//! and derives uptime statistics from that history.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod probe;
pub mod routes;
pub mod services;
pub mod state;
pub mod tasks;

pub use config::Config;
pub use db::Database;
pub use error::{AppError, Result};
pub use models::{Failure, FailureData, Hit, NewService, Outcome, Service, ServiceType};
pub use services::{CheckReport, Checker, Recorder, Stats};
