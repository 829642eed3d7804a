//! Check engine: dispatch, history recording and statistics

pub mod checker;
pub mod recorder;
pub mod stats;

pub use checker::{CheckReport, Checker};
pub use recorder::Recorder;
pub use stats::Stats;
