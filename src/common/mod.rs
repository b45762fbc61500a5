//! Shared utilities that glue the different domains together.
pub mod config;
pub mod db;
pub mod error;
pub mod log;
pub mod time;
pub mod workers;

pub use error::{ErrorCode, PipelineError, PipelineResult};
