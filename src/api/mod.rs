//! Public entry points used by the binary and embedding callers.

pub mod handlers;

pub use handlers::{ApiError, ApiResult, DeleteOutcome, PertinenceService};
