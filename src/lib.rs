//! Episode pertinence pipeline: training, versioned artifacts and inference.
pub mod api;
pub mod common;
pub mod data;
pub mod evaluation;
pub mod inference;
pub mod session;
pub mod training;

pub use api::{ApiError, PertinenceService};
pub use common::{PipelineError, PipelineResult};
pub use session::Session;
