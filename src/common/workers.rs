//! Offloading of CPU-bound fitting and blocking artifact I/O.
//!
//! Work runs on tokio's blocking pool so the async callers keep serving
//! other requests while a forest is fitted or an artifact is read.

use tokio::task;

use crate::common::error::{PipelineError, PipelineResult};

/// Run `job` on the blocking pool and surface its result.
///
/// A panicking job is reported as an internal error instead of unwinding
/// into the caller, so builds must keep the default `panic = "unwind"`.
pub async fn run_blocking<F, T>(job: F) -> PipelineResult<T>
where
    F: FnOnce() -> PipelineResult<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(job)
        .await
        .map_err(|e| PipelineError::internal(format!("blocking task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_job_result() {
        let value = run_blocking(|| Ok(21 * 2)).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn propagates_job_error() {
        let err = run_blocking::<_, ()>(|| Err(PipelineError::invalid("bad"))).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn panics_become_internal_errors() {
        let err = run_blocking::<_, ()>(|| panic!("boom")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Internal(_)));
    }
}
