//! Progress reporting for long-running safe merges

use crate::types::{MergeStage, MergeStateStatus};
use async_trait::async_trait;

/// Receives progress while a safe merge runs
///
/// The CLI renders these with a spinner; tests use [`NoopProgress`].
#[async_trait]
pub trait ProgressCallback: Send + Sync {
    /// A new stage was reached
    async fn on_stage(&self, stage: MergeStage);

    /// A mergeability poll came back not ready
    async fn on_poll(&self, attempt: u32, max_attempts: u32, status: MergeStateStatus);

    /// Free-form status message
    async fn on_message(&self, message: &str);

    /// A best-effort step failed; the run continues
    async fn on_warning(&self, message: &str);
}

/// Progress callback that ignores everything
pub struct NoopProgress;

#[async_trait]
impl ProgressCallback for NoopProgress {
    async fn on_stage(&self, _stage: MergeStage) {}
    async fn on_poll(&self, _attempt: u32, _max_attempts: u32, _status: MergeStateStatus) {}
    async fn on_message(&self, _message: &str) {}
    async fn on_warning(&self, _message: &str) {}
}
