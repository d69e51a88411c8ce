//! Error types for safe-merge

use crate::types::{MergeStage, MergeStateStatus, PrState};
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in safe-merge
#[derive(Debug, Error)]
pub enum Error {
    /// Bad or missing command input
    #[error("usage error: {0}")]
    Usage(String),

    /// Invalid or incomplete configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Config file could not be parsed
    #[error("failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// No usable GitHub credentials
    #[error("authentication error: {0}")]
    Auth(String),

    /// GitHub REST/GraphQL call failed
    #[error("GitHub API error: {0}")]
    GitHubApi(String),

    /// Error surfaced by octocrab
    #[error("GitHub API error: {0}")]
    Octocrab(#[from] octocrab::Error),

    /// Generic platform failure (used by non-GitHub services and mocks)
    #[error("platform error: {0}")]
    Platform(String),

    /// PR is closed or already merged
    #[error("PR #{pr_number} is {state}, expected open")]
    PrNotOpen {
        /// PR number
        pr_number: u64,
        /// Observed state
        state: PrState,
    },

    /// PR is still a draft
    #[error("PR #{0} is a draft")]
    PrIsDraft(u64),

    /// At least one status check is failing or pending
    #[error("PR #{pr_number} has checks that are not green: {}", failing.join(", "))]
    ChecksNotGreen {
        /// PR number
        pr_number: u64,
        /// `name (conclusion)` for every offending check
        failing: Vec<String>,
    },

    /// Transient protection could not be applied
    #[error("failed to relax protection on '{branch}' for PR #{pr_number}: {message}")]
    RelaxFailed {
        /// PR number
        pr_number: u64,
        /// Base branch
        branch: String,
        /// Underlying API error
        message: String,
    },

    /// PR never reached an accepted mergeability state
    #[error(
        "PR #{pr_number} was not mergeable after {attempts} attempt(s) (last status: {last_status})"
    )]
    NotMergeableTimeout {
        /// PR number
        pr_number: u64,
        /// Poll attempts made
        attempts: u32,
        /// Last merge state observed
        last_status: MergeStateStatus,
    },

    /// Merge call failed or was rejected
    #[error("merge of PR #{pr_number} failed: {message}")]
    MergeFailed {
        /// PR number
        pr_number: u64,
        /// Underlying API error or rejection message
        message: String,
    },

    /// Snapshot could not be reapplied; protection may be left relaxed
    #[error(
        "failed to restore protection on '{branch}' after {attempts} attempt(s): {message}"
    )]
    RestoreFailed {
        /// Base branch
        branch: String,
        /// Restore attempts made
        attempts: u32,
        /// Last underlying API error
        message: String,
    },

    /// Run was cancelled (e.g. Ctrl-C)
    #[error("interrupted at stage '{stage}'")]
    Interrupted {
        /// Furthest stage reached before cancellation
        stage: MergeStage,
    },

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Process exit code for this error
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) | Self::Config(_) | Self::ConfigParse(_) => 2,
            Self::ChecksNotGreen { .. } | Self::PrNotOpen { .. } | Self::PrIsDraft(_) => 3,
            Self::NotMergeableTimeout { .. } => 4,
            Self::MergeFailed { .. } => 5,
            Self::RelaxFailed { .. } => 6,
            Self::RestoreFailed { .. } => 7,
            Self::Interrupted { .. } => 130,
            Self::Auth(_)
            | Self::GitHubApi(_)
            | Self::Octocrab(_)
            | Self::Platform(_)
            | Self::Internal(_) => 1,
        }
    }
}
