//! Platform services for GitHub
//!
//! Provides the narrow interface the safe-merge orchestrator needs: read a
//! PR, read and patch branch protection, merge, delete the head branch.

mod detection;
mod github;

pub use detection::{parse_remote_url, parse_repo_slug};
pub use github::GitHubService;

use crate::error::Result;
use crate::types::{
    BranchProtection, MergeMethod, MergeResult, PlatformConfig, PullRequestStatus,
    ReviewRequirement, StatusCheckRequirement,
};
use async_trait::async_trait;

/// Platform service trait for safe-merge operations
///
/// The orchestrator only talks to the hosting platform through this trait,
/// so tests drive it with an in-memory implementation.
#[async_trait]
pub trait PlatformService: Send + Sync {
    /// Get the current status of a PR, including mergeability and checks
    async fn get_pr_status(&self, pr_number: u64) -> Result<PullRequestStatus>;

    /// Read protection on a branch
    ///
    /// An unprotected branch yields `BranchProtection::default()`, not an error.
    async fn get_branch_protection(&self, branch: &str) -> Result<BranchProtection>;

    /// Replace the required pull request reviews sub-rule
    async fn update_review_requirement(
        &self,
        branch: &str,
        requirement: &ReviewRequirement,
    ) -> Result<()>;

    /// Replace the required status checks sub-rule
    async fn update_status_check_requirement(
        &self,
        branch: &str,
        requirement: &StatusCheckRequirement,
    ) -> Result<()>;

    /// Merge a PR with the specified method
    ///
    /// For squash merges, the PR title is used as commit title.
    async fn merge_pr(&self, pr_number: u64, method: MergeMethod) -> Result<MergeResult>;

    /// Delete a branch in the repository
    async fn delete_branch(&self, branch: &str) -> Result<()>;

    /// Get the platform configuration
    fn config(&self) -> &PlatformConfig;
}
