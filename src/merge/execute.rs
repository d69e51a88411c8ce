//! Safe merge execution - effectful operations
//!
//! Runs a single PR through check, snapshot, relax, poll, merge and restore.
//! Everything after the snapshot runs under a [`ProtectionGuard`], and the
//! guard's restore is awaited on every exit path: success, error, or
//! cancellation.

use crate::error::{Error, Result};
use crate::merge::plan::{
    MergePolicy, RestorePolicy, SafeMergePlan, check_preconditions, plan_safe_merge,
};
use crate::merge::poll::wait_until_mergeable;
use crate::platform::PlatformService;
use crate::progress::ProgressCallback;
use crate::types::{BranchProtection, MergeMethod, MergeStage};
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, error, info, warn};

/// What to merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeMergeRequest {
    /// PR number
    pub pr_number: u64,
    /// Branch whose protection is relaxed; defaults to the PR's base
    pub base_branch: Option<String>,
}

impl SafeMergeRequest {
    /// Merge into the PR's own base branch
    pub const fn new(pr_number: u64) -> Self {
        Self {
            pr_number,
            base_branch: None,
        }
    }
}

/// A completed merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// PR number
    pub pr_number: u64,
    /// Branch the PR was merged into
    pub base_branch: String,
    /// Merge method used
    pub method: MergeMethod,
    /// Merge commit SHA, when GitHub reports one
    pub sha: Option<String>,
    /// Mergeability polls it took
    pub poll_attempts: u32,
    /// Head branch that was deleted
    pub deleted_branch: Option<String>,
    /// Why deleting the head branch failed, if it did
    pub branch_delete_error: Option<String>,
}

/// How the restore step went
#[derive(Debug)]
pub enum RestoreStatus {
    /// Nothing was relaxed (no mutation phase or unprotected branch)
    NotNeeded,
    /// Snapshot reapplied
    Restored {
        /// Attempts it took (1 = first try)
        attempts: u32,
    },
    /// Snapshot could not be reapplied; protection may be left relaxed
    Failed(Error),
}

impl RestoreStatus {
    /// Whether protection may be left relaxed
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Full account of one safe merge
///
/// `outcome` is the merge result proper; `restore` is reported separately
/// so a restore failure never hides what happened to the merge.
#[derive(Debug)]
pub struct SafeMergeReport {
    /// PR number
    pub pr_number: u64,
    /// Furthest stage reached before cleanup
    pub stage: MergeStage,
    /// The plan, once the snapshot was read
    pub plan: Option<SafeMergePlan>,
    /// Success only if the merge went through
    pub outcome: Result<MergeOutcome>,
    /// Restoration status
    pub restore: RestoreStatus,
}

impl SafeMergeReport {
    /// Merge succeeded and protection is back to the snapshot
    pub const fn is_success(&self) -> bool {
        self.outcome.is_ok() && !self.restore.is_failed()
    }

    /// Process exit code: the merge error wins, then a restore failure
    pub const fn exit_code(&self) -> u8 {
        match (&self.outcome, &self.restore) {
            (Err(e), _) | (Ok(_), RestoreStatus::Failed(e)) => e.exit_code(),
            (Ok(_), _) => 0,
        }
    }

    /// Collapse into a single result, preferring the merge error
    pub fn into_result(self) -> Result<MergeOutcome> {
        match (self.outcome, self.restore) {
            (Err(e), _) | (Ok(_), RestoreStatus::Failed(e)) => Err(e),
            (Ok(outcome), _) => Ok(outcome),
        }
    }
}

/// Monotonic stage record that survives the in-flight step being dropped
struct StageTracker(AtomicU8);

impl StageTracker {
    const fn new() -> Self {
        Self(AtomicU8::new(MergeStage::Init as u8))
    }

    fn get(&self) -> MergeStage {
        MergeStage::from_u8(self.0.load(Ordering::SeqCst))
    }

    async fn advance(&self, stage: MergeStage, progress: &dyn ProgressCallback) {
        self.0.fetch_max(stage as u8, Ordering::SeqCst);
        info!(%stage, "safe merge stage");
        progress.on_stage(stage).await;
    }
}

/// Holds the snapshot while protection is relaxed
///
/// Must be consumed by [`ProtectionGuard::restore`]. Dropping it unrestored
/// (only possible by panicking) logs an error.
struct ProtectionGuard<'a> {
    platform: &'a dyn PlatformService,
    branch: String,
    snapshot: BranchProtection,
    settled: bool,
}

impl<'a> ProtectionGuard<'a> {
    fn new(platform: &'a dyn PlatformService, branch: String, snapshot: BranchProtection) -> Self {
        Self {
            platform,
            branch,
            snapshot,
            settled: false,
        }
    }

    /// Reapply the snapshot, retrying per policy
    async fn restore(
        mut self,
        policy: &RestorePolicy,
        progress: &dyn ProgressCallback,
    ) -> RestoreStatus {
        self.settled = true;

        if self.snapshot.is_unprotected() {
            debug!(branch = %self.branch, "branch unprotected, nothing to restore");
            return RestoreStatus::NotNeeded;
        }

        let max_attempts = policy.retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match apply_protection(self.platform, &self.branch, &self.snapshot).await {
                Ok(()) => {
                    info!(branch = %self.branch, attempt, "restored branch protection");
                    return RestoreStatus::Restored { attempts: attempt };
                }
                Err(e) => {
                    warn!(branch = %self.branch, attempt, error = %e, "restore attempt failed");
                    progress
                        .on_warning(&format!("Restore attempt {attempt} failed: {e}"))
                        .await;
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        tokio::time::sleep(policy.retry_delay).await;
                    }
                }
            }
        }

        error!(
            branch = %self.branch,
            snapshot = ?self.snapshot,
            "failed to restore branch protection; it may be left relaxed"
        );
        RestoreStatus::Failed(Error::RestoreFailed {
            branch: self.branch.clone(),
            attempts: max_attempts,
            message: last_error,
        })
    }
}

impl Drop for ProtectionGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            error!(
                branch = %self.branch,
                snapshot = ?self.snapshot,
                "protection guard dropped without restoring; branch protection may be left relaxed"
            );
        }
    }
}

/// Write every enabled sub-rule of `protection` to the branch
///
/// Both sub-rules are attempted even if the first fails.
async fn apply_protection(
    platform: &dyn PlatformService,
    branch: &str,
    protection: &BranchProtection,
) -> Result<()> {
    let mut failures = Vec::new();

    if let Some(ref reviews) = protection.required_pull_request_reviews
        && let Err(e) = platform.update_review_requirement(branch, reviews).await
    {
        failures.push(format!("reviews: {e}"));
    }

    if let Some(ref checks) = protection.required_status_checks
        && let Err(e) = platform.update_status_check_requirement(branch, checks).await
    {
        failures.push(format!("status checks: {e}"));
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::Platform(failures.join("; ")))
    }
}

/// Read-only phase: PR status, preconditions, snapshot
async fn gather(
    platform: &dyn PlatformService,
    request: &SafeMergeRequest,
    policy: &MergePolicy,
    progress: &dyn ProgressCallback,
    tracker: &StageTracker,
) -> Result<SafeMergePlan> {
    let pr = platform.get_pr_status(request.pr_number).await?;
    check_preconditions(&pr)?;
    tracker.advance(MergeStage::ChecksVerified, progress).await;

    let base_branch = request
        .base_branch
        .clone()
        .unwrap_or_else(|| pr.base_ref.clone());

    progress
        .on_message(&format!("Reading protection on {base_branch}"))
        .await;
    let snapshot = platform.get_branch_protection(&base_branch).await?;
    debug!(branch = %base_branch, snapshot = ?snapshot, "took protection snapshot");

    Ok(plan_safe_merge(&pr, &base_branch, &snapshot, policy))
}

/// Mutating phase: relax, wait for mergeability, merge
async fn relax_and_merge(
    platform: &dyn PlatformService,
    plan: &SafeMergePlan,
    policy: &MergePolicy,
    progress: &dyn ProgressCallback,
    tracker: &StageTracker,
) -> Result<MergeOutcome> {
    let pr_number = plan.pr_number;

    if plan.changes_protection() {
        progress
            .on_message(&format!("Relaxing protection on {}", plan.base_branch))
            .await;
        apply_protection(platform, &plan.base_branch, &plan.relaxed)
            .await
            .map_err(|e| Error::RelaxFailed {
                pr_number,
                branch: plan.base_branch.clone(),
                message: e.to_string(),
            })?;
    }
    tracker
        .advance(MergeStage::ProtectionsRelaxed, progress)
        .await;

    tracker
        .advance(MergeStage::AwaitingMergeable, progress)
        .await;
    let polled = wait_until_mergeable(
        platform,
        pr_number,
        &policy.readiness,
        &policy.poll,
        progress,
    )
    .await?;

    progress
        .on_message(&format!("Merging PR #{pr_number} ({})", plan.method))
        .await;
    let merge_result = match platform.merge_pr(pr_number, plan.method).await {
        Ok(result) if result.merged => result,
        Ok(result) => {
            return Err(Error::MergeFailed {
                pr_number,
                message: result
                    .message
                    .unwrap_or_else(|| "merge was not performed".to_string()),
            });
        }
        Err(e) => {
            return Err(Error::MergeFailed {
                pr_number,
                message: e.to_string(),
            });
        }
    };
    tracker.advance(MergeStage::Merged, progress).await;

    Ok(MergeOutcome {
        pr_number,
        base_branch: plan.base_branch.clone(),
        method: plan.method,
        sha: merge_result.sha,
        poll_attempts: polled.attempts,
        deleted_branch: None,
        branch_delete_error: None,
    })
}

/// Safely merge a PR (EFFECTFUL)
///
/// Equivalent to [`safe_merge_until`] with a cancellation that never fires.
pub async fn safe_merge(
    platform: &dyn PlatformService,
    request: &SafeMergeRequest,
    policy: &MergePolicy,
    progress: &dyn ProgressCallback,
) -> SafeMergeReport {
    safe_merge_until(platform, request, policy, progress, std::future::pending()).await
}

/// Safely merge a PR, stopping early when `cancel` resolves (EFFECTFUL)
///
/// # Arguments
/// * `platform` - Platform service for API calls
/// * `request` - PR number and optional base branch override
/// * `policy` - Relaxed rules, readiness, poll and restore policies
/// * `progress` - Progress callback for status updates
/// * `cancel` - Resolves when the run should stop (e.g. Ctrl-C)
///
/// # Returns
/// A `SafeMergeReport`. If `cancel` fires after the snapshot was taken, the
/// in-flight step is dropped, the outcome is `Error::Interrupted`, and the
/// snapshot is still restored.
pub async fn safe_merge_until<C>(
    platform: &dyn PlatformService,
    request: &SafeMergeRequest,
    policy: &MergePolicy,
    progress: &dyn ProgressCallback,
    cancel: C,
) -> SafeMergeReport
where
    C: Future<Output = ()> + Send,
{
    let pr_number = request.pr_number;
    let tracker = StageTracker::new();
    tokio::pin!(cancel);

    // =========================================================================
    // Phase 1: GATHER - no mutation, nothing to restore
    // =========================================================================

    let gathered = tokio::select! {
        biased;
        () = &mut cancel => Err(Error::Interrupted { stage: tracker.get() }),
        result = gather(platform, request, policy, progress, &tracker) => result,
    };

    let plan = match gathered {
        Ok(plan) => plan,
        Err(e) => {
            info!(pr_number, error = %e, "safe merge aborted before any mutation");
            return SafeMergeReport {
                pr_number,
                stage: tracker.get(),
                plan: None,
                outcome: Err(e),
                restore: RestoreStatus::NotNeeded,
            };
        }
    };

    // =========================================================================
    // Phase 2: MUTATE - relax, poll, merge under the guard
    // =========================================================================

    let guard = ProtectionGuard::new(platform, plan.base_branch.clone(), plan.snapshot.clone());

    let merged = tokio::select! {
        biased;
        () = &mut cancel => {
            warn!(pr_number, stage = %tracker.get(), "interrupted, restoring protection");
            Err(Error::Interrupted { stage: tracker.get() })
        }
        result = relax_and_merge(platform, &plan, policy, progress, &tracker) => result,
    };

    // =========================================================================
    // Phase 3: RESTORE - always
    // =========================================================================

    let stage = tracker.get();
    let restore = guard.restore(&policy.restore, progress).await;
    if matches!(restore, RestoreStatus::Restored { .. }) {
        progress.on_stage(MergeStage::ProtectionsRestored).await;
    }

    // =========================================================================
    // Phase 4: CLEANUP - best-effort head branch deletion
    // =========================================================================

    let outcome = match merged {
        Ok(mut outcome) => {
            if let Some(ref head) = plan.delete_head {
                match platform.delete_branch(head).await {
                    Ok(()) => outcome.deleted_branch = Some(head.clone()),
                    Err(e) => {
                        warn!(branch = %head, error = %e, "failed to delete head branch");
                        progress
                            .on_warning(&format!("Failed to delete branch {head}: {e}"))
                            .await;
                        outcome.branch_delete_error = Some(e.to_string());
                    }
                }
            }
            Ok(outcome)
        }
        Err(e) => {
            warn!(pr_number, %stage, error = %e, "safe merge failed");
            Err(e)
        }
    };

    SafeMergeReport {
        pr_number,
        stage,
        plan: Some(plan),
        outcome,
        restore,
    }
}
