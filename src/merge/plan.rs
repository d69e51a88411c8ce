//! Merge planning - pure functions for safe merges
//!
//! This module contains the pure, testable logic: precondition checks, the
//! transient protection derived from a snapshot, and the policies that drive
//! polling and restoration. No I/O happens here.

use crate::error::{Error, Result};
use crate::types::{
    BranchProtection, MergeMethod, MergeStateStatus, Mergeable, PrState, PullRequestStatus,
    RequiredCheck, ReviewRequirement, StatusCheck, StatusCheckRequirement,
};
use std::collections::BTreeSet;
use std::time::Duration;

/// Transient protection applied while the merge happens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaxedRules {
    /// Approving reviews required while relaxed
    pub required_approving_review_count: u32,
    /// Whether code owner review stays required
    pub require_code_owner_reviews: bool,
    /// Forced value for dismiss-stale-reviews; `None` keeps the snapshot's
    pub dismiss_stale_reviews: Option<bool>,
    /// Whether the branch must be up to date
    pub strict: bool,
    /// Checks that stay required
    pub checks: BTreeSet<RequiredCheck>,
}

impl Default for RelaxedRules {
    fn default() -> Self {
        Self {
            required_approving_review_count: 0,
            require_code_owner_reviews: false,
            dismiss_stale_reviews: None,
            strict: false,
            checks: BTreeSet::new(),
        }
    }
}

/// Which mergeability states count as "ready to merge"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Accepted states; `Mergeable` matches the `mergeable` field
    pub ready_states: BTreeSet<MergeStateStatus>,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            ready_states: BTreeSet::from([
                MergeStateStatus::Clean,
                MergeStateStatus::Unstable,
                MergeStateStatus::HasHooks,
            ]),
        }
    }
}

impl ReadinessPolicy {
    /// Check whether a PR is in an accepted state
    pub fn is_ready(&self, pr: &PullRequestStatus) -> bool {
        self.ready_states.contains(&pr.merge_state)
            || (self.ready_states.contains(&MergeStateStatus::Mergeable)
                && pr.mergeable == Mergeable::Mergeable)
    }

    /// Ready states joined for display
    pub fn describe(&self) -> String {
        self.ready_states
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Delay growth between poll attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay every time
    Fixed,
    /// Doubling delay, capped
    Exponential {
        /// Upper bound for a single delay
        max_delay: Duration,
    },
}

/// Bounded mergeability polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Maximum number of status fetches
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub interval: Duration,
    /// How the delay grows
    pub backoff: Backoff,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            interval: Duration::from_secs(2),
            backoff: Backoff::Fixed,
        }
    }
}

impl PollPolicy {
    /// Delay to wait after a failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { max_delay } => {
                let exponent = attempt.saturating_sub(1).min(16);
                self.interval
                    .saturating_mul(1 << exponent)
                    .min(max_delay.max(self.interval))
            }
        }
    }

    /// Upper bound on time spent sleeping across all attempts
    pub fn total_delay(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.delay_after(a)).sum()
    }
}

/// Retries for the restore step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestorePolicy {
    /// Extra attempts after the first failure
    pub retries: u32,
    /// Delay before each retry
    pub retry_delay: Duration,
}

impl Default for RestorePolicy {
    fn default() -> Self {
        Self {
            retries: 1,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Everything that shapes a safe merge besides the PR itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePolicy {
    /// Merge method
    pub method: MergeMethod,
    /// Delete the head branch after merging
    pub delete_branch: bool,
    /// Transient protection
    pub relax: RelaxedRules,
    /// Accepted mergeability states
    pub readiness: ReadinessPolicy,
    /// Poll bounds
    pub poll: PollPolicy,
    /// Restore retries
    pub restore: RestorePolicy,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            method: MergeMethod::Squash,
            delete_branch: true,
            relax: RelaxedRules::default(),
            readiness: ReadinessPolicy::default(),
            poll: PollPolicy::default(),
            restore: RestorePolicy::default(),
        }
    }
}

/// A reason the PR cannot go through a safe merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Blocker {
    /// PR is closed or merged
    NotOpen(PrState),
    /// PR is a draft
    Draft,
    /// Failing or pending checks, as `name (conclusion)`
    ChecksNotGreen(Vec<String>),
}

impl Blocker {
    /// Convert into the matching orchestration error
    pub fn into_error(self, pr_number: u64) -> Error {
        match self {
            Self::NotOpen(state) => Error::PrNotOpen { pr_number, state },
            Self::Draft => Error::PrIsDraft(pr_number),
            Self::ChecksNotGreen(failing) => Error::ChecksNotGreen { pr_number, failing },
        }
    }
}

impl std::fmt::Display for Blocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOpen(state) => write!(f, "PR is {state}"),
            Self::Draft => write!(f, "PR is a draft"),
            Self::ChecksNotGreen(failing) => {
                write!(f, "checks not green: {}", failing.join(", "))
            }
        }
    }
}

/// Whether every check passed, was neutral or was skipped
///
/// A PR without checks is green.
pub fn all_checks_green(checks: &[StatusCheck]) -> bool {
    checks.iter().all(|c| c.conclusion.is_green())
}

/// Offending checks formatted as `name (conclusion)`
pub fn failing_checks(checks: &[StatusCheck]) -> Vec<String> {
    checks
        .iter()
        .filter(|c| !c.conclusion.is_green())
        .map(|c| format!("{} ({})", c.name, c.conclusion))
        .collect()
}

/// Collect every reason this PR cannot be merged, in check order
pub fn find_blockers(pr: &PullRequestStatus) -> Vec<Blocker> {
    let mut blockers = Vec::new();
    if pr.state != PrState::Open {
        blockers.push(Blocker::NotOpen(pr.state));
    }
    if pr.is_draft {
        blockers.push(Blocker::Draft);
    }
    if !all_checks_green(&pr.checks) {
        blockers.push(Blocker::ChecksNotGreen(failing_checks(&pr.checks)));
    }
    blockers
}

/// Fail with the first blocker, if any
pub fn check_preconditions(pr: &PullRequestStatus) -> Result<()> {
    match find_blockers(pr).into_iter().next() {
        Some(blocker) => Err(blocker.into_error(pr.number)),
        None => Ok(()),
    }
}

/// Derive the transient protection from a snapshot
///
/// Only sub-rules enabled in the snapshot are relaxed; absent sub-rules stay
/// absent. Read-only fields are carried over untouched.
pub fn relaxed_protection(snapshot: &BranchProtection, rules: &RelaxedRules) -> BranchProtection {
    BranchProtection {
        required_pull_request_reviews: snapshot.required_pull_request_reviews.as_ref().map(
            |current| ReviewRequirement {
                required_approving_review_count: rules.required_approving_review_count,
                dismiss_stale_reviews: rules
                    .dismiss_stale_reviews
                    .unwrap_or(current.dismiss_stale_reviews),
                require_code_owner_reviews: rules.require_code_owner_reviews,
            },
        ),
        required_status_checks: snapshot.required_status_checks.as_ref().map(|_| {
            StatusCheckRequirement {
                strict: rules.strict,
                checks: rules.checks.clone(),
            }
        }),
        enforce_admins: snapshot.enforce_admins,
        required_linear_history: snapshot.required_linear_history,
    }
}

/// Safe merge plan - the functional core output
///
/// Describes what a safe merge of one PR would do. Created by
/// `plan_safe_merge()` (pure); the orchestrator and `--dry-run` both read it.
#[derive(Debug, Clone)]
pub struct SafeMergePlan {
    /// PR number
    pub pr_number: u64,
    /// PR title (for display)
    pub pr_title: String,
    /// Branch whose protection is relaxed
    pub base_branch: String,
    /// Branch deleted after merging, if any
    pub delete_head: Option<String>,
    /// Protection read before any mutation
    pub snapshot: BranchProtection,
    /// Protection applied while merging
    pub relaxed: BranchProtection,
    /// Merge method
    pub method: MergeMethod,
    /// Reasons the merge cannot proceed
    pub blockers: Vec<Blocker>,
}

impl SafeMergePlan {
    /// Whether the merge cannot proceed
    pub fn is_blocked(&self) -> bool {
        !self.blockers.is_empty()
    }

    /// Whether relaxing changes anything on the branch
    pub fn changes_protection(&self) -> bool {
        self.snapshot != self.relaxed
    }
}

/// Create a safe merge plan (PURE - no I/O, easily testable)
pub fn plan_safe_merge(
    pr: &PullRequestStatus,
    base_branch: &str,
    snapshot: &BranchProtection,
    policy: &MergePolicy,
) -> SafeMergePlan {
    // Branches in forks cannot be deleted from here
    let delete_head = (policy.delete_branch && !pr.is_cross_repository)
        .then(|| pr.head_ref.clone());

    SafeMergePlan {
        pr_number: pr.number,
        pr_title: pr.title.clone(),
        base_branch: base_branch.to_string(),
        delete_head,
        snapshot: snapshot.clone(),
        relaxed: relaxed_protection(snapshot, &policy.relax),
        method: policy.method,
        blockers: find_blockers(pr),
    }
}
