//! Core types for safe-merge

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Platform configuration
///
/// Identifies the repository every platform call is made against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    /// Repository owner (user or organization)
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Custom host (None for github.com)
    pub host: Option<String>,
}

impl fmt::Display for PlatformConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host {
            Some(ref host) => write!(f, "{host}/{}/{}", self.owner, self.repo),
            None => write!(f, "{}/{}", self.owner, self.repo),
        }
    }
}

// =============================================================================
// Pull request state
// =============================================================================

/// PR state (open, closed, merged)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrState {
    /// PR is open and can be merged
    Open,
    /// PR was closed without merging
    Closed,
    /// PR was merged
    Merged,
}

impl fmt::Display for PrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Merged => write!(f, "merged"),
        }
    }
}

/// Conflict status as computed by GitHub (`mergeable` field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mergeable {
    /// No conflicts with the base branch
    Mergeable,
    /// Conflicts with the base branch
    Conflicting,
    /// Still being computed
    #[serde(other)]
    Unknown,
}

/// Merge readiness as computed by GitHub (`mergeStateStatus` field)
///
/// `Mergeable` is not a GitHub merge state; it stands for "the `mergeable`
/// field reports no conflicts" so it can be listed in a ready set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeStateStatus {
    /// Head ref is out of date with the base
    Behind,
    /// Blocked by branch protection
    Blocked,
    /// Mergeable with passing commit status
    Clean,
    /// Merge commit cannot be cleanly created
    Dirty,
    /// Blocked because the PR is a draft
    Draft,
    /// Mergeable with passing status and pre-receive hooks
    HasHooks,
    /// No conflicts reported by the `mergeable` field
    Mergeable,
    /// Mergeable with non-passing commit status
    Unstable,
    /// State cannot currently be determined
    #[serde(other)]
    Unknown,
}

impl MergeStateStatus {
    /// All states in their GraphQL spelling, for error messages
    pub const NAMES: &[&str] = &[
        "BEHIND", "BLOCKED", "CLEAN", "DIRTY", "DRAFT", "HAS_HOOKS", "MERGEABLE", "UNSTABLE",
        "UNKNOWN",
    ];

    /// GraphQL spelling of this state
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Behind => "BEHIND",
            Self::Blocked => "BLOCKED",
            Self::Clean => "CLEAN",
            Self::Dirty => "DIRTY",
            Self::Draft => "DRAFT",
            Self::HasHooks => "HAS_HOOKS",
            Self::Mergeable => "MERGEABLE",
            Self::Unstable => "UNSTABLE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for MergeStateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        match normalized.as_str() {
            "BEHIND" => Ok(Self::Behind),
            "BLOCKED" => Ok(Self::Blocked),
            "CLEAN" => Ok(Self::Clean),
            "DIRTY" => Ok(Self::Dirty),
            "DRAFT" => Ok(Self::Draft),
            "HAS_HOOKS" => Ok(Self::HasHooks),
            "MERGEABLE" => Ok(Self::Mergeable),
            "UNSTABLE" => Ok(Self::Unstable),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(format!(
                "unknown merge state '{s}' (expected one of: {})",
                Self::NAMES.join(", ")
            )),
        }
    }
}

/// Aggregate review decision on a PR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewDecision {
    /// Approved by the required reviewers
    Approved,
    /// Changes were requested
    ChangesRequested,
    /// A review is still required
    ReviewRequired,
}

impl fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approved => write!(f, "approved"),
            Self::ChangesRequested => write!(f, "changes requested"),
            Self::ReviewRequired => write!(f, "review required"),
        }
    }
}

/// Conclusion of a single status check, normalized across check runs and
/// commit statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckConclusion {
    /// Passed
    Success,
    /// Failed, errored, cancelled or timed out
    Failure,
    /// Completed without a verdict
    Neutral,
    /// Skipped
    Skipped,
    /// Queued, in progress or expected
    Pending,
}

impl CheckConclusion {
    /// Whether this conclusion lets a merge go ahead
    pub const fn is_green(self) -> bool {
        matches!(self, Self::Success | Self::Neutral | Self::Skipped)
    }
}

impl fmt::Display for CheckConclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Neutral => write!(f, "neutral"),
            Self::Skipped => write!(f, "skipped"),
            Self::Pending => write!(f, "pending"),
        }
    }
}

/// A status check attached to the PR head
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCheck {
    /// Check run name or commit status context
    pub name: String,
    /// Normalized conclusion
    pub conclusion: CheckConclusion,
}

/// Everything the orchestrator needs to know about a PR
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestStatus {
    /// PR number
    pub number: u64,
    /// PR title
    pub title: String,
    /// Web URL for the PR
    pub html_url: String,
    /// Current state of the PR
    pub state: PrState,
    /// Whether PR is a draft
    pub is_draft: bool,
    /// Conflict status
    pub mergeable: Mergeable,
    /// Merge readiness
    pub merge_state: MergeStateStatus,
    /// Review decision, if reviews are required at all
    pub review_decision: Option<ReviewDecision>,
    /// Head branch name
    pub head_ref: String,
    /// Base branch name
    pub base_ref: String,
    /// Whether the head branch lives in a fork
    pub is_cross_repository: bool,
    /// Status checks on the head commit
    pub checks: Vec<StatusCheck>,
}

// =============================================================================
// Branch protection
// =============================================================================

/// Required pull request reviews sub-rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequirement {
    /// Number of approving reviews required
    pub required_approving_review_count: u32,
    /// Dismiss approvals when new commits are pushed
    pub dismiss_stale_reviews: bool,
    /// Require review from code owners
    pub require_code_owner_reviews: bool,
}

/// A single required status check
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequiredCheck {
    /// Check context name
    pub context: String,
    /// App that must provide the check (`None` = any source)
    #[serde(
        default,
        serialize_with = "serialize_app_id",
        deserialize_with = "deserialize_app_id"
    )]
    pub app_id: Option<i64>,
}

/// GitHub's app id for "any source may set this check"
///
/// Omitting `app_id` on write pins the app that last reported the check.
const ANY_APP_ID: i64 = -1;

#[allow(clippy::ref_option)]
fn serialize_app_id<S: serde::Serializer>(app_id: &Option<i64>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_i64(app_id.unwrap_or(ANY_APP_ID))
}

fn deserialize_app_id<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(Option::<i64>::deserialize(d)?.filter(|&id| id != ANY_APP_ID))
}

impl RequiredCheck {
    /// A check that may be reported by any app
    pub fn any_app(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            app_id: None,
        }
    }
}

/// Required status checks sub-rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCheckRequirement {
    /// Require branches to be up to date before merging
    pub strict: bool,
    /// Checks that must pass
    pub checks: BTreeSet<RequiredCheck>,
}

/// Protection on a branch, as far as safe-merge reads and writes it
///
/// Each sub-rule is `None` when it is not enabled on the branch. An
/// unprotected branch is `BranchProtection::default()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchProtection {
    /// Review sub-rule
    pub required_pull_request_reviews: Option<ReviewRequirement>,
    /// Status check sub-rule
    pub required_status_checks: Option<StatusCheckRequirement>,
    /// Whether rules apply to administrators (read-only)
    pub enforce_admins: bool,
    /// Whether linear history is required (read-only)
    pub required_linear_history: bool,
}

impl BranchProtection {
    /// Whether neither mutable sub-rule is enabled
    pub const fn is_unprotected(&self) -> bool {
        self.required_pull_request_reviews.is_none() && self.required_status_checks.is_none()
    }
}

// =============================================================================
// Merging
// =============================================================================

/// Result of a merge operation
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// Whether the merge was successful
    pub merged: bool,
    /// The SHA of the merge commit (if successful)
    pub sha: Option<String>,
    /// Message from the merge operation (especially on failure)
    pub message: Option<String>,
}

/// Merge strategy/method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    /// Squash all commits into one
    #[default]
    Squash,
    /// Create a merge commit
    Merge,
    /// Rebase commits onto base branch
    Rebase,
}

impl fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Squash => write!(f, "squash"),
            Self::Merge => write!(f, "merge"),
            Self::Rebase => write!(f, "rebase"),
        }
    }
}

/// Progress of a single safe merge
///
/// Stages are ordered; a run only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum MergeStage {
    /// Nothing verified yet
    Init = 0,
    /// PR is open and all checks are green
    ChecksVerified = 1,
    /// Transient protection applied
    ProtectionsRelaxed = 2,
    /// Waiting for GitHub to report the PR as mergeable
    AwaitingMergeable = 3,
    /// Merge went through
    Merged = 4,
    /// Snapshot reapplied
    ProtectionsRestored = 5,
}

impl MergeStage {
    /// Inverse of `stage as u8`
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::ChecksVerified,
            2 => Self::ProtectionsRelaxed,
            3 => Self::AwaitingMergeable,
            4 => Self::Merged,
            5 => Self::ProtectionsRestored,
            _ => Self::Init,
        }
    }
}

impl fmt::Display for MergeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::ChecksVerified => write!(f, "checks verified"),
            Self::ProtectionsRelaxed => write!(f, "protections relaxed"),
            Self::AwaitingMergeable => write!(f, "awaiting mergeable"),
            Self::Merged => write!(f, "merged"),
            Self::ProtectionsRestored => write!(f, "protections restored"),
        }
    }
}
