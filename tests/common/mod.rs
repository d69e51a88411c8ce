//! Shared test fixtures

#![allow(dead_code)]

pub mod mock_platform;

pub use mock_platform::{MergePrCall, MockPlatformService, ProtectionUpdate};

use safe_merge::merge::{MergePolicy, PollPolicy, RestorePolicy};
use safe_merge::types::{
    BranchProtection, CheckConclusion, MergeStateStatus, Mergeable, PlatformConfig, PrState,
    PullRequestStatus, RequiredCheck, ReviewRequirement, StatusCheck, StatusCheckRequirement,
};
use std::collections::BTreeSet;
use std::time::Duration;

/// Config for the test repository
pub fn github_config() -> PlatformConfig {
    PlatformConfig {
        owner: "acme".to_string(),
        repo: "widgets".to_string(),
        host: None,
    }
}

/// A status check
pub fn make_check(name: &str, conclusion: CheckConclusion) -> StatusCheck {
    StatusCheck {
        name: name.to_string(),
        conclusion,
    }
}

/// An open, non-draft PR from `feature-<n>` into `main` with green checks
pub fn make_pr_status(number: u64, merge_state: MergeStateStatus) -> PullRequestStatus {
    PullRequestStatus {
        number,
        title: format!("Feature {number}"),
        html_url: format!("https://github.com/acme/widgets/pull/{number}"),
        state: PrState::Open,
        is_draft: false,
        mergeable: Mergeable::Mergeable,
        merge_state,
        review_decision: None,
        head_ref: format!("feature-{number}"),
        base_ref: "main".to_string(),
        is_cross_repository: false,
        checks: vec![
            make_check("ci/build", CheckConclusion::Success),
            make_check("ci/lint", CheckConclusion::Skipped),
        ],
    }
}

/// Two approvals, code owners, stale dismissal and two strict checks
pub fn protected_main() -> BranchProtection {
    BranchProtection {
        required_pull_request_reviews: Some(ReviewRequirement {
            required_approving_review_count: 2,
            dismiss_stale_reviews: true,
            require_code_owner_reviews: true,
        }),
        required_status_checks: Some(StatusCheckRequirement {
            strict: true,
            checks: BTreeSet::from([
                RequiredCheck::any_app("ci/build"),
                RequiredCheck {
                    context: "ci/test".to_string(),
                    app_id: Some(15368),
                },
            ]),
        }),
        enforce_admins: true,
        required_linear_history: false,
    }
}

/// Only the review sub-rule, so relax and restore are one update each
pub fn reviews_only() -> BranchProtection {
    BranchProtection {
        required_pull_request_reviews: Some(ReviewRequirement {
            required_approving_review_count: 1,
            dismiss_stale_reviews: false,
            require_code_owner_reviews: false,
        }),
        ..Default::default()
    }
}

/// Default policy with every delay set to zero
pub fn fast_policy() -> MergePolicy {
    MergePolicy {
        poll: PollPolicy {
            interval: Duration::ZERO,
            ..Default::default()
        },
        restore: RestorePolicy {
            retry_delay: Duration::ZERO,
            ..Default::default()
        },
        ..Default::default()
    }
}
