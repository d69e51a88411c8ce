//! Safe merge engine
//!
//! Three-phase pattern:
//! 1. Gather - fetch PR status and the protection snapshot (effectful, read-only)
//! 2. Plan - derive the relaxed protection and blockers (pure, testable)
//! 3. Execute - relax, poll, merge, and always restore (effectful)

mod execute;
mod plan;
mod poll;

pub use execute::{
    MergeOutcome, RestoreStatus, SafeMergeReport, SafeMergeRequest, safe_merge, safe_merge_until,
};
pub use plan::{
    Backoff, Blocker, MergePolicy, PollPolicy, ReadinessPolicy, RelaxedRules, RestorePolicy,
    SafeMergePlan, all_checks_green, check_preconditions, failing_checks, find_blockers,
    plan_safe_merge, relaxed_protection,
};
pub use poll::{PollOutcome, wait_until_mergeable};
