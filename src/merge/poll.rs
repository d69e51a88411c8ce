//! Bounded polling for PR mergeability

use crate::error::{Error, Result};
use crate::merge::plan::{PollPolicy, ReadinessPolicy};
use crate::platform::PlatformService;
use crate::progress::ProgressCallback;
use crate::types::{MergeStateStatus, PrState, PullRequestStatus};
use tracing::{debug, warn};

/// A PR that reached an accepted mergeability state
#[derive(Debug, Clone)]
pub struct PollOutcome {
    /// Status that satisfied the readiness policy
    pub status: PullRequestStatus,
    /// Number of fetches it took (1-based)
    pub attempts: u32,
}

/// Re-fetch the PR until it is ready or the attempt budget runs out
///
/// Fetch errors count as a not-ready attempt. A PR that stops being open
/// while polling aborts immediately.
pub async fn wait_until_mergeable(
    platform: &dyn PlatformService,
    pr_number: u64,
    readiness: &ReadinessPolicy,
    poll: &PollPolicy,
    progress: &dyn ProgressCallback,
) -> Result<PollOutcome> {
    let max_attempts = poll.max_attempts.max(1);
    let mut last_status = MergeStateStatus::Unknown;

    for attempt in 1..=max_attempts {
        match platform.get_pr_status(pr_number).await {
            Ok(status) if status.state != PrState::Open => {
                return Err(Error::PrNotOpen {
                    pr_number,
                    state: status.state,
                });
            }
            Ok(status) if readiness.is_ready(&status) => {
                debug!(pr_number, attempt, merge_state = %status.merge_state, "PR is mergeable");
                return Ok(PollOutcome {
                    status,
                    attempts: attempt,
                });
            }
            Ok(status) => {
                debug!(pr_number, attempt, merge_state = %status.merge_state, "PR not mergeable yet");
                last_status = status.merge_state;
                progress.on_poll(attempt, max_attempts, status.merge_state).await;
            }
            Err(e) => {
                warn!(pr_number, attempt, error = %e, "failed to fetch PR status while polling");
                progress
                    .on_warning(&format!("Attempt {attempt}: failed to fetch PR status: {e}"))
                    .await;
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(poll.delay_after(attempt)).await;
        }
    }

    Err(Error::NotMergeableTimeout {
        pr_number,
        attempts: max_attempts,
        last_status,
    })
}
