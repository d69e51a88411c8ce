//! Mock platform service for testing
//!
//! These are test utilities - not all may be used in current tests but are
//! available for future test development.

#![allow(dead_code)]

use async_trait::async_trait;
use safe_merge::error::{Error, Result};
use safe_merge::platform::PlatformService;
use safe_merge::types::{
    BranchProtection, MergeMethod, MergeResult, PlatformConfig, PullRequestStatus,
    ReviewRequirement, StatusCheckRequirement,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Call record for a protection write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtectionUpdate {
    /// `update_review_requirement`
    Reviews {
        branch: String,
        requirement: ReviewRequirement,
    },
    /// `update_status_check_requirement`
    Checks {
        branch: String,
        requirement: StatusCheckRequirement,
    },
}

/// Call record for `merge_pr`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePrCall {
    pub pr_number: u64,
    pub method: MergeMethod,
}

/// Window of protection writes (by call index) that fail
#[derive(Debug, Clone)]
struct UpdateFailure {
    skip: usize,
    count: usize,
    message: String,
}

/// Simple mock platform service for testing
///
/// This manually implements `PlatformService` rather than using a mocking
/// framework.
///
/// Features:
/// - Scripted PR status sequence (the last status repeats)
/// - In-memory branch protection that writes actually change
/// - Call tracking for verification
/// - Error injection for failure path testing
pub struct MockPlatformService {
    config: PlatformConfig,
    pr_statuses: Mutex<VecDeque<PullRequestStatus>>,
    protection: Mutex<HashMap<String, BranchProtection>>,
    merge_response: Mutex<Option<MergeResult>>,
    // Call tracking
    get_pr_status_calls: Mutex<Vec<u64>>,
    get_protection_calls: Mutex<Vec<String>>,
    protection_updates: Mutex<Vec<ProtectionUpdate>>,
    merge_pr_calls: Mutex<Vec<MergePrCall>>,
    delete_branch_calls: Mutex<Vec<String>>,
    // Error injection
    error_on_get_protection: Mutex<Option<String>>,
    update_failure: Mutex<Option<UpdateFailure>>,
    error_on_merge_pr: Mutex<Option<String>>,
    error_on_delete_branch: Mutex<Option<String>>,
    hang_on_merge: AtomicBool,
}

impl MockPlatformService {
    /// Create a new mock with the given config
    pub fn with_config(config: PlatformConfig) -> Self {
        Self {
            config,
            pr_statuses: Mutex::new(VecDeque::new()),
            protection: Mutex::new(HashMap::new()),
            merge_response: Mutex::new(None),
            get_pr_status_calls: Mutex::new(Vec::new()),
            get_protection_calls: Mutex::new(Vec::new()),
            protection_updates: Mutex::new(Vec::new()),
            merge_pr_calls: Mutex::new(Vec::new()),
            delete_branch_calls: Mutex::new(Vec::new()),
            error_on_get_protection: Mutex::new(None),
            update_failure: Mutex::new(None),
            error_on_merge_pr: Mutex::new(None),
            error_on_delete_branch: Mutex::new(None),
            hang_on_merge: AtomicBool::new(false),
        }
    }

    // === Setup ===

    /// Statuses returned by successive `get_pr_status` calls
    ///
    /// The last one keeps being returned once the others are used up.
    pub fn set_pr_statuses(&self, statuses: Vec<PullRequestStatus>) {
        *self.pr_statuses.lock().unwrap() = statuses.into();
    }

    /// Protection currently on `branch`
    pub fn set_protection(&self, branch: &str, protection: BranchProtection) {
        self.protection
            .lock()
            .unwrap()
            .insert(branch.to_string(), protection);
    }

    /// Response for `merge_pr` (defaults to a successful merge)
    pub fn set_merge_response(&self, result: MergeResult) {
        *self.merge_response.lock().unwrap() = Some(result);
    }

    // === Error injection methods ===

    /// Make `get_branch_protection` return an error
    pub fn fail_get_protection(&self, msg: &str) {
        *self.error_on_get_protection.lock().unwrap() = Some(msg.to_string());
    }

    /// Make protection writes fail, skipping the first `skip` calls and then
    /// failing the next `count`
    pub fn fail_protection_updates(&self, skip: usize, count: usize, msg: &str) {
        *self.update_failure.lock().unwrap() = Some(UpdateFailure {
            skip,
            count,
            message: msg.to_string(),
        });
    }

    /// Make `merge_pr` return an error
    pub fn fail_merge_pr(&self, msg: &str) {
        *self.error_on_merge_pr.lock().unwrap() = Some(msg.to_string());
    }

    /// Make `delete_branch` return an error
    pub fn fail_delete_branch(&self, msg: &str) {
        *self.error_on_delete_branch.lock().unwrap() = Some(msg.to_string());
    }

    /// Make `merge_pr` never complete
    pub fn hang_on_merge(&self) {
        self.hang_on_merge.store(true, Ordering::SeqCst);
    }

    // === Inspection ===

    /// Protection currently stored for `branch`
    pub fn protection_of(&self, branch: &str) -> BranchProtection {
        self.protection
            .lock()
            .unwrap()
            .get(branch)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_pr_status_calls(&self) -> Vec<u64> {
        self.get_pr_status_calls.lock().unwrap().clone()
    }

    pub fn get_protection_calls(&self) -> Vec<String> {
        self.get_protection_calls.lock().unwrap().clone()
    }

    pub fn protection_updates(&self) -> Vec<ProtectionUpdate> {
        self.protection_updates.lock().unwrap().clone()
    }

    pub fn merge_pr_calls(&self) -> Vec<MergePrCall> {
        self.merge_pr_calls.lock().unwrap().clone()
    }

    pub fn delete_branch_calls(&self) -> Vec<String> {
        self.delete_branch_calls.lock().unwrap().clone()
    }

    /// No protection write, merge or branch deletion happened
    pub fn assert_no_mutations(&self) {
        assert!(self.protection_updates().is_empty(), "protection was written");
        assert!(self.merge_pr_calls().is_empty(), "merge was attempted");
        assert!(self.delete_branch_calls().is_empty(), "branch was deleted");
    }

    /// Record a write and decide whether it fails
    fn record_update(&self, update: ProtectionUpdate) -> Result<()> {
        let mut updates = self.protection_updates.lock().unwrap();
        let index = updates.len();
        updates.push(update);

        if let Some(ref failure) = *self.update_failure.lock().unwrap()
            && index >= failure.skip
            && index < failure.skip + failure.count
        {
            return Err(Error::GitHubApi(failure.message.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformService for MockPlatformService {
    async fn get_pr_status(&self, pr_number: u64) -> Result<PullRequestStatus> {
        self.get_pr_status_calls.lock().unwrap().push(pr_number);

        let mut statuses = self.pr_statuses.lock().unwrap();
        let status = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        status.ok_or_else(|| Error::GitHubApi(format!("PR #{pr_number} not found")))
    }

    async fn get_branch_protection(&self, branch: &str) -> Result<BranchProtection> {
        self.get_protection_calls
            .lock()
            .unwrap()
            .push(branch.to_string());

        if let Some(ref msg) = *self.error_on_get_protection.lock().unwrap() {
            return Err(Error::GitHubApi(msg.clone()));
        }
        Ok(self.protection_of(branch))
    }

    async fn update_review_requirement(
        &self,
        branch: &str,
        requirement: &ReviewRequirement,
    ) -> Result<()> {
        self.record_update(ProtectionUpdate::Reviews {
            branch: branch.to_string(),
            requirement: requirement.clone(),
        })?;
        self.protection
            .lock()
            .unwrap()
            .entry(branch.to_string())
            .or_default()
            .required_pull_request_reviews = Some(requirement.clone());
        Ok(())
    }

    async fn update_status_check_requirement(
        &self,
        branch: &str,
        requirement: &StatusCheckRequirement,
    ) -> Result<()> {
        self.record_update(ProtectionUpdate::Checks {
            branch: branch.to_string(),
            requirement: requirement.clone(),
        })?;
        self.protection
            .lock()
            .unwrap()
            .entry(branch.to_string())
            .or_default()
            .required_status_checks = Some(requirement.clone());
        Ok(())
    }

    async fn merge_pr(&self, pr_number: u64, method: MergeMethod) -> Result<MergeResult> {
        self.merge_pr_calls
            .lock()
            .unwrap()
            .push(MergePrCall { pr_number, method });

        if self.hang_on_merge.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        if let Some(ref msg) = *self.error_on_merge_pr.lock().unwrap() {
            return Err(Error::GitHubApi(msg.clone()));
        }

        Ok(self
            .merge_response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| MergeResult {
                merged: true,
                sha: Some(format!("{pr_number:0>40}")),
                message: Some("Pull Request successfully merged".to_string()),
            }))
    }

    async fn delete_branch(&self, branch: &str) -> Result<()> {
        self.delete_branch_calls
            .lock()
            .unwrap()
            .push(branch.to_string());

        if let Some(ref msg) = *self.error_on_delete_branch.lock().unwrap() {
            return Err(Error::GitHubApi(msg.clone()));
        }
        Ok(())
    }

    fn config(&self) -> &PlatformConfig {
        &self.config
    }
}
