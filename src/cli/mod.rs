//! Command-line front end

mod context;
mod merge;
pub mod style;

pub use merge::run_merge;

use async_trait::async_trait;
use clap::Args;
use indicatif::ProgressBar;
use safe_merge::config::{PolicyOverrides, RepositoryOverrides};
use safe_merge::progress::ProgressCallback;
use safe_merge::types::{MergeMethod, MergeStage, MergeStateStatus};
use std::path::PathBuf;
use std::time::Duration;
use style::{Stylize, check, spinner_style};

/// Arguments for a safe merge
#[derive(Debug, Clone, Args)]
pub struct MergeArgs {
    /// Pull request number to merge
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub pr_number: u64,

    /// Repository owner
    #[arg(long, env = "SAFE_MERGE_OWNER")]
    pub owner: Option<String>,

    /// Repository name
    #[arg(long, env = "SAFE_MERGE_REPO")]
    pub repo: Option<String>,

    /// Branch whose protection is relaxed (defaults to the PR's base)
    #[arg(long = "base", env = "SAFE_MERGE_BASE", value_name = "BRANCH")]
    pub base_branch: Option<String>,

    /// GitHub Enterprise host
    #[arg(long, env = "GH_HOST")]
    pub host: Option<String>,

    /// GitHub REST API base URL (GraphQL is served at <URL>/graphql)
    #[arg(long, env = "SAFE_MERGE_API_URL", value_name = "URL")]
    pub api_url: Option<String>,

    /// Merge method
    #[arg(long)]
    pub method: Option<MergeMethod>,

    /// Keep the head branch after merging
    #[arg(long)]
    pub keep_branch: bool,

    /// Maximum mergeability polls
    #[arg(long, value_name = "N")]
    pub max_attempts: Option<u32>,

    /// Seconds between mergeability polls
    #[arg(long, value_name = "SECS")]
    pub poll_interval: Option<f64>,

    /// Mergeability state accepted as ready (repeatable)
    #[arg(long = "ready-state", value_name = "STATE")]
    pub ready_states: Vec<MergeStateStatus>,

    /// Config file (defaults to <config dir>/safe-merge/config.toml)
    #[arg(long, env = "SAFE_MERGE_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Show what would happen without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Preview the plan and prompt before merging
    #[arg(long)]
    pub confirm: bool,
}

impl MergeArgs {
    fn repository_overrides(&self) -> RepositoryOverrides {
        RepositoryOverrides {
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            host: self.host.clone(),
            slug: std::env::var("GITHUB_REPOSITORY")
                .ok()
                .filter(|slug| !slug.trim().is_empty()),
        }
    }

    fn policy_overrides(&self) -> PolicyOverrides {
        PolicyOverrides {
            method: self.method,
            keep_branch: self.keep_branch,
            max_attempts: self.max_attempts,
            poll_interval_secs: self.poll_interval,
            ready_states: self.ready_states.clone(),
        }
    }
}

/// Spinner-backed progress for the merge command
pub struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    /// Start the spinner
    pub fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(spinner_style());
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    /// Clear the spinner before printing the summary
    pub fn finish(&self) {
        self.spinner.finish_and_clear();
    }

    fn line(&self, text: &str) {
        self.spinner.suspend(|| anstream::println!("{text}"));
    }
}

impl Default for CliProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress line for a stage; restoration is reported in the summary instead
const fn stage_label(stage: MergeStage) -> Option<&'static str> {
    match stage {
        MergeStage::Init => Some("Started"),
        MergeStage::ChecksVerified => Some("Status checks green"),
        MergeStage::ProtectionsRelaxed => Some("Protection relaxed"),
        MergeStage::AwaitingMergeable => Some("Waiting for GitHub to report the PR mergeable"),
        MergeStage::Merged => Some("Merged"),
        MergeStage::ProtectionsRestored => None,
    }
}

#[async_trait]
impl ProgressCallback for CliProgress {
    async fn on_stage(&self, stage: MergeStage) {
        if let Some(label) = stage_label(stage) {
            self.line(&format!("{} {label}", check()));
        }
        if stage == MergeStage::AwaitingMergeable {
            self.spinner.set_message("Polling mergeability...");
        }
    }

    async fn on_poll(&self, attempt: u32, max_attempts: u32, status: MergeStateStatus) {
        self.spinner.set_message(format!(
            "Not mergeable yet ({}), attempt {attempt}/{max_attempts}",
            status.as_str()
        ));
    }

    async fn on_message(&self, message: &str) {
        self.spinner.set_message(format!("{message}..."));
    }

    async fn on_warning(&self, message: &str) {
        self.line(&format!("⚠️  {message}").warn());
    }
}
