//! Shared setup for the merge command
//!
//! Resolves configuration, the target repository and credentials, and builds
//! the platform service.

use crate::cli::MergeArgs;
use safe_merge::auth::get_github_auth;
use safe_merge::config::{ConfigFile, default_config_path, load_config, resolve_repository};
use safe_merge::error::Result;
use safe_merge::merge::MergePolicy;
use safe_merge::platform::{GitHubService, PlatformService, parse_remote_url};
use safe_merge::types::PlatformConfig;
use tokio::process::Command;
use tracing::debug;

/// Everything a merge needs, resolved once up front
pub struct CommandContext {
    /// Platform service for the resolved repository
    pub platform: Box<dyn PlatformService>,
    /// Merge policy: defaults, then config file, then CLI flags
    pub policy: MergePolicy,
    /// Base branch override, if any
    pub base_branch: Option<String>,
}

impl CommandContext {
    /// Resolve settings and authenticate
    ///
    /// Repository lookup order: flags and `SAFE_MERGE_*`, `GITHUB_REPOSITORY`,
    /// the config file, then the `origin` remote of the current directory.
    pub async fn new(args: &MergeArgs) -> Result<Self> {
        let config = match args.config.clone().or_else(default_config_path) {
            Some(path) => load_config(&path)?,
            None => ConfigFile::default(),
        };

        let mut policy = config.merge_policy()?;
        args.policy_overrides().apply(&mut policy)?;

        let overrides = args.repository_overrides();
        let file_has_repo = config.repository.owner.is_some() && config.repository.repo.is_some();
        let remote = if overrides.is_complete() || file_has_repo {
            None
        } else {
            detect_origin_remote().await
        };
        let platform_config = resolve_repository(&overrides, &config.repository, remote.as_ref())?;
        debug!(repository = %platform_config, "resolved repository");

        let auth = get_github_auth(platform_config.host.as_deref()).await?;
        debug!(source = ?auth.source, "found GitHub token");

        let platform = match args.api_url {
            Some(ref api_url) => {
                GitHubService::with_api_base(&auth.token, platform_config, api_url)?
            }
            None => GitHubService::new(
                &auth.token,
                platform_config.owner,
                platform_config.repo,
                platform_config.host,
            )?,
        };

        Ok(Self {
            platform: Box::new(platform),
            policy,
            base_branch: args
                .base_branch
                .clone()
                .or_else(|| config.repository.base_branch.clone()),
        })
    }
}

/// Repository of the `origin` remote, if we're inside a git clone
async fn detect_origin_remote() -> Option<PlatformConfig> {
    let output = Command::new("git")
        .args(["remote", "get-url", "origin"])
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        debug!("no origin remote in current directory");
        return None;
    }

    let url = String::from_utf8_lossy(&output.stdout);
    match parse_remote_url(url.trim()) {
        Ok(config) => Some(config),
        Err(e) => {
            debug!(error = %e, "origin remote is not a GitHub repository");
            None
        }
    }
}
