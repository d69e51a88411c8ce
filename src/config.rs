//! Configuration file and policy resolution
//!
//! Settings are layered: built-in defaults, then the TOML config file, then
//! whatever the caller overrides (environment and CLI flags, applied by the
//! binary).

use crate::error::{Error, Result};
use crate::merge::{
    Backoff, MergePolicy, PollPolicy, ReadinessPolicy, RelaxedRules, RestorePolicy,
};
use crate::platform::parse_repo_slug;
use crate::types::{MergeMethod, MergeStateStatus, PlatformConfig, RequiredCheck};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Directory name under the platform config dir
const CONFIG_DIR: &str = "safe-merge";

/// Filename for the config file
const CONFIG_FILE: &str = "config.toml";

/// Contents of `config.toml`; every field is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// Repository defaults
    pub repository: RepositorySection,
    /// Merge settings
    pub merge: MergeSection,
    /// Mergeability polling
    pub poll: PollSection,
    /// Transient protection
    pub relax: RelaxSection,
    /// Restore retries
    pub restore: RestoreSection,
}

/// `[repository]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepositorySection {
    /// Repository owner
    pub owner: Option<String>,
    /// Repository name
    pub repo: Option<String>,
    /// Base branch override
    pub base_branch: Option<String>,
    /// GitHub Enterprise host
    pub host: Option<String>,
}

/// `[merge]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MergeSection {
    /// Merge method
    pub method: Option<MergeMethod>,
    /// Delete the head branch after merging
    pub delete_branch: Option<bool>,
}

/// Backoff names accepted in `[poll]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Fixed delay
    Fixed,
    /// Doubling delay
    Exponential,
}

/// `[poll]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollSection {
    /// Maximum status fetches
    pub max_attempts: Option<u32>,
    /// Delay between fetches, in seconds
    pub interval_secs: Option<f64>,
    /// Delay growth
    pub backoff: Option<BackoffKind>,
    /// Cap for exponential backoff, in seconds
    pub max_interval_secs: Option<f64>,
    /// Accepted mergeability states
    pub ready_states: Option<Vec<String>>,
}

/// `[relax]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelaxSection {
    /// Approving reviews required while relaxed
    pub required_approving_review_count: Option<u32>,
    /// Keep code owner review required
    pub require_code_owner_reviews: Option<bool>,
    /// Force dismiss-stale-reviews (absent = keep current value)
    pub dismiss_stale_reviews: Option<bool>,
    /// Keep up-to-date requirement
    pub strict: Option<bool>,
    /// Checks that stay required
    pub checks: Option<Vec<String>>,
}

/// `[restore]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RestoreSection {
    /// Retries after the first failed restore
    pub retries: Option<u32>,
    /// Delay before each retry, in seconds
    pub retry_delay_secs: Option<f64>,
}

/// Default config path (`<config dir>/safe-merge/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Load a config file
///
/// Returns the default config if the file doesn't exist.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(ConfigFile::default());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("failed to read config file {}: {e}", path.display()))
    })?;
    let config: ConfigFile = toml::from_str(&content)?;
    debug!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Parse a list of ready-state names
pub fn parse_ready_states<S: AsRef<str>>(names: &[S]) -> Result<BTreeSet<MergeStateStatus>> {
    if names.is_empty() {
        return Err(Error::Config("ready_states must not be empty".to_string()));
    }
    names
        .iter()
        .map(|n| n.as_ref().parse::<MergeStateStatus>().map_err(Error::Config))
        .collect()
}

fn seconds(value: f64, field: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| Error::Config(format!("{field} must be a non-negative number of seconds")))
}

impl ConfigFile {
    /// Build the merge policy described by this file on top of the defaults
    pub fn merge_policy(&self) -> Result<MergePolicy> {
        let defaults = MergePolicy::default();

        let max_attempts = self.poll.max_attempts.unwrap_or(defaults.poll.max_attempts);
        if max_attempts == 0 {
            return Err(Error::Config("poll.max_attempts must be at least 1".to_string()));
        }

        let interval = match self.poll.interval_secs {
            Some(secs) => seconds(secs, "poll.interval_secs")?,
            None => defaults.poll.interval,
        };

        let backoff = match self.poll.backoff {
            None | Some(BackoffKind::Fixed) => Backoff::Fixed,
            Some(BackoffKind::Exponential) => Backoff::Exponential {
                max_delay: match self.poll.max_interval_secs {
                    Some(secs) => seconds(secs, "poll.max_interval_secs")?,
                    None => interval.saturating_mul(8),
                },
            },
        };

        let readiness = match self.poll.ready_states {
            Some(ref names) => ReadinessPolicy {
                ready_states: parse_ready_states(names)?,
            },
            None => defaults.readiness,
        };

        let relax = RelaxedRules {
            required_approving_review_count: self
                .relax
                .required_approving_review_count
                .unwrap_or(defaults.relax.required_approving_review_count),
            require_code_owner_reviews: self
                .relax
                .require_code_owner_reviews
                .unwrap_or(defaults.relax.require_code_owner_reviews),
            dismiss_stale_reviews: self.relax.dismiss_stale_reviews,
            strict: self.relax.strict.unwrap_or(defaults.relax.strict),
            checks: self
                .relax
                .checks
                .as_ref()
                .map(|checks| checks.iter().map(RequiredCheck::any_app).collect())
                .unwrap_or_default(),
        };

        let restore = RestorePolicy {
            retries: self.restore.retries.unwrap_or(defaults.restore.retries),
            retry_delay: match self.restore.retry_delay_secs {
                Some(secs) => seconds(secs, "restore.retry_delay_secs")?,
                None => defaults.restore.retry_delay,
            },
        };

        Ok(MergePolicy {
            method: self.merge.method.unwrap_or(defaults.method),
            delete_branch: self.merge.delete_branch.unwrap_or(defaults.delete_branch),
            relax,
            readiness,
            poll: PollPolicy {
                max_attempts,
                interval,
                backoff,
            },
            restore,
        })
    }
}

/// Repository settings that take precedence over the config file
///
/// Filled from CLI flags (which clap also reads from `SAFE_MERGE_*`) and
/// `GITHUB_REPOSITORY`.
#[derive(Debug, Clone, Default)]
pub struct RepositoryOverrides {
    /// `--owner` / `SAFE_MERGE_OWNER`
    pub owner: Option<String>,
    /// `--repo` / `SAFE_MERGE_REPO`
    pub repo: Option<String>,
    /// `--host` / `GH_HOST`
    pub host: Option<String>,
    /// `GITHUB_REPOSITORY` (`owner/repo`)
    pub slug: Option<String>,
}

impl RepositoryOverrides {
    /// Whether owner and repo are both known without the config file or a remote
    pub const fn is_complete(&self) -> bool {
        (self.owner.is_some() && self.repo.is_some()) || self.slug.is_some()
    }
}

/// Resolve which repository to operate on
///
/// Each field is taken from the first layer that sets it: overrides, then
/// the `GITHUB_REPOSITORY` slug, then `[repository]`, then the detected git
/// remote.
pub fn resolve_repository(
    overrides: &RepositoryOverrides,
    file: &RepositorySection,
    remote: Option<&PlatformConfig>,
) -> Result<PlatformConfig> {
    let slug = overrides.slug.as_deref().map(parse_repo_slug).transpose()?;

    let owner = overrides
        .owner
        .clone()
        .or_else(|| slug.as_ref().map(|(owner, _)| owner.clone()))
        .or_else(|| file.owner.clone())
        .or_else(|| remote.map(|r| r.owner.clone()));
    let repo = overrides
        .repo
        .clone()
        .or_else(|| slug.as_ref().map(|(_, repo)| repo.clone()))
        .or_else(|| file.repo.clone())
        .or_else(|| remote.map(|r| r.repo.clone()));
    let host = overrides
        .host
        .clone()
        .or_else(|| file.host.clone())
        .or_else(|| remote.and_then(|r| r.host.clone()))
        .filter(|h| !h.is_empty());

    match (owner, repo) {
        (Some(owner), Some(repo)) => Ok(PlatformConfig { owner, repo, host }),
        _ => Err(Error::Config(
            "could not determine the repository; pass --owner and --repo, set \
             SAFE_MERGE_OWNER/SAFE_MERGE_REPO or GITHUB_REPOSITORY, or run inside a clone"
                .to_string(),
        )),
    }
}

/// Policy settings given on the command line
#[derive(Debug, Clone, Default)]
pub struct PolicyOverrides {
    /// `--method`
    pub method: Option<MergeMethod>,
    /// `--keep-branch`
    pub keep_branch: bool,
    /// `--max-attempts`
    pub max_attempts: Option<u32>,
    /// `--poll-interval`, in seconds
    pub poll_interval_secs: Option<f64>,
    /// `--ready-state` (repeatable); empty keeps the configured set
    pub ready_states: Vec<MergeStateStatus>,
}

impl PolicyOverrides {
    /// Apply on top of a policy built from the config file
    pub fn apply(&self, policy: &mut MergePolicy) -> Result<()> {
        if let Some(method) = self.method {
            policy.method = method;
        }
        if self.keep_branch {
            policy.delete_branch = false;
        }
        if let Some(max_attempts) = self.max_attempts {
            if max_attempts == 0 {
                return Err(Error::Usage("--max-attempts must be at least 1".to_string()));
            }
            policy.poll.max_attempts = max_attempts;
        }
        if let Some(secs) = self.poll_interval_secs {
            policy.poll.interval = Duration::try_from_secs_f64(secs).map_err(|_| {
                Error::Usage("--poll-interval must be a non-negative number of seconds".to_string())
            })?;
        }
        if !self.ready_states.is_empty() {
            policy.readiness = ReadinessPolicy {
                ready_states: self.ready_states.iter().copied().collect(),
            };
        }
        Ok(())
    }
}
