//! GitHub token discovery

use super::AuthSource;
use crate::error::{Error, Result};
use tokio::process::Command;
use tracing::debug;

/// Environment variables checked for a token, in order
const TOKEN_ENV_VARS: &[&str] = &["GH_TOKEN", "GITHUB_TOKEN"];

/// Resolved GitHub credentials
#[derive(Clone)]
pub struct GitHubAuthConfig {
    /// API token
    pub token: String,
    /// Where the token came from
    pub source: AuthSource,
    /// Host the token is for (None for github.com)
    pub host: Option<String>,
}

impl std::fmt::Debug for GitHubAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubAuthConfig")
            .field("token", &"<redacted>")
            .field("source", &self.source)
            .field("host", &self.host)
            .finish()
    }
}

/// Find a GitHub token
///
/// Checks `GH_TOKEN` and `GITHUB_TOKEN` first, then falls back to
/// `gh auth token` (with `--hostname` for enterprise hosts).
pub async fn get_github_auth(host: Option<&str>) -> Result<GitHubAuthConfig> {
    for var in TOKEN_ENV_VARS {
        if let Ok(token) = std::env::var(var)
            && !token.trim().is_empty()
        {
            debug!(var, "using GitHub token from environment");
            return Ok(GitHubAuthConfig {
                token: token.trim().to_string(),
                source: AuthSource::EnvVar,
                host: host.map(ToString::to_string),
            });
        }
    }

    let mut cmd = Command::new("gh");
    cmd.args(["auth", "token"]);
    if let Some(h) = host {
        cmd.args(["--hostname", h]);
    }

    let output = cmd.output().await.map_err(|e| {
        Error::Auth(format!(
            "no GH_TOKEN/GITHUB_TOKEN set and failed to run 'gh auth token': {e}"
        ))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Auth(format!(
            "no GH_TOKEN/GITHUB_TOKEN set and 'gh auth token' failed: {}",
            stderr.trim()
        )));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(Error::Auth(
            "'gh auth token' returned an empty token; run 'gh auth login'".to_string(),
        ));
    }

    debug!("using GitHub token from gh CLI");
    Ok(GitHubAuthConfig {
        token,
        source: AuthSource::Cli,
        host: host.map(ToString::to_string),
    })
}
