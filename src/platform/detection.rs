//! Repository detection from slugs and git remote URLs

use crate::error::{Error, Result};
use crate::types::PlatformConfig;
use url::Url;

const GITHUB_HOST: &str = "github.com";

/// Parse an `owner/repo` slug (as found in `GITHUB_REPOSITORY`)
pub fn parse_repo_slug(slug: &str) -> Result<(String, String)> {
    let trimmed = slug.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    match trimmed.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(Error::Config(format!(
            "invalid repository '{slug}', expected owner/repo"
        ))),
    }
}

/// Parse a GitHub remote URL into a platform config
///
/// Accepts HTTPS (`https://github.com/o/r.git`), scp-like SSH
/// (`git@github.com:o/r.git`) and `ssh://` URLs. Hosts other than
/// github.com are kept as GitHub Enterprise hosts.
pub fn parse_remote_url(remote_url: &str) -> Result<PlatformConfig> {
    let remote_url = remote_url.trim();

    let (host, path) = if let Some((user_host, path)) = scp_like(remote_url) {
        let host = user_host.rsplit('@').next().unwrap_or(user_host);
        (host.to_string(), path.to_string())
    } else {
        let url = Url::parse(remote_url)
            .map_err(|e| Error::Config(format!("invalid remote URL '{remote_url}': {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Config(format!("remote URL '{remote_url}' has no host")))?;
        (host.to_string(), url.path().trim_start_matches('/').to_string())
    };

    let (owner, repo) = parse_repo_slug(&path)?;
    let host = (!host.eq_ignore_ascii_case(GITHUB_HOST)).then_some(host);

    Ok(PlatformConfig { owner, repo, host })
}

/// Split `user@host:path` remotes, which `Url` cannot parse
fn scp_like(remote_url: &str) -> Option<(&str, &str)> {
    if remote_url.contains("://") {
        return None;
    }
    let (user_host, path) = remote_url.split_once(':')?;
    user_host.contains('@').then_some((user_host, path))
}
