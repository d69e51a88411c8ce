//! GitHub platform service implementation

use crate::error::{Error, Result};
use crate::platform::PlatformService;
use crate::types::{
    BranchProtection, CheckConclusion, MergeMethod, MergeResult, MergeStateStatus, Mergeable,
    PlatformConfig, PrState, PullRequestStatus, RequiredCheck, ReviewDecision,
    ReviewRequirement, StatusCheck, StatusCheckRequirement,
};
use async_trait::async_trait;
use octocrab::Octocrab;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Default request timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const GITHUB_API_BASE: &str = "https://api.github.com";

const PR_STATUS_QUERY: &str = r"
    query PullRequestStatus($owner: String!, $repo: String!, $number: Int!, $after: String) {
        repository(owner: $owner, name: $repo) {
            pullRequest(number: $number) {
                number
                title
                url
                state
                isDraft
                mergeable
                mergeStateStatus
                reviewDecision
                headRefName
                baseRefName
                isCrossRepository
                commits(last: 1) {
                    nodes {
                        commit {
                            statusCheckRollup {
                                contexts(first: 100, after: $after) {
                                    pageInfo { hasNextPage endCursor }
                                    nodes {
                                        __typename
                                        ... on CheckRun { name status conclusion }
                                        ... on StatusContext { context state }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
";

// GraphQL response types for the PR status query

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
struct PrStatusData {
    repository: Option<RepositoryNode>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    pull_request: Option<GraphQlPullRequest>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlPullRequest {
    number: u64,
    title: String,
    url: String,
    state: PrState,
    is_draft: bool,
    mergeable: Mergeable,
    merge_state_status: MergeStateStatus,
    review_decision: Option<ReviewDecision>,
    head_ref_name: String,
    base_ref_name: String,
    is_cross_repository: bool,
    commits: Connection<CommitNode>,
}

#[derive(Deserialize)]
struct Connection<T> {
    nodes: Vec<T>,
}

#[derive(Deserialize)]
struct CommitNode {
    commit: Commit,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Commit {
    status_check_rollup: Option<StatusCheckRollup>,
}

#[derive(Deserialize)]
struct StatusCheckRollup {
    contexts: RollupConnection,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RollupConnection {
    #[serde(default)]
    page_info: PageInfo,
    nodes: Vec<RollupContext>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

/// A rollup entry is either a check run (Actions, apps) or a legacy commit status
#[derive(Deserialize)]
#[serde(tag = "__typename")]
enum RollupContext {
    CheckRun {
        name: String,
        status: String,
        conclusion: Option<String>,
    },
    StatusContext {
        context: String,
        state: String,
    },
}

impl RollupContext {
    fn into_status_check(self) -> StatusCheck {
        match self {
            Self::CheckRun {
                name,
                status,
                conclusion,
            } => StatusCheck {
                conclusion: check_run_conclusion(&status, conclusion.as_deref()),
                name,
            },
            Self::StatusContext { context, state } => StatusCheck {
                conclusion: status_context_conclusion(&state),
                name: context,
            },
        }
    }
}

impl GraphQlPullRequest {
    /// Take the rollup page of the head commit, if it has one
    fn take_rollup(&mut self) -> Option<RollupConnection> {
        self.commits
            .nodes
            .pop()
            .and_then(|node| node.commit.status_check_rollup)
            .map(|rollup| rollup.contexts)
    }

    fn into_status(self, contexts: Vec<RollupContext>) -> PullRequestStatus {
        let checks = contexts
            .into_iter()
            .map(RollupContext::into_status_check)
            .collect();

        PullRequestStatus {
            number: self.number,
            title: self.title,
            html_url: self.url,
            state: self.state,
            is_draft: self.is_draft,
            mergeable: self.mergeable,
            merge_state: self.merge_state_status,
            review_decision: self.review_decision,
            head_ref: self.head_ref_name,
            base_ref: self.base_ref_name,
            is_cross_repository: self.is_cross_repository,
            checks,
        }
    }
}

/// Normalize a check run: anything not completed is pending, and completed
/// runs without a passing conclusion count as failures.
fn check_run_conclusion(status: &str, conclusion: Option<&str>) -> CheckConclusion {
    if status != "COMPLETED" {
        return CheckConclusion::Pending;
    }
    match conclusion {
        Some("SUCCESS") => CheckConclusion::Success,
        Some("NEUTRAL") => CheckConclusion::Neutral,
        Some("SKIPPED") => CheckConclusion::Skipped,
        _ => CheckConclusion::Failure,
    }
}

fn status_context_conclusion(state: &str) -> CheckConclusion {
    match state {
        "SUCCESS" => CheckConclusion::Success,
        "PENDING" | "EXPECTED" => CheckConclusion::Pending,
        _ => CheckConclusion::Failure,
    }
}

// REST response types for branch protection

#[derive(Deserialize)]
struct ProtectionResponse {
    required_pull_request_reviews: Option<ReviewsResponse>,
    required_status_checks: Option<StatusChecksResponse>,
    enforce_admins: Option<EnabledFlag>,
    required_linear_history: Option<EnabledFlag>,
}

#[derive(Deserialize)]
struct ReviewsResponse {
    #[serde(default)]
    dismiss_stale_reviews: bool,
    #[serde(default)]
    require_code_owner_reviews: bool,
    #[serde(default)]
    required_approving_review_count: u32,
}

#[derive(Deserialize)]
struct StatusChecksResponse {
    #[serde(default)]
    strict: bool,
    #[serde(default)]
    contexts: Vec<String>,
    #[serde(default)]
    checks: Vec<RequiredCheck>,
}

#[derive(Deserialize)]
struct EnabledFlag {
    enabled: bool,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl From<ProtectionResponse> for BranchProtection {
    fn from(response: ProtectionResponse) -> Self {
        Self {
            required_pull_request_reviews: response.required_pull_request_reviews.map(|r| {
                ReviewRequirement {
                    required_approving_review_count: r.required_approving_review_count,
                    dismiss_stale_reviews: r.dismiss_stale_reviews,
                    require_code_owner_reviews: r.require_code_owner_reviews,
                }
            }),
            required_status_checks: response.required_status_checks.map(|s| {
                // Older protections only list contexts; newer ones list both
                let checks = if s.checks.is_empty() {
                    s.contexts.into_iter().map(RequiredCheck::any_app).collect()
                } else {
                    s.checks.into_iter().collect()
                };
                StatusCheckRequirement {
                    strict: s.strict,
                    checks,
                }
            }),
            enforce_admins: response.enforce_admins.is_some_and(|f| f.enabled),
            required_linear_history: response.required_linear_history.is_some_and(|f| f.enabled),
        }
    }
}

/// GitHub service using octocrab for merges and raw requests for the
/// protection and GraphQL endpoints
pub struct GitHubService {
    client: Octocrab,
    config: PlatformConfig,
    /// Token for raw HTTP requests
    token: String,
    /// HTTP client for raw requests
    http_client: Client,
    /// REST API base URL, without trailing slash
    api_base: String,
    /// GraphQL endpoint URL
    graphql_url: String,
}

impl GitHubService {
    /// Create a new GitHub service
    pub fn new(token: &str, owner: String, repo: String, host: Option<String>) -> Result<Self> {
        let (api_base, graphql_url) = host.as_ref().map_or_else(
            || (GITHUB_API_BASE.to_string(), format!("{GITHUB_API_BASE}/graphql")),
            |h| (format!("https://{h}/api/v3"), format!("https://{h}/api/graphql")),
        );

        Self::with_endpoints(
            token,
            PlatformConfig { owner, repo, host },
            api_base,
            graphql_url,
        )
    }

    /// Create a service talking to explicit endpoints (used for test servers)
    pub fn with_api_base(token: &str, config: PlatformConfig, api_base: &str) -> Result<Self> {
        let api_base = api_base.trim_end_matches('/').to_string();
        let graphql_url = format!("{api_base}/graphql");
        Self::with_endpoints(token, config, api_base, graphql_url)
    }

    fn with_endpoints(
        token: &str,
        config: PlatformConfig,
        api_base: String,
        graphql_url: String,
    ) -> Result<Self> {
        let client = Octocrab::builder()
            .personal_token(token.to_string())
            .base_uri(api_base.as_str())
            .map_err(|e| Error::GitHubApi(e.to_string()))?
            .build()
            .map_err(|e| Error::GitHubApi(e.to_string()))?;

        let http_client = Client::builder()
            .user_agent(concat!("safe-merge/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::GitHubApi(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            token: token.to_string(),
            http_client,
            api_base,
            graphql_url,
        })
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http_client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    fn protection_url(&self, branch: &str, sub_rule: &str) -> String {
        format!(
            "{}/repos/{}/{}/branches/{}/protection{sub_rule}",
            self.api_base,
            self.config.owner,
            self.config.repo,
            urlencoding::encode(branch)
        )
    }

    /// One page of the PR status query; `after` continues the check rollup
    async fn query_pr_status(
        &self,
        pr_number: u64,
        after: Option<&str>,
    ) -> Result<GraphQlPullRequest> {
        let payload = serde_json::json!({
            "query": PR_STATUS_QUERY,
            "variables": {
                "owner": self.config.owner,
                "repo": self.config.repo,
                "number": pr_number,
                "after": after,
            }
        });

        let response = self
            .send(
                self.request(Method::POST, &self.graphql_url).json(&payload),
                "Failed to query PR status",
            )
            .await?;

        if !response.status().is_success() {
            return Err(api_error("Failed to query PR status", response).await);
        }

        let response: GraphQlResponse<PrStatusData> = response
            .json()
            .await
            .map_err(|e| Error::GitHubApi(format!("Failed to parse PR status: {e}")))?;

        // Check for GraphQL errors
        if let Some(errors) = response.errors
            && !errors.is_empty()
        {
            let messages: Vec<_> = errors.into_iter().map(|e| e.message).collect();
            return Err(Error::GitHubApi(format!(
                "GraphQL error: {}",
                messages.join(", ")
            )));
        }

        response
            .data
            .and_then(|d| d.repository)
            .and_then(|r| r.pull_request)
            .ok_or_else(|| {
                Error::GitHubApi(format!(
                    "PR #{pr_number} not found in {}/{}",
                    self.config.owner, self.config.repo
                ))
            })
    }

    async fn send(&self, builder: RequestBuilder, context: &str) -> Result<Response> {
        builder
            .send()
            .await
            .map_err(|e| Error::GitHubApi(format!("{context}: {e}")))
    }
}

/// Build an error from a non-success response, preferring GitHub's message
async fn api_error(context: &str, response: Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.message)
        .unwrap_or(body);
    Error::GitHubApi(format!("{context}: {status} {message}"))
}

#[async_trait]
impl PlatformService for GitHubService {
    async fn get_pr_status(&self, pr_number: u64) -> Result<PullRequestStatus> {
        debug!(pr_number, "getting PR status");

        let mut pr = self.query_pr_status(pr_number, None).await?;
        let mut contexts = Vec::new();
        let mut page = pr.take_rollup();

        // Every check must be seen before the PR can be called green
        while let Some(connection) = page {
            contexts.extend(connection.nodes);
            if !connection.page_info.has_next_page {
                break;
            }
            let cursor = connection.page_info.end_cursor.ok_or_else(|| {
                Error::GitHubApi(format!(
                    "PR #{pr_number}: status check page has more entries but no cursor"
                ))
            })?;
            debug!(pr_number, fetched = contexts.len(), "fetching more status checks");
            page = self
                .query_pr_status(pr_number, Some(&cursor))
                .await?
                .take_rollup();
            if page.is_none() {
                return Err(Error::GitHubApi(format!(
                    "PR #{pr_number}: status checks changed while paging, retry"
                )));
            }
        }

        let status = pr.into_status(contexts);
        debug!(
            pr_number,
            state = %status.state,
            merge_state = %status.merge_state,
            checks = status.checks.len(),
            "got PR status"
        );
        Ok(status)
    }

    async fn get_branch_protection(&self, branch: &str) -> Result<BranchProtection> {
        debug!(branch, "reading branch protection");

        let url = self.protection_url(branch, "");
        let response = self
            .send(
                self.request(Method::GET, &url),
                "Failed to fetch branch protection",
            )
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            let err = api_error("Failed to fetch branch protection", response).await;
            // 404 also covers missing branches and missing permissions
            if err.to_string().contains("not protected") {
                debug!(branch, "branch is not protected");
                return Ok(BranchProtection::default());
            }
            return Err(err);
        }

        if !response.status().is_success() {
            return Err(api_error("Failed to fetch branch protection", response).await);
        }

        let protection: ProtectionResponse = response
            .json()
            .await
            .map_err(|e| Error::GitHubApi(format!("Failed to parse branch protection: {e}")))?;

        let protection = BranchProtection::from(protection);
        debug!(
            branch,
            reviews = protection.required_pull_request_reviews.is_some(),
            status_checks = protection.required_status_checks.is_some(),
            "read branch protection"
        );
        Ok(protection)
    }

    async fn update_review_requirement(
        &self,
        branch: &str,
        requirement: &ReviewRequirement,
    ) -> Result<()> {
        debug!(
            branch,
            count = requirement.required_approving_review_count,
            code_owners = requirement.require_code_owner_reviews,
            "updating review requirement"
        );

        let url = self.protection_url(branch, "/required_pull_request_reviews");
        let response = self
            .send(
                self.request(Method::PATCH, &url).json(requirement),
                "Failed to update review requirement",
            )
            .await?;

        if !response.status().is_success() {
            return Err(api_error("Failed to update review requirement", response).await);
        }

        debug!(branch, "updated review requirement");
        Ok(())
    }

    async fn update_status_check_requirement(
        &self,
        branch: &str,
        requirement: &StatusCheckRequirement,
    ) -> Result<()> {
        debug!(
            branch,
            strict = requirement.strict,
            checks = requirement.checks.len(),
            "updating status check requirement"
        );

        let url = self.protection_url(branch, "/required_status_checks");
        let response = self
            .send(
                self.request(Method::PATCH, &url).json(requirement),
                "Failed to update status check requirement",
            )
            .await?;

        if !response.status().is_success() {
            return Err(api_error("Failed to update status check requirement", response).await);
        }

        debug!(branch, "updated status check requirement");
        Ok(())
    }

    async fn merge_pr(&self, pr_number: u64, method: MergeMethod) -> Result<MergeResult> {
        debug!(pr_number, %method, "merging PR");

        let pulls = self.client.pulls(&self.config.owner, &self.config.repo);

        let octocrab_method = match method {
            MergeMethod::Squash => octocrab::params::pulls::MergeMethod::Squash,
            MergeMethod::Merge => octocrab::params::pulls::MergeMethod::Merge,
            MergeMethod::Rebase => octocrab::params::pulls::MergeMethod::Rebase,
        };

        // For squash, use PR title as commit title
        let result = if method == MergeMethod::Squash {
            let pr = pulls.get(pr_number).await?;
            let title = pr.title.unwrap_or_default();
            pulls
                .merge(pr_number)
                .method(octocrab_method)
                .title(format!("{title} (#{pr_number})"))
                .send()
                .await
        } else {
            pulls.merge(pr_number).method(octocrab_method).send().await
        }
        .map_err(|e| Error::GitHubApi(format!("Merge failed: {e}")))?;

        let merge_result = MergeResult {
            merged: result.merged,
            sha: result.sha,
            message: result.message,
        };

        debug!(
            pr_number,
            merged = merge_result.merged,
            sha = ?merge_result.sha,
            "merge complete"
        );
        Ok(merge_result)
    }

    async fn delete_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "deleting branch");

        // Ref paths keep their slashes; each segment may still hold `#`, `%` or `?`
        let ref_path = branch
            .split('/')
            .map(urlencoding::encode)
            .collect::<Vec<_>>()
            .join("/");
        let url = format!(
            "{}/repos/{}/{}/git/refs/heads/{ref_path}",
            self.api_base, self.config.owner, self.config.repo
        );
        let response = self
            .send(self.request(Method::DELETE, &url), "Failed to delete branch")
            .await?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let err = api_error("Failed to delete branch", response).await;
            if err.to_string().contains("Reference does not exist") {
                debug!(branch, "branch already deleted");
                return Ok(());
            }
            return Err(err);
        }

        if !response.status().is_success() {
            return Err(api_error("Failed to delete branch", response).await);
        }

        debug!(branch, "deleted branch");
        Ok(())
    }

    fn config(&self) -> &PlatformConfig {
        &self.config
    }
}
