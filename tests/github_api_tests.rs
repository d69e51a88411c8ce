//! GitHub service tests against a local HTTP server

mod common;

use common::github_config;
use mockito::{Matcher, Server, ServerGuard};
use safe_merge::error::Error;
use safe_merge::platform::{GitHubService, PlatformService};
use safe_merge::types::{
    BranchProtection, CheckConclusion, MergeStateStatus, Mergeable, PrState, RequiredCheck,
    ReviewDecision, ReviewRequirement, StatusCheckRequirement,
};
use serde_json::json;
use std::collections::BTreeSet;

const PROTECTION_PATH: &str = "/repos/acme/widgets/branches/main/protection";

async fn service(server: &ServerGuard) -> GitHubService {
    GitHubService::with_api_base("test-token", github_config(), &server.url()).unwrap()
}

// =============================================================================
// PR status (GraphQL)
// =============================================================================

#[tokio::test]
async fn test_get_pr_status_parses_rollup() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/graphql")
        .match_header("authorization", "Bearer test-token")
        .match_body(Matcher::PartialJson(json!({
            "variables": { "owner": "acme", "repo": "widgets", "number": 5 }
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "data": { "repository": { "pullRequest": {
                    "number": 5,
                    "title": "Add widgets",
                    "url": "https://github.com/acme/widgets/pull/5",
                    "state": "OPEN",
                    "isDraft": false,
                    "mergeable": "MERGEABLE",
                    "mergeStateStatus": "BLOCKED",
                    "reviewDecision": "REVIEW_REQUIRED",
                    "headRefName": "feature-5",
                    "baseRefName": "main",
                    "isCrossRepository": false,
                    "commits": { "nodes": [ { "commit": { "statusCheckRollup": {
                        "contexts": { "nodes": [
                            {
                                "__typename": "CheckRun",
                                "name": "build",
                                "status": "COMPLETED",
                                "conclusion": "SUCCESS"
                            },
                            {
                                "__typename": "CheckRun",
                                "name": "docs",
                                "status": "COMPLETED",
                                "conclusion": "SKIPPED"
                            },
                            {
                                "__typename": "StatusContext",
                                "context": "ci/legacy",
                                "state": "PENDING"
                            }
                        ] }
                    } } } ] }
                } } }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let status = service(&server).await.get_pr_status(5).await.unwrap();

    mock.assert_async().await;
    assert_eq!(status.number, 5);
    assert_eq!(status.state, PrState::Open);
    assert_eq!(status.mergeable, Mergeable::Mergeable);
    assert_eq!(status.merge_state, MergeStateStatus::Blocked);
    assert_eq!(status.review_decision, Some(ReviewDecision::ReviewRequired));
    assert_eq!(status.base_ref, "main");
    assert_eq!(
        status
            .checks
            .iter()
            .map(|c| (c.name.as_str(), c.conclusion))
            .collect::<Vec<_>>(),
        vec![
            ("build", CheckConclusion::Success),
            ("docs", CheckConclusion::Skipped),
            ("ci/legacy", CheckConclusion::Pending),
        ]
    );
}

#[tokio::test]
async fn test_get_pr_status_without_rollup_has_no_checks() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/graphql")
        .with_status(200)
        .with_body(
            json!({
                "data": { "repository": { "pullRequest": {
                    "number": 9,
                    "title": "Docs",
                    "url": "https://github.com/acme/widgets/pull/9",
                    "state": "OPEN",
                    "isDraft": true,
                    "mergeable": "UNKNOWN",
                    "mergeStateStatus": "SOMETHING_NEW",
                    "reviewDecision": null,
                    "headRefName": "docs",
                    "baseRefName": "main",
                    "isCrossRepository": true,
                    "commits": { "nodes": [ { "commit": { "statusCheckRollup": null } } ] }
                } } }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let status = service(&server).await.get_pr_status(9).await.unwrap();

    assert!(status.checks.is_empty());
    assert!(status.is_draft);
    assert!(status.is_cross_repository);
    assert_eq!(status.merge_state, MergeStateStatus::Unknown);
    assert_eq!(status.review_decision, None);
}

#[tokio::test]
async fn test_get_pr_status_surfaces_graphql_errors() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/graphql")
        .with_status(200)
        .with_body(
            json!({
                "data": { "repository": { "pullRequest": null } },
                "errors": [ { "message": "Could not resolve to a PullRequest with the number of 404." } ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let err = service(&server).await.get_pr_status(404).await.unwrap_err();

    match err {
        Error::GitHubApi(msg) => assert!(msg.contains("Could not resolve")),
        other => panic!("expected GitHubApi error, got {other:?}"),
    }
}

/// PR #5 status page with the given rollup connection
fn pr_status_page(contexts: &serde_json::Value) -> String {
    json!({
        "data": { "repository": { "pullRequest": {
            "number": 5,
            "title": "Add widgets",
            "url": "https://github.com/acme/widgets/pull/5",
            "state": "OPEN",
            "isDraft": false,
            "mergeable": "MERGEABLE",
            "mergeStateStatus": "BLOCKED",
            "reviewDecision": "REVIEW_REQUIRED",
            "headRefName": "feature-5",
            "baseRefName": "main",
            "isCrossRepository": false,
            "commits": { "nodes": [ { "commit": { "statusCheckRollup": {
                "contexts": contexts
            } } } ] }
        } } }
    })
    .to_string()
}

fn passing_runs(count: usize) -> Vec<serde_json::Value> {
    (0..count)
        .map(|i| {
            json!({
                "__typename": "CheckRun",
                "name": format!("shard-{i}"),
                "status": "COMPLETED",
                "conclusion": "SUCCESS"
            })
        })
        .collect()
}

#[tokio::test]
async fn test_get_pr_status_follows_check_pages() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("POST", "/graphql")
        .match_body(Matcher::PartialJson(json!({ "variables": { "after": null } })))
        .with_status(200)
        .with_body(pr_status_page(&json!({
            "pageInfo": { "hasNextPage": true, "endCursor": "cursor-100" },
            "nodes": passing_runs(100)
        })))
        .create_async()
        .await;
    let second = server
        .mock("POST", "/graphql")
        .match_body(Matcher::PartialJson(json!({ "variables": { "after": "cursor-100" } })))
        .with_status(200)
        .with_body(pr_status_page(&json!({
            "pageInfo": { "hasNextPage": false, "endCursor": "cursor-101" },
            "nodes": [ {
                "__typename": "CheckRun",
                "name": "integration",
                "status": "COMPLETED",
                "conclusion": "FAILURE"
            } ]
        })))
        .create_async()
        .await;

    let status = service(&server).await.get_pr_status(5).await.unwrap();

    first.assert_async().await;
    second.assert_async().await;
    assert_eq!(status.checks.len(), 101);
    let last = status.checks.last().unwrap();
    assert_eq!(last.name, "integration");
    assert_eq!(last.conclusion, CheckConclusion::Failure);
}

#[tokio::test]
async fn test_get_pr_status_fails_when_check_pages_cannot_continue() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/graphql")
        .with_status(200)
        .with_body(pr_status_page(&json!({
            "pageInfo": { "hasNextPage": true, "endCursor": null },
            "nodes": passing_runs(100)
        })))
        .create_async()
        .await;

    let err = service(&server).await.get_pr_status(5).await.unwrap_err();

    assert!(matches!(err, Error::GitHubApi(ref msg) if msg.contains("no cursor")));
}

// =============================================================================
// Branch protection
// =============================================================================

#[tokio::test]
async fn test_get_branch_protection_reads_both_sub_rules() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", PROTECTION_PATH)
        .with_status(200)
        .with_body(
            json!({
                "url": "https://api.github.com/repos/acme/widgets/branches/main/protection",
                "required_pull_request_reviews": {
                    "dismiss_stale_reviews": true,
                    "require_code_owner_reviews": false,
                    "required_approving_review_count": 2
                },
                "required_status_checks": {
                    "strict": true,
                    "contexts": ["ci/build", "ci/test"],
                    "checks": [
                        { "context": "ci/build", "app_id": null },
                        { "context": "ci/test", "app_id": 15368 }
                    ]
                },
                "enforce_admins": { "enabled": true },
                "required_linear_history": { "enabled": false }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let protection = service(&server)
        .await
        .get_branch_protection("main")
        .await
        .unwrap();

    assert_eq!(
        protection,
        BranchProtection {
            required_pull_request_reviews: Some(ReviewRequirement {
                required_approving_review_count: 2,
                dismiss_stale_reviews: true,
                require_code_owner_reviews: false,
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
    );
}

#[tokio::test]
async fn test_get_branch_protection_falls_back_to_contexts() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", PROTECTION_PATH)
        .with_status(200)
        .with_body(
            json!({
                "required_status_checks": { "strict": false, "contexts": ["ci/build"] }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let protection = service(&server)
        .await
        .get_branch_protection("main")
        .await
        .unwrap();

    assert!(protection.required_pull_request_reviews.is_none());
    assert_eq!(
        protection.required_status_checks.unwrap().checks,
        BTreeSet::from([RequiredCheck::any_app("ci/build")])
    );
}

#[tokio::test]
async fn test_unprotected_branch_is_empty_snapshot() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", PROTECTION_PATH)
        .with_status(404)
        .with_body(r#"{"message":"Branch not protected","documentation_url":"https://docs.github.com"}"#)
        .create_async()
        .await;

    let protection = service(&server)
        .await
        .get_branch_protection("main")
        .await
        .unwrap();

    assert!(protection.is_unprotected());
}

#[tokio::test]
async fn test_missing_branch_is_an_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", PROTECTION_PATH)
        .with_status(404)
        .with_body(r#"{"message":"Branch not found"}"#)
        .create_async()
        .await;

    let err = service(&server)
        .await
        .get_branch_protection("main")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::GitHubApi(ref msg) if msg.contains("Branch not found")));
}

#[tokio::test]
async fn test_update_review_requirement_sends_full_sub_rule() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("PATCH", "/repos/acme/widgets/branches/main/protection/required_pull_request_reviews")
        .match_header("authorization", "Bearer test-token")
        .match_body(Matcher::Json(json!({
            "required_approving_review_count": 0,
            "dismiss_stale_reviews": true,
            "require_code_owner_reviews": false
        })))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    service(&server)
        .await
        .update_review_requirement(
            "main",
            &ReviewRequirement {
                required_approving_review_count: 0,
                dismiss_stale_reviews: true,
                require_code_owner_reviews: false,
            },
        )
        .await
        .unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn test_update_status_checks_keeps_app_ids() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("PATCH", "/repos/acme/widgets/branches/main/protection/required_status_checks")
        .match_body(Matcher::Json(json!({
            "strict": true,
            "checks": [
                { "context": "ci/build", "app_id": -1 },
                { "context": "ci/test", "app_id": 15368 }
            ]
        })))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    service(&server)
        .await
        .update_status_check_requirement(
            "main",
            &StatusCheckRequirement {
                strict: true,
                checks: BTreeSet::from([
                    RequiredCheck::any_app("ci/build"),
                    RequiredCheck {
                        context: "ci/test".to_string(),
                        app_id: Some(15368),
                    },
                ]),
            },
        )
        .await
        .unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn test_update_failure_carries_github_message() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("PATCH", "/repos/acme/widgets/branches/main/protection/required_status_checks")
        .with_status(403)
        .with_body(r#"{"message":"Resource not accessible by integration"}"#)
        .create_async()
        .await;

    let err = service(&server)
        .await
        .update_status_check_requirement("main", &StatusCheckRequirement::default())
        .await
        .unwrap_err();

    match err {
        Error::GitHubApi(msg) => {
            assert!(msg.contains("403"));
            assert!(msg.contains("Resource not accessible by integration"));
        }
        other => panic!("expected GitHubApi error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_any_app_check_survives_read_and_write_back() {
    let mut server = Server::new_async().await;
    let _get = server
        .mock("GET", PROTECTION_PATH)
        .with_status(200)
        .with_body(
            json!({
                "required_status_checks": {
                    "strict": true,
                    "contexts": ["ci"],
                    "checks": [ { "context": "ci", "app_id": null } ]
                }
            })
            .to_string(),
        )
        .create_async()
        .await;
    let patch = server
        .mock("PATCH", "/repos/acme/widgets/branches/main/protection/required_status_checks")
        .match_body(Matcher::Json(json!({
            "strict": true,
            "checks": [ { "context": "ci", "app_id": -1 } ]
        })))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let github = service(&server).await;
    let snapshot = github.get_branch_protection("main").await.unwrap();
    let checks = snapshot.required_status_checks.unwrap();
    assert_eq!(checks.checks, BTreeSet::from([RequiredCheck::any_app("ci")]));

    github
        .update_status_check_requirement("main", &checks)
        .await
        .unwrap();

    patch.assert_async().await;
}

// =============================================================================
// Branch deletion
// =============================================================================

#[tokio::test]
async fn test_delete_branch() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("DELETE", "/repos/acme/widgets/git/refs/heads/feature-5")
        .with_status(204)
        .create_async()
        .await;

    service(&server)
        .await
        .delete_branch("feature-5")
        .await
        .unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn test_delete_already_deleted_branch_is_ok() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("DELETE", "/repos/acme/widgets/git/refs/heads/feature-5")
        .with_status(422)
        .with_body(r#"{"message":"Reference does not exist"}"#)
        .create_async()
        .await;

    assert!(service(&server).await.delete_branch("feature-5").await.is_ok());
}

#[tokio::test]
async fn test_delete_branch_encodes_ref_segments() {
    let mut server = Server::new_async().await;
    let wrong = server
        .mock("DELETE", "/repos/acme/widgets/git/refs/heads/user/fix")
        .with_status(204)
        .expect(0)
        .create_async()
        .await;
    let right = server
        .mock("DELETE", "/repos/acme/widgets/git/refs/heads/user/fix%2312")
        .with_status(204)
        .create_async()
        .await;

    service(&server)
        .await
        .delete_branch("user/fix#12")
        .await
        .unwrap();

    right.assert_async().await;
    wrong.assert_async().await;
}
