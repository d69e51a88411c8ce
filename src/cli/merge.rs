//! Merge command - merge one PR through its base branch protection

use crate::cli::context::CommandContext;
use crate::cli::style::{Stylize, check, cross, pr_link};
use crate::cli::{CliProgress, MergeArgs};
use anstream::println;
use dialoguer::Confirm;
use safe_merge::error::{Error, Result};
use safe_merge::merge::{
    MergePolicy, RestoreStatus, SafeMergePlan, SafeMergeReport, SafeMergeRequest,
    plan_safe_merge, safe_merge_until,
};
use safe_merge::types::{BranchProtection, MergeStage, PullRequestStatus};

/// Run the merge command, returning the process exit code
pub async fn run_merge(args: MergeArgs) -> Result<u8> {
    // =========================================================================
    // Phase 1: GATHER - settings, PR and snapshot for the preview
    // =========================================================================

    let ctx = CommandContext::new(&args).await?;
    let pr_number = args.pr_number;

    println!(
        "{} {} in {}",
        "Safe merge".emphasis(),
        format!("PR #{pr_number}").accent(),
        ctx.platform.config().to_string().accent()
    );

    if args.dry_run || args.confirm {
        let pr = ctx.platform.get_pr_status(pr_number).await?;
        let base_branch = ctx
            .base_branch
            .clone()
            .unwrap_or_else(|| pr.base_ref.clone());
        let snapshot = ctx.platform.get_branch_protection(&base_branch).await?;

        // =====================================================================
        // Phase 2: PLAN - same pure planner the orchestrator uses
        // =====================================================================

        let plan = plan_safe_merge(&pr, &base_branch, &snapshot, &ctx.policy);
        report_plan(&pr, &plan, &ctx.policy);

        if args.dry_run {
            return Ok(plan
                .blockers
                .first()
                .map_or(0, |b| b.clone().into_error(pr_number).exit_code()));
        }

        // A blocked plan falls through; the orchestrator reports it without mutating
        if !plan.is_blocked()
            && !Confirm::new()
                .with_prompt("Proceed with merge?")
                .default(true)
                .interact()
                .map_err(|e| Error::Internal(format!("Failed to read confirmation: {e}")))?
        {
            println!("{}", "Aborted".muted());
            return Ok(0);
        }
        println!();
    }

    // =========================================================================
    // Phase 3: EXECUTE - relax, poll, merge, restore
    // =========================================================================

    let request = SafeMergeRequest {
        pr_number,
        base_branch: ctx.base_branch.clone(),
    };
    let progress = CliProgress::new();
    let report = safe_merge_until(
        ctx.platform.as_ref(),
        &request,
        &ctx.policy,
        &progress,
        ctrl_c(),
    )
    .await;
    progress.finish();

    print_report(&report);
    Ok(report.exit_code())
}

/// Resolves on Ctrl-C; never resolves if the handler can't be installed
async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Describe a protection snapshot, one line per sub-rule
fn describe_protection(protection: &BranchProtection) -> Vec<String> {
    let reviews = match protection.required_pull_request_reviews {
        Some(ref r) => {
            let mut line = format!(
                "reviews: {} approving review(s)",
                r.required_approving_review_count
            );
            if r.require_code_owner_reviews {
                line.push_str(", code owner review");
            }
            if r.dismiss_stale_reviews {
                line.push_str(", dismiss stale reviews");
            }
            line
        }
        None => "reviews: not required".to_string(),
    };

    let checks = match protection.required_status_checks {
        Some(ref c) => {
            let names: Vec<&str> = c.checks.iter().map(|rc| rc.context.as_str()).collect();
            format!(
                "status checks: {}{}",
                if names.is_empty() {
                    "none".to_string()
                } else {
                    names.join(", ")
                },
                if c.strict { " (strict)" } else { "" }
            )
        }
        None => "status checks: not required".to_string(),
    };

    vec![reviews, checks]
}

/// Report what a safe merge would do
fn report_plan(pr: &PullRequestStatus, plan: &SafeMergePlan, policy: &MergePolicy) {
    println!();
    println!("{}:", "Merge plan".emphasis());
    println!(
        "  {}: {}",
        pr_link(pr.number, &pr.html_url),
        pr.title
    );
    println!(
        "    {} → {}  {}",
        pr.head_ref.accent(),
        plan.base_branch.accent(),
        format!("({}, {})", pr.merge_state, plan.method).muted()
    );

    if plan.is_blocked() {
        for blocker in &plan.blockers {
            println!("  {} {}", cross(), blocker.to_string().warn());
        }
        println!();
        println!("{}", "Nothing would be changed.".muted());
        return;
    }

    println!("  {} Status checks green", check());

    if plan.snapshot.is_unprotected() {
        println!("  {}", format!("{} is not protected", plan.base_branch).muted());
    } else if plan.changes_protection() {
        println!("  Would relax protection on {}:", plan.base_branch.accent());
        for (before, after) in describe_protection(&plan.snapshot)
            .into_iter()
            .zip(describe_protection(&plan.relaxed))
        {
            if before == after {
                println!("    {}", before.muted());
            } else {
                println!("    {} → {}", before, after.warn());
            }
        }
    } else {
        println!("  {}", "Protection already permits the merge".muted());
    }

    println!(
        "  Would wait up to {} attempt(s) for {}",
        policy.poll.max_attempts,
        policy.readiness.describe().accent()
    );
    println!("  Would {} merge", plan.method.to_string().accent());
    if let Some(ref head) = plan.delete_head {
        println!("  Would delete {}", head.accent());
    }
    if !plan.snapshot.is_unprotected() {
        println!("  Would restore protection on {}", plan.base_branch.accent());
    }
    println!();
}

/// Print the final summary, with a loud warning if restoring failed
fn print_report(report: &SafeMergeReport) {
    println!();
    match report.outcome {
        Ok(ref outcome) => {
            println!(
                "{} Merged {} into {}{}",
                check(),
                format!("PR #{}", outcome.pr_number).accent(),
                outcome.base_branch.accent(),
                outcome
                    .sha
                    .as_deref()
                    .map(|sha| format!(" ({})", sha.get(..12).unwrap_or(sha)).muted())
                    .unwrap_or_default()
            );
            if let Some(ref branch) = outcome.deleted_branch {
                println!("   Deleted {}", branch.accent());
            }
            if let Some(ref e) = outcome.branch_delete_error {
                println!(
                    "   {}",
                    format!("Head branch was not deleted: {e}").warn()
                );
            }
        }
        Err(ref e) => {
            println!("{} {}", cross(), e.to_string().failure());
            println!("   {}", format!("Stopped after stage {}", report.stage).muted());
            if let Error::Interrupted {
                stage: MergeStage::AwaitingMergeable,
            } = *e
            {
                println!(
                    "   {}",
                    "The merge request may already have reached GitHub; check the PR".warn()
                );
            }
        }
    }

    match report.restore {
        RestoreStatus::NotNeeded => {}
        RestoreStatus::Restored { attempts: 1 } => {
            println!("{} Protection restored", check());
        }
        RestoreStatus::Restored { attempts } => {
            println!(
                "{} Protection restored after {attempts} attempts",
                check()
            );
        }
        RestoreStatus::Failed(ref e) => {
            println!();
            println!("{}", format!("⚠️  {e}").failure());
            if let Some(ref plan) = report.plan {
                println!(
                    "{}",
                    format!(
                        "   Protection on {} may be left relaxed. Reapply it manually:",
                        plan.base_branch
                    )
                    .warn()
                );
                for line in describe_protection(&plan.snapshot) {
                    println!("     {line}");
                }
            }
        }
    }
}
