//! Skip-condition evaluation.
//!
//! A skip condition is a pure function of (policy, snapshot) deciding to
//! abort the current action with an explanatory check-run. First skip wins;
//! the winning title is prefixed with the action ("not merging: " or
//! "not updating: "). The check condition can also push the message back
//! when the last commit is too recent for its checks to have registered.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info};

use super::error::ReconcileError;
use crate::github::PullRequestDetails;
use crate::policy::{IgnoreRules, MergePolicy, UpdatePolicy};

/// States that count as "good enough" for a required check.
const SUCCESS_STATES: [&str; 3] = ["NEUTRAL", "SUCCESS", ""];

/// The decision to abort, surfaced to the user via a check-run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skip {
    pub title: String,
    pub summary: String,
}

impl Skip {
    fn new(title: impl Into<String>, summary: impl Into<String>) -> Self {
        Skip {
            title: title.into(),
            summary: summary.into(),
        }
    }

    fn prefixed(mut self, prefix: &str) -> Self {
        self.title = format!("{prefix}{}", self.title);
        self
    }
}

/// Evaluates the update-path conditions in order.
pub fn should_skip_update(policy: &UpdatePolicy, details: &PullRequestDetails) -> Option<Skip> {
    skip_for_title(&policy.ignore, details)
        .or_else(|| skip_for_label(&policy.ignore, details))
        .or_else(|| skip_for_author(&policy.ignore, details))
        .map(|skip| skip.prefixed("not updating: "))
}

/// Evaluates the merge-path conditions in order. Returns a push-back error
/// when all checks pass but the last commit is younger than the grace
/// period.
pub fn should_skip_merge(
    policy: &MergePolicy,
    details: &PullRequestDetails,
    now: DateTime<Utc>,
    wait_after_commit: Duration,
) -> Result<Option<Skip>, ReconcileError> {
    let early = skip_for_title(&policy.ignore, details)
        .or_else(|| skip_for_label(&policy.ignore, details))
        .or_else(|| skip_for_author(&policy.ignore, details))
        .or_else(|| skip_for_history(policy, details))
        .or_else(|| skip_for_reviews(policy, details));
    if let Some(skip) = early {
        return Ok(Some(skip.prefixed("not merging: ")));
    }
    Ok(skip_for_checks(policy, details, now, wait_after_commit)?
        .map(|skip| skip.prefixed("not merging: ")))
}

fn skip_for_title(rules: &IgnoreRules, details: &PullRequestDetails) -> Option<Skip> {
    let matched = rules.ignored_title(&details.title)?;
    info!(title = %details.title, "title is in ignore list");
    Some(Skip::new(
        "title is in ignore list",
        format!(
            "`{}` is in the ignore list (`{}`, matched by `{}`)",
            details.title, rules.ignore_with_titles, matched
        ),
    ))
}

fn skip_for_label(rules: &IgnoreRules, details: &PullRequestDetails) -> Option<Skip> {
    for label in &details.labels {
        if rules.ignored_label(label).is_some() {
            info!(label = %label, "label is in ignore list");
            return Some(Skip::new(
                "label is in ignore list",
                format!(
                    "`{}` is in the ignore list (`{}`)",
                    label, rules.ignore_with_labels
                ),
            ));
        }
    }
    None
}

fn skip_for_author(rules: &IgnoreRules, details: &PullRequestDetails) -> Option<Skip> {
    let matched = rules.ignored_user(&details.author)?;
    info!(author = %details.author, "author is in ignore list");
    Some(Skip::new(
        "author is in ignore list",
        format!(
            "`{}` is in the ignore list (`{}`, matched by `{}`)",
            details.author, rules.ignore_from_users, matched
        ),
    ))
}

fn skip_for_history(policy: &MergePolicy, details: &PullRequestDetails) -> Option<Skip> {
    if !policy.require_linear_history || details.ahead_by == 0 {
        return None;
    }
    info!("a linear history is required");
    Some(Skip::new(
        "a linear history is required",
        format!(
            "the branch is not up to date with the latest changes from `{}` branch",
            details.base_ref_name
        ),
    ))
}

fn skip_for_reviews(policy: &MergePolicy, details: &PullRequestDetails) -> Option<Skip> {
    if policy.required_approvals > 0 && policy.required_approvals > details.approved_by.len() {
        info!(
            required_approvals = policy.required_approvals,
            current_approvals = details.approved_by.len(),
            "missing required approvals"
        );
        return Some(Skip::new(
            "missing required approvals",
            format!(
                "{} approvals are required, got {}",
                policy.required_approvals,
                details.approved_by.len()
            ),
        ));
    }

    if !policy.require_approvals_from.is_empty() {
        let mut missing = Vec::new();
        for entry in policy.require_approvals_from.iter() {
            let approved = details.approved_by.iter().any(|login| entry.matches(login));
            if !approved {
                info!(approver = %entry.text(), "approver did not approve");
                missing.push(entry.text());
            }
        }
        if !missing.is_empty() {
            let lines: Vec<String> = missing
                .iter()
                .map(|entry| format!("`{entry}` did not approve yet"))
                .collect();
            return Some(Skip::new("approval(s) missing", lines.join("\n")));
        }
    }
    None
}

fn skip_for_checks(
    policy: &MergePolicy,
    details: &PullRequestDetails,
    now: DateTime<Utc>,
    wait_after_commit: Duration,
) -> Result<Option<Skip>, ReconcileError> {
    if policy.required_checks.is_empty() {
        return Ok(None);
    }

    let mut not_succeeded: Vec<(String, &str)> = Vec::new();
    let mut missing: Vec<&str> = Vec::new();
    for entry in policy.required_checks.iter() {
        let mut found = false;
        for (name, state) in &details.check_states {
            if !entry.matches(name) {
                continue;
            }
            found = true;
            if !SUCCESS_STATES.contains(&state.as_str()) {
                info!(name = %name, state = %state, check = %entry.text(), "check did not succeed");
                not_succeeded.push((name.clone(), entry.text()));
            }
        }
        if !found {
            info!(check = %entry.text(), "check is missing");
            missing.push(entry.text());
        }
    }

    if !missing.is_empty() {
        let mut lines: Vec<String> = missing
            .iter()
            .map(|entry| format!("no check matches `{entry}`"))
            .collect();
        lines.push(String::new());
        lines.push(available_checks_table(details));
        return Ok(Some(Skip::new("check(s) missing", lines.join("\n"))));
    }

    if !not_succeeded.is_empty() {
        let mut lines: Vec<String> = not_succeeded
            .iter()
            .map(|(name, entry)| format!("check `{name}` did not succeed (matched by `{entry}`)"))
            .collect();
        lines.push(String::new());
        lines.push(available_checks_table(details));
        return Ok(Some(Skip::new("check(s) did not succeed", lines.join("\n"))));
    }

    // All required checks are green. Hold off if the commit is so fresh
    // that late-registering checks could still appear.
    if let Some(commit) = &details.last_commit {
        let ready_at = commit.committed_at
            + chrono::Duration::from_std(wait_after_commit).unwrap_or_else(|_| chrono::Duration::zero());
        if let Ok(remaining) = (ready_at - now).to_std() {
            if !remaining.is_zero() {
                debug!("delaying merge, because commit was too recent");
                return Err(ReconcileError::PushBack { delay: remaining });
            }
        }
    }
    Ok(None)
}

/// Renders the table of every known check, its state, and whether that
/// state is in the success set. Sorted by name.
pub fn available_checks_table(details: &PullRequestDetails) -> String {
    if details.check_states.is_empty() {
        return String::new();
    }

    let mut out = String::from("## Available Checks\n");
    out.push_str("| Name | State | Good Enough For Merge? |\n");
    out.push_str("| ---- | ----- | ---------------------- |\n");
    // check_states is a BTreeMap, so iteration is already name-sorted.
    for (name, state) in &details.check_states {
        let passed = if SUCCESS_STATES.contains(&state.as_str()) {
            "✅"
        } else {
            "❌"
        };
        let shown_state = if state.is_empty() { "\u{200e}" } else { state };
        out.push_str(&format!("| `{name}` | `{shown_state}` | {passed} |\n"));
    }
    out
}
