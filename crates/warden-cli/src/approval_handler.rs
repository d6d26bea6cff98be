//! Interactive approval prompts.
//!
//! When no terminal is attached the prompt fails and the request is denied.

use anyhow::Result;
use dialoguer::{Select, theme::ColorfulTheme};
use warden_approval::{
    ApprovalManager, ApprovalRequest, ApproveOptions, DenyOptions, RememberScope,
};

use crate::theme::Theme;

/// What the operator chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Choice {
    Approve(Option<RememberScope>),
    Deny,
}

const OPTIONS: [&str; 4] = [
    "Approve once",
    "Approve and remember this exact action",
    "Approve and remember similar actions",
    "Deny",
];

fn choice_for(index: usize) -> Choice {
    match index {
        0 => Choice::Approve(None),
        1 => Choice::Approve(Some(RememberScope::Exact)),
        2 => Choice::Approve(Some(RememberScope::Similar)),
        _ => Choice::Deny,
    }
}

/// Render `request` for the operator.
pub(crate) fn describe(request: &ApprovalRequest) -> String {
    let mut lines = vec![
        Theme::kv("Action", &request.action),
        Theme::kv("Category", request.category.as_str()),
        Theme::kv("Risk", &Theme::risk_level(request.risk_level)),
        Theme::kv("Session", &request.session_id),
    ];
    if !request.context.is_empty() {
        lines.push(Theme::kv("Why", &request.context));
    }
    lines.push(Theme::kv(
        "Expires",
        &request.expires_at.format("%H:%M:%S UTC").to_string(),
    ));
    Theme::approval_box("Approval required", &lines, request.risk_level)
}

/// Ask the operator on the terminal. Blocks the calling thread.
pub(crate) fn prompt(request: &ApprovalRequest) -> Choice {
    eprintln!();
    eprintln!("{}", describe(request));
    Select::with_theme(&ColorfulTheme::default())
        .items(&OPTIONS)
        .default(0)
        .interact_opt()
        .ok()
        .flatten()
        .map_or(Choice::Deny, choice_for)
}

/// Record `choice` against `request`.
pub(crate) fn apply(
    manager: &ApprovalManager,
    request: &ApprovalRequest,
    choice: Choice,
    operator: Option<String>,
) -> Result<ApprovalRequest> {
    let resolved = match choice {
        Choice::Approve(remember) => manager.approve(
            request.id,
            ApproveOptions {
                remember,
                decided_by: operator,
                ..ApproveOptions::default()
            },
        )?,
        Choice::Deny => manager.deny(
            request.id,
            DenyOptions {
                reason: Some("denied at the terminal".to_owned()),
                decided_by: operator,
                ..DenyOptions::default()
            },
        )?,
    };
    Ok(resolved)
}
