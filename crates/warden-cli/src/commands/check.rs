//! `warden check`: ask the policy engine without running anything.

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;
use warden_policy::{AllowlistDecision, PathOperation, PolicyEngine};

use crate::formatter::{OutputFormat, print_json};
use crate::theme::Theme;

/// Filesystem operation named on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum PathOp {
    Read,
    Write,
    Execute,
}

impl From<PathOp> for PathOperation {
    fn from(op: PathOp) -> Self {
        match op {
            PathOp::Read => Self::Read,
            PathOp::Write => Self::Write,
            PathOp::Execute => Self::Execute,
        }
    }
}

#[derive(Serialize)]
struct Report<'a> {
    subject: &'a str,
    verdict: &'static str,
    #[serde(flatten)]
    decision: &'a AllowlistDecision,
}

/// `allow`, `escalate` or `deny`.
fn verdict(decision: &AllowlistDecision) -> &'static str {
    if decision.allowed {
        "allow"
    } else if decision.requires_approval {
        "escalate"
    } else {
        "deny"
    }
}

/// Exit status for a decision: 0 allow, 2 escalate, 1 deny.
fn exit_status(decision: &AllowlistDecision) -> u8 {
    match verdict(decision) {
        "allow" => 0,
        "escalate" => 2,
        _ => 1,
    }
}

fn report(subject: &str, decision: &AllowlistDecision, format: OutputFormat) -> Result<u8> {
    match format {
        OutputFormat::Json => print_json(&Report {
            subject,
            verdict: verdict(decision),
            decision,
        })?,
        OutputFormat::Pretty => {
            let headline = match verdict(decision) {
                "allow" => Theme::success(&format!("allowed: {subject}")),
                "escalate" => Theme::warning(&format!("needs approval: {subject}")),
                _ => Theme::error(&format!("denied: {subject}")),
            };
            println!("{headline}");
            println!("  {}", Theme::kv("risk", &Theme::risk_level(decision.risk_level)));
            println!("  {}", Theme::kv("reason", &decision.reason));
        },
    }
    Ok(exit_status(decision))
}

pub(crate) fn check_command(
    policy: &PolicyEngine,
    command: &str,
    args: &[String],
    format: OutputFormat,
) -> Result<u8> {
    let decision = policy.check_command(command, args);
    let subject = std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    report(&subject, &decision, format)
}

pub(crate) fn check_line(policy: &PolicyEngine, line: &str, format: OutputFormat) -> Result<u8> {
    report(line, &policy.check_command_line(line), format)
}

pub(crate) fn check_path(
    policy: &PolicyEngine,
    path: &str,
    op: PathOp,
    format: OutputFormat,
) -> Result<u8> {
    let operation = PathOperation::from(op);
    let decision = policy.check_path(path, operation);
    report(&format!("{operation} {path}"), &decision, format)
}
