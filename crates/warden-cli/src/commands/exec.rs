//! `warden exec`: run one command through the full gate.
//!
//! The gate runs on its own task. Meanwhile this task watches the event bus
//! for approval requests raised by this session and prompts for each one.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{Instrument, info, warn};
use warden_approval::RequestId;
use warden_config::ResolvedConfig;
use warden_gate::{Authorization, GateContext, GateOutcome};
use warden_sandbox::SandboxExecutionResult;
use warden_telemetry::RequestContext;

use crate::approval_handler::{self, Choice};
use crate::formatter::{OutputFormat, print_json};
use crate::theme::Theme;
use crate::wiring::Stages;

/// Exit status when the command never ran.
const NOT_RUN_STATUS: u8 = 126;
/// Exit status when the sandbox timeout fired, as `timeout(1)` reports it.
const TIMED_OUT_STATUS: u8 = 124;

pub(crate) struct ExecArgs {
    pub(crate) session: Option<String>,
    pub(crate) user: Option<String>,
    pub(crate) purpose: Option<String>,
    pub(crate) workdir: Option<String>,
    pub(crate) timeout_ms: Option<u64>,
    pub(crate) command: Vec<String>,
}

impl ExecArgs {
    fn context(&self) -> GateContext {
        let session = self
            .session
            .clone()
            .unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4().simple()));
        let mut ctx = GateContext::new(session);
        if let Some(user) = &self.user {
            ctx = ctx.with_user(user.clone());
        }
        if let Some(purpose) = &self.purpose {
            ctx = ctx.with_purpose(purpose.clone());
        }
        if let Some(dir) = &self.workdir {
            ctx = ctx.in_dir(dir.clone());
        }
        if let Some(ms) = self.timeout_ms {
            ctx = ctx.with_timeout(Duration::from_millis(ms));
        }
        ctx
    }
}

pub(crate) async fn run_exec(
    resolved: &ResolvedConfig,
    stages: &Stages,
    args: ExecArgs,
    format: OutputFormat,
) -> Result<u8> {
    let (command, rest) = args.command.split_first().context("no command given")?;
    let ctx = args.context();
    let span = RequestContext::new("cli")
        .with_session(ctx.session_id.clone())
        .with_operation("exec")
        .with_metadata("command", command.clone())
        .span();
    let outcome = gate_and_prompt(resolved, stages, &ctx, command, rest, args.user.clone())
        .instrument(span)
        .await?;
    stages.save().await?;

    if format == OutputFormat::Json {
        print_json(&outcome)?;
        return Ok(status_of(&outcome));
    }
    print_outcome(&outcome);
    Ok(status_of(&outcome))
}

async fn gate_and_prompt(
    resolved: &ResolvedConfig,
    stages: &Stages,
    ctx: &GateContext,
    command: &str,
    rest: &[String],
    operator: Option<String>,
) -> Result<GateOutcome> {
    let gate = stages.gate(resolved)?;
    let sweeper = stages.approvals.spawn_sweeper();
    let mut created = stages.events.subscribe_prefix("request:created");

    let mut run = {
        let gate = gate.clone();
        let ctx = ctx.clone();
        let command = command.to_owned();
        let rest = rest.to_vec();
        tokio::spawn(async move { gate.run_command(&ctx, &command, &rest).await })
    };

    let outcome = loop {
        tokio::select! {
            joined = &mut run => {
                break joined
                    .context("gate task failed")
                    .and_then(|result| result.map_err(anyhow::Error::from));
            },
            Some(event) = created.recv() => {
                let Some(id) = event.request_id() else { continue };
                let Ok(request) = stages.approvals.get_request(RequestId(id)) else { continue };
                if request.session_id != ctx.session_id || !request.is_pending() {
                    continue;
                }
                let shown = request.clone();
                let choice = tokio::task::spawn_blocking(move || approval_handler::prompt(&shown))
                    .await
                    .unwrap_or(Choice::Deny);
                if let Err(e) =
                    approval_handler::apply(&stages.approvals, &request, choice, operator.clone())
                {
                    warn!(request_id = %request.id, error = %e, "Decision not recorded");
                }
            },
            _ = tokio::signal::ctrl_c() => {
                let killed = gate.sandbox().kill_all_containers().await;
                run.abort();
                break Err(anyhow!("interrupted, killed {killed} container(s)"));
            },
        }
    };

    sweeper.shutdown().await;
    info!(session_id = %ctx.session_id, ok = outcome.is_ok(), "Exec finished");
    outcome
}

fn print_outcome(outcome: &GateOutcome) {
    match outcome {
        GateOutcome::Executed {
            authorization,
            result,
        } => {
            print!("{}", result.stdout);
            eprint!("{}", result.stderr);
            eprintln!("{}", summary(authorization, result));
        },
        GateOutcome::Denied { decision } => {
            eprintln!("{}", Theme::error(&format!("denied by policy: {}", decision.reason)));
        },
        GateOutcome::Rejected { request } => {
            let reason = request
                .resolution_reason
                .clone()
                .unwrap_or_else(|| request.status.to_string());
            eprintln!("{}", Theme::error(&format!("not approved: {reason}")));
        },
    }
}

fn status_of(outcome: &GateOutcome) -> u8 {
    match outcome {
        GateOutcome::Executed { result, .. } if result.timed_out => TIMED_OUT_STATUS,
        GateOutcome::Executed { result, .. } => u8::try_from(result.exit_code.clamp(0, 255))
            .unwrap_or(1),
        GateOutcome::Denied { .. } | GateOutcome::Rejected { .. } => NOT_RUN_STATUS,
    }
}

fn summary(authorization: &Authorization, result: &SandboxExecutionResult) -> String {
    let by = match authorization {
        Authorization::Policy { .. } => "policy".to_owned(),
        Authorization::Rule { rule_name, .. } => format!("rule {rule_name}"),
        Authorization::Human { request } => request
            .resolved_by
            .clone()
            .unwrap_or_else(|| "operator".to_owned()),
    };
    let mut line = format!(
        "exit {} in {}ms, authorized by {by}",
        result.exit_code, result.duration_ms
    );
    if result.timed_out {
        line.push_str(", timed out");
    }
    if result.output_truncated {
        line.push_str(", output truncated");
    }
    Theme::dimmed(&line)
}
