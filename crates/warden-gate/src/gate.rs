//! The three-stage pipeline.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use warden_approval::{
    ApprovalCategory, ApprovalError, ApprovalManager, ApprovalOutcome, ApprovalParams,
    ApprovalRequest, ApprovalStatus,
};
use warden_core::RiskLevel;
use warden_policy::{AllowlistDecision, PathOperation, PolicyEngine, tokenize};
use warden_sandbox::{SandboxExecutionRequest, SandboxExecutionResult, SandboxExecutor};

use crate::context::GateContext;
use crate::error::{GateError, GateResult};

/// How an operation came to be authorized.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Authorization {
    /// The policy allowed it outright.
    Policy {
        /// The policy's explanation.
        reason: String,
    },
    /// An auto-approve rule matched.
    Rule {
        /// The resolved request.
        request: Box<ApprovalRequest>,
        /// Name of the matching rule.
        rule_name: String,
    },
    /// A human approved it.
    Human {
        /// The resolved request.
        request: Box<ApprovalRequest>,
    },
}

/// Result of authorizing an operation without running it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// The operation may proceed.
    Authorized {
        /// How.
        authorization: Authorization,
    },
    /// The policy refused and no approval can override it.
    Denied {
        /// The policy's decision.
        decision: AllowlistDecision,
    },
    /// Escalated, then denied by a human or left to expire.
    Rejected {
        /// The resolved request.
        request: Box<ApprovalRequest>,
    },
}

impl Verdict {
    /// Whether the operation may proceed.
    #[must_use]
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized { .. })
    }
}

/// Result of [`Gate::run_command`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GateOutcome {
    /// Authorized and run in the sandbox.
    Executed {
        /// How it was authorized.
        authorization: Authorization,
        /// What the sandbox reported.
        result: SandboxExecutionResult,
    },
    /// The policy refused.
    Denied {
        /// The policy's decision.
        decision: AllowlistDecision,
    },
    /// A human refused, or nobody decided in time.
    Rejected {
        /// The resolved request.
        request: Box<ApprovalRequest>,
    },
}

/// Wires policy, approval and sandbox together.
///
/// Every command goes through the policy engine first. Hard denials stop
/// there. Escalations become approval requests, which either a rule or a
/// human resolves. Only then does anything reach the sandbox, and the sandbox
/// applies its ceilings no matter which path authorized the command.
#[derive(Debug, Clone)]
pub struct Gate {
    policy: Arc<PolicyEngine>,
    approvals: Arc<ApprovalManager>,
    sandbox: Arc<SandboxExecutor>,
}

impl Gate {
    /// Assemble a gate from its stages.
    #[must_use]
    pub fn new(
        policy: Arc<PolicyEngine>,
        approvals: Arc<ApprovalManager>,
        sandbox: Arc<SandboxExecutor>,
    ) -> Self {
        Self {
            policy,
            approvals,
            sandbox,
        }
    }

    /// The policy stage.
    #[must_use]
    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    /// The approval stage.
    #[must_use]
    pub fn approvals(&self) -> &Arc<ApprovalManager> {
        &self.approvals
    }

    /// The sandbox stage.
    #[must_use]
    pub fn sandbox(&self) -> &Arc<SandboxExecutor> {
        &self.sandbox
    }

    /// Decide whether `command args` may run, waiting for a human if needed.
    ///
    /// # Errors
    ///
    /// [`GateError::Approval`] if the request cannot be queued.
    pub async fn authorize_command<S: AsRef<str>>(
        &self,
        ctx: &GateContext,
        command: &str,
        args: &[S],
    ) -> GateResult<Verdict> {
        let decision = self.policy.check_command(command, args);
        let action = display_invocation(command, args);
        let category = command_category(decision.risk_level);
        self.resolve(ctx, decision, category, "shell.exec", action).await
    }

    /// Authorize `command args` and, if allowed, run it in the sandbox.
    ///
    /// # Errors
    ///
    /// [`GateError::Approval`] if the request cannot be queued, or
    /// [`GateError::Sandbox`] if the sandbox cannot run the command.
    pub async fn run_command<S: AsRef<str>>(
        &self,
        ctx: &GateContext,
        command: &str,
        args: &[S],
    ) -> GateResult<GateOutcome> {
        let authorization = match self.authorize_command(ctx, command, args).await? {
            Verdict::Authorized { authorization } => authorization,
            Verdict::Denied { decision } => return Ok(GateOutcome::Denied { decision }),
            Verdict::Rejected { request } => return Ok(GateOutcome::Rejected { request }),
        };

        let mut request =
            SandboxExecutionRequest::new(command, args.iter().map(|a| a.as_ref().to_owned()));
        request.working_dir.clone_from(&ctx.working_dir);
        request.env.clone_from(&ctx.env);
        request.timeout = ctx.timeout;

        let result = self.sandbox.execute(request).await?;
        info!(
            session_id = %ctx.session_id,
            command,
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            "Gated command finished"
        );
        Ok(GateOutcome::Executed {
            authorization,
            result,
        })
    }

    /// Tokenize `line` and run it like [`run_command`](Self::run_command).
    ///
    /// # Errors
    ///
    /// [`GateError::InvalidCommandLine`] if the line is empty or has an
    /// unterminated quote, otherwise as [`run_command`](Self::run_command).
    pub async fn run_command_line(&self, ctx: &GateContext, line: &str) -> GateResult<GateOutcome> {
        let words = tokenize(line).map_err(|e| GateError::InvalidCommandLine(e.to_string()))?;
        let (command, args) = words
            .split_first()
            .ok_or_else(|| GateError::InvalidCommandLine("empty command line".to_owned()))?;
        self.run_command(ctx, command, args).await
    }

    /// Decide whether a filesystem operation may proceed. Nothing is
    /// executed.
    ///
    /// # Errors
    ///
    /// [`GateError::Approval`] if the request cannot be queued.
    pub async fn authorize_path(
        &self,
        ctx: &GateContext,
        path: impl AsRef<Path>,
        operation: PathOperation,
    ) -> GateResult<Verdict> {
        let path = path.as_ref();
        let decision = self.policy.check_path(path, operation);
        let action = format!("{operation} {}", path.display());
        let name = format!("fs.{operation}");
        self.resolve(ctx, decision, path_category(operation), &name, action)
            .await
    }

    async fn resolve(
        &self,
        ctx: &GateContext,
        decision: AllowlistDecision,
        category: ApprovalCategory,
        operation: &str,
        action: String,
    ) -> GateResult<Verdict> {
        if decision.allowed {
            debug!(session_id = %ctx.session_id, action = %action, "Allowed by policy");
            return Ok(Verdict::Authorized {
                authorization: Authorization::Policy {
                    reason: decision.reason,
                },
            });
        }
        if !decision.requires_approval {
            info!(
                session_id = %ctx.session_id,
                action = %action,
                reason = %decision.reason,
                "Denied by policy"
            );
            return Ok(Verdict::Denied { decision });
        }

        let mut params = ApprovalParams::new(category, action)
            .with_operation(operation)
            .with_risk_level(decision.risk_level)
            .with_session(ctx.session_id.clone())
            .with_context(ctx.purpose.clone().unwrap_or_else(|| decision.reason.clone()))
            .with_technical_details(decision.reason);
        if let Some(user) = &ctx.user_id {
            params = params.with_user(user.clone());
        }

        match self.approvals.request_approval(params)? {
            ApprovalOutcome::AutoApproved { request, rule } => Ok(Verdict::Authorized {
                authorization: Authorization::Rule {
                    request: Box::new(request),
                    rule_name: rule.name,
                },
            }),
            ApprovalOutcome::Pending { request, waiter } => {
                info!(
                    session_id = %ctx.session_id,
                    request_id = %request.id,
                    action = %request.action,
                    "Waiting for approval"
                );
                let resolved = match waiter.wait().await {
                    Ok(resolved) => resolved,
                    Err(ApprovalError::Expired(id)) => self.approvals.get_request(id)?,
                    Err(e) => return Err(e.into()),
                };
                Ok(verdict_for(resolved))
            },
        }
    }
}

fn verdict_for(request: ApprovalRequest) -> Verdict {
    match request.status {
        ApprovalStatus::Approved => Verdict::Authorized {
            authorization: Authorization::Human {
                request: Box::new(request),
            },
        },
        ApprovalStatus::AutoApproved => Verdict::Authorized {
            authorization: Authorization::Rule {
                rule_name: request
                    .matched_rule
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                request: Box::new(request),
            },
        },
        ApprovalStatus::Denied | ApprovalStatus::Expired => Verdict::Rejected {
            request: Box::new(request),
        },
        ApprovalStatus::Pending => {
            warn!(request_id = %request.id, "Waiter returned a pending request, rejecting");
            Verdict::Rejected {
                request: Box::new(request),
            }
        },
    }
}

/// Dangerous and critical escalations are filed as dangerous commands.
fn command_category(risk: RiskLevel) -> ApprovalCategory {
    if risk.is_dangerous() {
        ApprovalCategory::DangerousCommand
    } else {
        ApprovalCategory::ShellCommand
    }
}

fn path_category(operation: PathOperation) -> ApprovalCategory {
    match operation {
        PathOperation::Write => ApprovalCategory::FileWrite,
        PathOperation::Read => ApprovalCategory::DataExport,
        PathOperation::Execute => ApprovalCategory::ShellCommand,
    }
}

fn display_invocation<S: AsRef<str>>(command: &str, args: &[S]) -> String {
    std::iter::once(command)
        .chain(args.iter().map(AsRef::as_ref))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
