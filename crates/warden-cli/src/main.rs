//! Warden CLI - put an AI agent's commands behind a policy, a human, and a
//! container.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use warden_config::{Config, ResolvedConfig, ShowFormat};
use warden_telemetry::{RequestContext, setup_logging};

mod approval_handler;
mod commands;
pub mod config_bridge;
mod formatter;
mod theme;
mod wiring;

use commands::check::PathOp;
use commands::exec::ExecArgs;
use commands::{check, config, doctor, exec, rules};
use formatter::OutputFormat;
use theme::Theme;
use wiring::Stages;

/// Warden - trust boundary for AI agent actions
#[derive(Parser)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file merged over the system and user files
    #[arg(short, long, global = true, env = "WARDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the policy engine about an operation without running it
    Check {
        #[command(subcommand)]
        command: CheckCommands,
    },

    /// Run a command through policy, approval and the sandbox
    Exec {
        /// Session the command belongs to
        #[arg(long)]
        session: Option<String>,

        /// User the agent acts for
        #[arg(long)]
        user: Option<String>,

        /// Why the command is needed, shown to the approver
        #[arg(long)]
        purpose: Option<String>,

        /// Working directory relative to the workspace
        #[arg(long)]
        workdir: Option<String>,

        /// Execution timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Command and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Inspect auto-approve rules
    Rules {
        #[command(subcommand)]
        command: RuleCommands,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Check that the container runtime and image are usable
    Doctor,
}

#[derive(Subcommand)]
enum CheckCommands {
    /// Check a command and its arguments
    Command {
        /// Executable
        command: String,
        /// Arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Check a raw command line, including injection detection
    Line {
        /// The command line
        line: String,
    },
    /// Check a filesystem access
    Path {
        /// Path to check
        path: String,
        /// Operation
        #[arg(long, value_enum, default_value_t = PathOp::Read)]
        op: PathOp,
    },
}

#[derive(Subcommand)]
enum RuleCommands {
    /// List rules, including any restored from the state file
    List,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the resolved configuration and where each value came from
    Show {
        /// toml or json
        #[arg(long = "as", default_value = "toml")]
        show_format: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(status) => ExitCode::from(status),
        Err(e) => {
            eprintln!("{}", Theme::error(&format!("{e:#}")));
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let resolved = Config::load(cli.config.as_deref()).context("loading configuration")?;
    let log_config = config_bridge::log_config(&resolved.config.logging, cli.verbose)?;
    setup_logging(&log_config)?;

    match cli.command {
        Commands::Check { command } => handle_check(&resolved, command, cli.format).await,
        Commands::Exec {
            session,
            user,
            purpose,
            workdir,
            timeout_ms,
            command,
        } => {
            let stages = Stages::build(&resolved).await?;
            let args = ExecArgs {
                session,
                user,
                purpose,
                workdir,
                timeout_ms,
                command,
            };
            exec::run_exec(&resolved, &stages, args, cli.format).await
        },
        Commands::Rules {
            command: RuleCommands::List,
        } => {
            let stages = Stages::build(&resolved).await?;
            rules::list_rules(&stages.approvals.rules().list_rules(), cli.format)?;
            Ok(0)
        },
        Commands::Config {
            command: ConfigCommands::Show { show_format },
        } => {
            let format: ShowFormat = show_format.parse()?;
            config::show_config(&resolved, format)?;
            Ok(0)
        },
        Commands::Doctor => {
            let healthy = doctor::run_doctor(&resolved).await?;
            Ok(u8::from(!healthy))
        },
    }
}

async fn handle_check(
    resolved: &ResolvedConfig,
    command: CheckCommands,
    format: OutputFormat,
) -> Result<u8> {
    let stages = Stages::build(resolved).await?;
    let _guard = RequestContext::new("cli").with_operation("check").enter();
    let policy = &stages.policy;
    match command {
        CheckCommands::Command { command, args } => {
            check::check_command(policy, &command, &args, format)
        },
        CheckCommands::Line { line } => check::check_line(policy, &line, format),
        CheckCommands::Path { path, op } => check::check_path(policy, &path, op, format),
    }
}
