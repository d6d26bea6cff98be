//! `warden doctor`: check that every stage can start.

use anyhow::Result;
use colored::Colorize;
use warden_config::ResolvedConfig;

use crate::theme::Theme;
use crate::wiring::Stages;

pub(crate) async fn run_doctor(resolved: &ResolvedConfig) -> Result<bool> {
    println!("{}", Theme::header("Warden Doctor"));
    println!();
    let mut healthy = true;

    print!("  Configuration... ");
    if resolved.loaded_files.is_empty() {
        println!("{} (defaults only)", "OK".green());
    } else {
        println!("{}", "OK".green());
        for file in &resolved.loaded_files {
            println!("    {}", Theme::dimmed(file));
        }
    }

    print!("  Policy and approvals... ");
    let stages = match Stages::build(resolved).await {
        Ok(stages) => {
            println!(
                "{} (root {}, {} rules)",
                "OK".green(),
                stages.policy.workspace_root().display(),
                stages.approvals.rules().len()
            );
            stages
        },
        Err(e) => {
            println!("{}", "FAIL".red());
            println!("    {e:#}");
            return Ok(false);
        },
    };

    print!("  Container runtime... ");
    match stages.sandbox(resolved) {
        Ok(sandbox) => {
            println!("{} ({})", "OK".green(), sandbox.config().runtime_binary);
            print!("  Daemon and image {}... ", sandbox.config().image);
            if sandbox.is_available().await {
                println!("{}", "OK".green());
            } else {
                println!("{}", "FAIL".red());
                println!("    the daemon is unreachable or the image cannot be pulled");
                healthy = false;
            }
        },
        Err(e) => {
            println!("{}", "FAIL".red());
            println!("    {e}");
            healthy = false;
        },
    }

    println!();
    if healthy {
        println!("{}", "Warden is ready.".green().bold());
    } else {
        println!(
            "{}",
            "Commands will be refused until the issues above are fixed."
                .yellow()
                .bold()
        );
    }
    Ok(healthy)
}
