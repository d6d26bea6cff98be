//! `warden rules list`.

use anyhow::Result;
use colored::Colorize;
use warden_approval::AutoApproveRule;

use crate::formatter::{OutputFormat, print_json};
use crate::theme::Theme;

pub(crate) fn list_rules(rules: &[AutoApproveRule], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(&rules);
    }

    println!("{}", Theme::header("Auto-approve rules"));
    if rules.is_empty() {
        println!("  {}", Theme::dimmed("none"));
        return Ok(());
    }
    for rule in rules {
        let state = if rule.enabled {
            "on".green()
        } else {
            "off".dimmed()
        };
        let categories = rule
            .categories
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "  [{state}] {}  {}",
            rule.name.bold(),
            Theme::dimmed(&rule.id.to_string())
        );
        println!(
            "        {} {}  up to {}  applied {}x",
            if rule.is_regex { "regex" } else { "exact" },
            rule.operation_pattern,
            Theme::risk_level(rule.max_risk_level),
            rule.apply_count
        );
        println!("        {}", Theme::dimmed(&categories));
        if !rule.description.is_empty() {
            println!("        {}", Theme::dimmed(&rule.description));
        }
    }
    Ok(())
}
