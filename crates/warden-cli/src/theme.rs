//! Terminal styling.

use colored::Colorize;
use warden_core::RiskLevel;

const BOX_WIDTH: usize = 64;

pub(crate) struct Theme;

impl Theme {
    pub(crate) fn header(text: &str) -> String {
        text.bold().cyan().to_string()
    }

    pub(crate) fn success(text: &str) -> String {
        format!("{} {text}", "✓".green())
    }

    pub(crate) fn error(text: &str) -> String {
        format!("{} {}", "✗".red(), text.red())
    }

    pub(crate) fn warning(text: &str) -> String {
        format!("{} {}", "!".yellow(), text.yellow())
    }

    pub(crate) fn dimmed(text: &str) -> String {
        text.dimmed().to_string()
    }

    pub(crate) fn kv(key: &str, value: &str) -> String {
        format!("{}: {value}", key.bold())
    }

    pub(crate) fn risk_level(level: RiskLevel) -> String {
        let label = level.as_str();
        match level {
            RiskLevel::Low => label.green().to_string(),
            RiskLevel::Medium => label.yellow().to_string(),
            RiskLevel::High => label.red().to_string(),
            RiskLevel::Critical => label.red().bold().to_string(),
        }
    }

    /// A box whose border color follows `risk`.
    pub(crate) fn approval_box(title: &str, lines: &[String], risk: RiskLevel) -> String {
        let paint = |s: &str| match risk {
            RiskLevel::Low => s.green().to_string(),
            RiskLevel::Medium => s.yellow().to_string(),
            RiskLevel::High => s.red().to_string(),
            RiskLevel::Critical => s.red().bold().to_string(),
        };
        let inner = BOX_WIDTH.saturating_sub(2);
        let pad = |text: &str| {
            let fill = inner.saturating_sub(2).saturating_sub(visible_len(text));
            format!("{} {text}{} {}", paint("│"), " ".repeat(fill), paint("│"))
        };

        let mut out = vec![
            paint(&format!("╭{}╮", "─".repeat(inner))),
            pad(&title.bold().to_string()),
            paint(&format!("├{}┤", "─".repeat(inner))),
        ];
        out.extend(lines.iter().map(|line| pad(line)));
        out.push(paint(&format!("╰{}╯", "─".repeat(inner))));
        out.join("\n")
    }
}

/// Character count ignoring ANSI escape sequences.
fn visible_len(s: &str) -> usize {
    let mut len: usize = 0;
    let mut in_escape = false;
    for c in s.chars() {
        if in_escape {
            in_escape = !c.is_ascii_alphabetic();
        } else if c == '\x1b' {
            in_escape = true;
        } else {
            len = len.saturating_add(1);
        }
    }
    len
}
