//! Output modes.

use clap::ValueEnum;
use serde::Serialize;

/// How command results are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Colored text for people.
    #[default]
    Pretty,
    /// One JSON document on stdout.
    Json,
}

/// Print `value` as pretty JSON.
pub(crate) fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
