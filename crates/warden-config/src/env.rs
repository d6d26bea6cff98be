//! Environment variable fallbacks.
//!
//! A `WARDEN_*` variable only fills a field that no config file has set. A
//! value written in any file always wins over the environment.

use std::collections::HashMap;

use tracing::debug;

use crate::merge::{ConfigLayer, FieldSources};

/// Prefix of every variable this crate reads.
pub const ENV_PREFIX: &str = "WARDEN_";

/// Variable name to dotted field path.
const ENV_FIELDS: &[(&str, &str)] = &[
    ("WARDEN_LOG_LEVEL", "logging.level"),
    ("WARDEN_LOG_FORMAT", "logging.format"),
    ("WARDEN_LOG_DIR", "logging.log_dir"),
    ("WARDEN_SANDBOX_IMAGE", "sandbox.image"),
    ("WARDEN_DOCKER_BINARY", "sandbox.runtime"),
    ("WARDEN_WORKSPACE", "policy.workspace_root"),
    ("WARDEN_STATE_FILE", "approval.state_file"),
];

/// Snapshot the `WARDEN_*` variables of the current process.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(key, _)| key.starts_with(ENV_PREFIX))
        .collect()
}

/// Apply fallbacks to `merged` for fields still at their default.
///
/// Returns the number of fields set.
pub fn apply_env_fallbacks(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env: &HashMap<String, String>,
) -> usize {
    let mut applied: usize = 0;
    for (var, field) in ENV_FIELDS {
        let Some(value) = env.get(*var) else {
            continue;
        };
        let at_default = sources
            .get(*field)
            .is_none_or(|layer| *layer == ConfigLayer::Defaults);
        if !at_default {
            debug!(var, field, "config file value takes precedence over env");
            continue;
        }
        if set_string(merged, field, value) {
            sources.insert((*field).to_owned(), ConfigLayer::Environment);
            applied = applied.saturating_add(1);
        }
    }
    applied
}

fn set_string(root: &mut toml::Value, dotted: &str, value: &str) -> bool {
    let mut node = root;
    let mut parts = dotted.split('.').peekable();
    while let Some(part) = parts.next() {
        let Some(table) = node.as_table_mut() else {
            return false;
        };
        if parts.peek().is_none() {
            table.insert(part.to_owned(), toml::Value::String(value.to_owned()));
            return true;
        }
        node = table
            .entry(part.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
    false
}
