//! Config file discovery and layered loading.
//!
//! 1. Parse embedded `defaults.toml`
//! 2. Merge `/etc/warden/config.toml` (system)
//! 3. Merge `~/.warden/config.toml` (user)
//! 4. Merge the file passed on the command line, if any
//! 5. Apply `WARDEN_*` fallbacks for fields still at their default
//! 6. Deserialize and validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, deep_merge_tracking, record_leaves};
use crate::show::ResolvedConfig;
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
pub const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

const SYSTEM_CONFIG_PATH: &str = "/etc/warden/config.toml";

/// Inputs to [`load_with`].
///
/// [`LoadOptions::from_process`] reads the real home directory and
/// environment. Tests fill the fields directly.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Directory holding the user's `config.toml`. `None` means
    /// `~/.warden`.
    pub home_override: Option<PathBuf>,
    /// System config path. `None` means `/etc/warden/config.toml`.
    pub system_path: Option<PathBuf>,
    /// A file that must exist and is merged last.
    pub explicit_file: Option<PathBuf>,
    /// `WARDEN_*` variables.
    pub env: HashMap<String, String>,
}

impl LoadOptions {
    /// Options for the current process, with an optional explicit file.
    #[must_use]
    pub fn from_process(explicit_file: Option<&Path>) -> Self {
        Self {
            explicit_file: explicit_file.map(Path::to_path_buf),
            env: collect_env_vars(),
            ..Self::default()
        }
    }
}

/// Load the layered configuration.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any config file is malformed, the explicit
/// file is missing, or the merged configuration fails validation.
pub fn load_with(options: &LoadOptions) -> ConfigResult<ResolvedConfig> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    let mut field_sources = FieldSources::new();
    let mut loaded_files = Vec::new();
    record_leaves(&merged, "", &ConfigLayer::Defaults, &mut field_sources);

    let system_path = options
        .system_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(SYSTEM_CONFIG_PATH));
    let user_path = match &options.home_override {
        Some(dir) => dir.join("config.toml"),
        None => home_directory()?.join(".warden").join("config.toml"),
    };

    for (path, layer) in [(system_path, ConfigLayer::System), (user_path, ConfigLayer::User)] {
        if let Some(overlay) = try_load_file(&path)? {
            deep_merge_tracking(&mut merged, &overlay, "", &layer, &mut field_sources);
            info!(path = %path.display(), layer = %layer, "Loaded config");
            loaded_files.push(path.display().to_string());
        }
    }

    if let Some(path) = &options.explicit_file {
        let overlay = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        })?;
        deep_merge_tracking(
            &mut merged,
            &overlay,
            "",
            &ConfigLayer::Explicit,
            &mut field_sources,
        );
        info!(path = %path.display(), "Loaded explicit config");
        loaded_files.push(path.display().to_string());
    }

    let env_count = apply_env_fallbacks(&mut merged, &mut field_sources, &options.env);
    if env_count > 0 {
        debug!(count = env_count, "Applied environment fallbacks");
    }

    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;
    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
    })
}

/// Load a config from a single file on top of the defaults, without the
/// system, user or env layers.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed, or fails
/// validation.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let overlay = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
        path: path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
    })?;
    let config: Config = overlay
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            path: path.display().to_string(),
            source: e,
        })?;
    validate::validate(&config)?;
    Ok(config)
}

/// Read and parse `path`, or `None` if it does not exist.
///
/// A single read avoids racing a separate existence check.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    toml::from_str(&content)
        .map(Some)
        .map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            source: e,
        })
}

fn home_directory() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}
