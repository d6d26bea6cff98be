#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Layered configuration for Warden.
//!
//! # Usage
//!
//! ```rust,no_run
//! use warden_config::Config;
//!
//! let resolved = Config::load(None).unwrap();
//! println!("sandbox image: {}", resolved.config.sandbox.image);
//! ```
//!
//! # Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Explicit** file passed with `--config`
//! 2. **User** (`~/.warden/config.toml`)
//! 3. **System** (`/etc/warden/config.toml`)
//! 4. **Environment** (`WARDEN_*`), only for fields no file has set
//! 5. **Embedded defaults** (`defaults.toml` compiled into the binary)
//!
//! This crate depends on no other Warden crate. Conversion into the policy,
//! approval and sandbox config types happens in the CLI.

/// Environment variable fallbacks.
pub mod env;
/// Configuration error types.
pub mod error;
/// Configuration file discovery and loading.
pub mod loader;
/// Layered merging with source tracking.
pub mod merge;
/// Resolved configuration display.
pub mod show;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::LoadOptions;
pub use merge::{ConfigLayer, FieldSources};
pub use show::{ResolvedConfig, ShowFormat};
pub use types::*;

impl Config {
    /// Load with the full precedence chain for the current process.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any config file is malformed, `explicit`
    /// does not exist, or the final configuration fails validation.
    pub fn load(explicit: Option<&std::path::Path>) -> ConfigResult<ResolvedConfig> {
        loader::load_with(&LoadOptions::from_process(explicit))
    }

    /// Load with caller-supplied discovery inputs.
    ///
    /// # Errors
    ///
    /// As [`Config::load`].
    pub fn load_with(options: &LoadOptions) -> ConfigResult<ResolvedConfig> {
        loader::load_with(options)
    }

    /// Load a single file over the defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, parsed, or fails
    /// validation.
    pub fn load_file(path: &std::path::Path) -> ConfigResult<Self> {
        loader::load_file(path)
    }
}
