//! Resolved configuration display.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources};
use crate::types::Config;

/// A loaded configuration plus where each value came from.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// The final configuration.
    pub config: Config,
    /// Layer that set each dotted leaf path.
    pub field_sources: FieldSources,
    /// Files that contributed, lowest precedence first.
    pub loaded_files: Vec<String>,
}

/// Output format for [`ResolvedConfig::render`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShowFormat {
    /// TOML, annotated with a header listing loaded files.
    #[default]
    Toml,
    /// JSON including field sources.
    Json,
}

impl FromStr for ShowFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::ValidationError {
                field: "format".to_owned(),
                message: format!("unknown format '{other}'; expected toml or json"),
            }),
        }
    }
}

impl fmt::Display for ShowFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Toml => "toml",
            Self::Json => "json",
        })
    }
}

impl ResolvedConfig {
    /// Layer that set `field`, if known.
    #[must_use]
    pub fn source_of(&self, field: &str) -> Option<&ConfigLayer> {
        self.field_sources.get(field)
    }

    /// Render for display.
    ///
    /// # Errors
    ///
    /// [`ConfigError::SerializeError`] if rendering fails.
    pub fn render(&self, format: ShowFormat) -> ConfigResult<String> {
        match format {
            ShowFormat::Toml => {
                let body = toml::to_string_pretty(&self.config)
                    .map_err(|e| ConfigError::SerializeError(e.to_string()))?;
                let mut out = String::new();
                if self.loaded_files.is_empty() {
                    out.push_str("# no config files loaded, showing defaults\n");
                } else {
                    for file in &self.loaded_files {
                        out.push_str("# loaded: ");
                        out.push_str(file);
                        out.push('\n');
                    }
                }
                let overridden = self
                    .field_sources
                    .iter()
                    .filter(|(_, layer)| **layer != ConfigLayer::Defaults);
                for (field, layer) in overridden {
                    out.push_str(&format!("# {field} <- {layer}\n"));
                }
                out.push('\n');
                out.push_str(&body);
                Ok(out)
            },
            ShowFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| ConfigError::SerializeError(e.to_string())),
        }
    }
}
