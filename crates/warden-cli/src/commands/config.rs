//! `warden config show`.

use anyhow::Result;
use warden_config::{ResolvedConfig, ShowFormat};

pub(crate) fn show_config(resolved: &ResolvedConfig, format: ShowFormat) -> Result<()> {
    print!("{}", resolved.render(format)?);
    Ok(())
}
