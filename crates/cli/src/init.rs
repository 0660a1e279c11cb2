use anyhow::{bail, Context, Result};
use organizer_core::config::DEFAULT_CONFIG_TOML;
use std::path::Path;

/// Writes the default configuration to `path`. Existing files are left alone.
pub fn write_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("{} already exists; not overwriting", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    std::fs::write(path, DEFAULT_CONFIG_TOML).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
