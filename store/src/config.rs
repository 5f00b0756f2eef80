//! Configuration file loading (spec §6), wrapping `roux_core::types::Config`
//! with the actual file I/O and path resolution.

use roux_core::error::RouxError;
use roux_core::types::Config;
use std::path::Path;

pub fn load(path: &Path) -> Result<Config, RouxError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| RouxError::provider_error(format!("failed to read config {}: {e}", path.display())))?;
    toml::from_str(&text).map_err(|e| RouxError::invalid_input(format!("invalid config: {e}")))
}

/// A default config pointing at `source_path`, used when no config file is
/// given on the command line.
pub fn default_for_source(source_path: &str) -> Config {
    toml::from_str(&format!("[source]\npath = \"{source_path}\"\n")).expect("default config is well-formed")
}
