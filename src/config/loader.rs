// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{BatchConfig, RawBatchConfig};
use crate::errors::Result;

/// Load a batch file from a given path and return the raw `RawBatchConfig`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawBatchConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    load_from_str(&contents)
}

/// Deserialize a batch description from TOML text.
pub fn load_from_str(contents: &str) -> Result<RawBatchConfig> {
    let config: RawBatchConfig = toml::from_str(contents)?;
    Ok(config)
}

/// Load a batch file from path and validate it.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults for `[batch]` settings.
/// - Checks jobs (unique ids, command, working directory, log, markers,
///   durations) and workers (capacity, transport-specific options).
///
/// Verification hook identifiers are checked later against the caller's
/// hook registry (`BatchConfig::check_hooks`).
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<BatchConfig> {
    let raw_config = load_from_path(&path)?;
    let config = BatchConfig::try_from(raw_config)?;
    Ok(config)
}
