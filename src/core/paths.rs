use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Base rollout config directory (~/.config/rollout/)
pub fn rollout() -> Result<PathBuf> {
    let home = env::var("HOME").map_err(|_| {
        Error::internal_unexpected("HOME environment variable not set".to_string())
    })?;
    Ok(PathBuf::from(home).join(".config").join("rollout"))
}

/// Environments directory
pub fn environments() -> Result<PathBuf> {
    Ok(rollout()?.join("environments"))
}

/// Environment config file path
pub fn environment(name: &str) -> Result<PathBuf> {
    Ok(environments()?.join(format!("{}.json", name)))
}
