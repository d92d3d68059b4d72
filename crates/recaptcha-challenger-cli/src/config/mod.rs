//! Configuration loading and resolution.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use recaptcha_challenger::ChallengeSettings;

pub const CACHE_DIR_ENV: &str = "RECAPTCHA_CACHE_DIR";
pub const MODEL_DIR_ENV: &str = "RECAPTCHA_MODEL_DIR";
pub const CONFIG_ENV: &str = "RECAPTCHA_CONFIG";

const DEFAULT_CACHE_DIR: &str = "datas/temp_cache";
const DEFAULT_MODEL_DIR: &str = "datas/models";

/// Flag first, then environment, then the default.
fn resolve_dir(explicit: Option<&Path>, env_value: Option<String>, default: &str) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match env_value {
        Some(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => PathBuf::from(default),
    }
}

/// Resolve the cache root shared by all challenge styles.
pub fn resolve_cache_dir(explicit: Option<&Path>) -> PathBuf {
    resolve_dir(explicit, std::env::var(CACHE_DIR_ENV).ok(), DEFAULT_CACHE_DIR)
}

/// Resolve the directory holding the ONNX model.
pub fn resolve_model_dir(explicit: Option<&Path>) -> PathBuf {
    resolve_dir(explicit, std::env::var(MODEL_DIR_ENV).ok(), DEFAULT_MODEL_DIR)
}

/// Settings file from the flag or the environment, if any.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit.map(Path::to_path_buf).or_else(|| {
        std::env::var(CONFIG_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
    })
}

/// Load settings, falling back to defaults when no file is configured.
pub fn load_settings(explicit: Option<&Path>) -> Result<ChallengeSettings> {
    match resolve_config_path(explicit) {
        Some(path) => {
            tracing::debug!("Loading settings from {}", path.display());
            ChallengeSettings::from_file(&path)
                .with_context(|| format!("failed to load settings from {}", path.display()))
        }
        None => Ok(ChallengeSettings::default()),
    }
}

/// Create the cache root if needed; the factory requires it to exist.
pub fn ensure_cache_root(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("failed to create cache directory {}", path.display()))
}
