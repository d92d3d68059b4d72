//! `recaptcha-challenger info`: print resolved paths and settings as JSON.

use std::path::Path;

use anyhow::Result;
use recaptcha_challenger::classifier::default_model_path;
use recaptcha_challenger::LabelAliases;

use crate::browser::find_chromium;
use crate::config;

/// Environment summary as a JSON value.
pub fn collect(
    config_path: Option<&Path>,
    cache_dir: Option<&Path>,
    model_dir: Option<&Path>,
) -> Result<serde_json::Value> {
    let settings = config::load_settings(config_path)?;
    let cache_dir = config::resolve_cache_dir(cache_dir);
    let model_dir = config::resolve_model_dir(model_dir);
    let model = default_model_path(&model_dir);
    let aliases = LabelAliases::default();

    Ok(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "styles": ["audio", "visual"],
        "cache_dir": cache_dir,
        "model_dir": model_dir,
        "model": model,
        "model_installed": model.exists(),
        "chromium": find_chromium(),
        "label_locales": aliases.locales(),
        "settings": settings,
    }))
}

pub fn run(
    config_path: Option<&Path>,
    cache_dir: Option<&Path>,
    model_dir: Option<&Path>,
) -> Result<()> {
    let info = collect(config_path, cache_dir, model_dir)?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
