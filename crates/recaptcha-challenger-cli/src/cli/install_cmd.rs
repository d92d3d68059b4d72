//! `recaptcha-challenger install`: download the tile classification model.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use recaptcha_challenger::classifier::default_model_path;
use recaptcha_challenger::{AssetFetcher, HttpAssetFetcher};

use crate::config;

/// Models are large; allow a slow mirror.
const MODEL_DOWNLOAD_TIMEOUT_SECS: u64 = 600;

/// Download the ONNX model from `url` into the model directory.
///
/// An existing model is kept unless `force` is set.
pub async fn run(url: &str, model_dir: Option<&Path>, force: bool) -> Result<PathBuf> {
    let model_dir = config::resolve_model_dir(model_dir);
    install(&HttpAssetFetcher::new(MODEL_DOWNLOAD_TIMEOUT_SECS), url, &model_dir, force).await
}

pub async fn install(
    fetcher: &dyn AssetFetcher,
    url: &str,
    model_dir: &Path,
    force: bool,
) -> Result<PathBuf> {
    let dest = default_model_path(model_dir);
    if dest.exists() && !force {
        println!("Model already installed: {}", dest.display());
        return Ok(dest);
    }

    std::fs::create_dir_all(model_dir)
        .with_context(|| format!("failed to create {}", model_dir.display()))?;
    let partial = dest.with_extension("onnx.part");
    tracing::info!("Downloading model from {url}");
    let bytes = fetcher
        .download(url, &partial)
        .await
        .with_context(|| format!("failed to download model from {url}"))?;
    std::fs::rename(&partial, &dest)
        .with_context(|| format!("failed to move model into {}", dest.display()))?;

    println!("Installed {} ({bytes} bytes)", dest.display());
    Ok(dest)
}
