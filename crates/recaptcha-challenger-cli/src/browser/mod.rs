//! Browser launch and the Chromium page adapter.

pub mod chromium;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::task::JoinHandle;

pub use chromium::{find_chromium, ChromiumPage};

/// How to launch Chromium.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    /// Browser UI language; the widget follows it.
    pub lang: String,
    pub executable: Option<PathBuf>,
    pub proxy: Option<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            lang: "en-US".to_string(),
            executable: None,
            proxy: None,
        }
    }
}

/// Launch Chromium and spawn its CDP event loop.
pub async fn launch(options: &BrowserOptions) -> Result<(Browser, JoinHandle<()>)> {
    let chrome_path = options
        .executable
        .clone()
        .or_else(find_chromium)
        .context("Chromium not found. Set RECAPTCHA_CHROMIUM_PATH or install Chrome.")?;
    tracing::debug!("Launching Chromium from {}", chrome_path.display());

    let mut builder = BrowserConfig::builder()
        .chrome_executable(chrome_path)
        .window_size(1280, 900)
        .arg(format!("--lang={}", options.lang))
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-blink-features=AutomationControlled")
        // Keep cross-origin widget frames inside the page target.
        .arg("--disable-site-isolation-trials")
        .arg("--disable-features=IsolateOrigins,site-per-process");
    if options.headless {
        builder = builder.arg("--headless=new");
    } else {
        builder = builder.with_head();
    }
    if let Some(proxy) = &options.proxy {
        builder = builder.arg(format!("--proxy-server={proxy}"));
    }
    let config = builder
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .context("failed to launch Chromium")?;

    let handle = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                tracing::debug!("CDP handler error: {e}");
            }
        }
    });

    Ok((browser, handle))
}
