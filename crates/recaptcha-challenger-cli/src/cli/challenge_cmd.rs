//! `recaptcha-challenger challenge`: open a page and solve its checkbox widget.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde::Serialize;

use recaptcha_challenger::{
    face_the_checkbox, ChallengeFactory, ChallengePage, ChallengeStyle, Challenger, Outcome,
};

use crate::browser::{launch, BrowserOptions, ChromiumPage};
use crate::config;

pub const DEMO_URL: &str = "https://www.google.com/recaptcha/api2/demo";

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const CHECKBOX_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Inputs of one `challenge` invocation.
#[derive(Debug, Clone)]
pub struct ChallengeArgs {
    pub style: String,
    pub url: String,
    pub cache_dir: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub lang: Option<String>,
    pub screenshot: bool,
    pub headed: bool,
    pub chromium: Option<PathBuf>,
    pub proxy: Option<String>,
}

/// What the command prints on completion.
#[derive(Debug, Clone, Serialize)]
pub struct ChallengeReport {
    pub style: ChallengeStyle,
    pub outcome: Outcome,
    pub response: Option<String>,
    pub elapsed_secs: f64,
}

/// Browser UI locale matching an alias table language.
pub fn browser_locale(lang: &str) -> String {
    match lang {
        "en" => "en-US".to_string(),
        "zh" => "zh-CN".to_string(),
        other => other.to_string(),
    }
}

/// Probe the checkbox, run the challenger and time the attempt.
pub async fn motion(
    page: &dyn ChallengePage,
    challenger: &mut Challenger,
    probe_timeout: Duration,
) -> Result<ChallengeReport> {
    let start = Instant::now();
    if !face_the_checkbox(page, probe_timeout).await? {
        bail!("No reCAPTCHA checkbox on the page");
    }

    let outcome = challenger
        .run(page)
        .await
        .with_context(|| format!("{} challenge failed", challenger.style()))?;
    let elapsed_secs = start.elapsed().as_secs_f64();

    tracing::info!(
        elapsed = format!("{elapsed_secs:.2}s"),
        style = %challenger.style(),
        %outcome,
        response = challenger.response().unwrap_or_default(),
        "Challenge finished"
    );

    Ok(ChallengeReport {
        style: challenger.style(),
        outcome,
        response: challenger.response().map(str::to_string),
        elapsed_secs,
    })
}

pub async fn run(args: ChallengeArgs) -> Result<ChallengeReport> {
    let mut settings = config::load_settings(args.config.as_deref())?;
    if let Some(lang) = args.lang {
        settings.lang = lang;
    }
    if args.screenshot {
        settings.screenshot = true;
    }

    let cache_root = config::resolve_cache_dir(args.cache_dir.as_deref());
    config::ensure_cache_root(&cache_root)?;
    let model_dir = config::resolve_model_dir(args.model_dir.as_deref());

    let options = BrowserOptions {
        headless: !args.headed,
        lang: browser_locale(&settings.lang),
        executable: args.chromium,
        proxy: args.proxy,
    };

    let mut challenger = ChallengeFactory::new()
        .with_settings(settings)
        .create(&args.style, &cache_root, Some(&model_dir))?;

    let (mut browser, handler) = launch(&options).await?;
    let result = async {
        let tab = browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;
        let page = ChromiumPage::new(tab);
        page.goto(&args.url, NAVIGATION_TIMEOUT).await?;
        motion(&page, &mut challenger, CHECKBOX_PROBE_TIMEOUT).await
    }
    .await;

    if let Err(e) = browser.close().await {
        tracing::debug!("Browser close failed: {e}");
    }
    handler.abort();
    result
}
