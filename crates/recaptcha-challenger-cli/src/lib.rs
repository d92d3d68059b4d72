//! recaptcha-challenger CLI: Chromium page adapter, configuration and subcommands.

pub mod browser;
pub mod cli;
pub mod config;

pub use browser::{find_chromium, launch, BrowserOptions, ChromiumPage};
pub use config::{load_settings, resolve_cache_dir, resolve_model_dir};
