//! recaptcha-challenger: entry point.

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use recaptcha_challenger_cli::cli::challenge_cmd::{self, ChallengeArgs, DEMO_URL};
use recaptcha_challenger_cli::cli::{info_cmd, install_cmd};

#[derive(Parser)]
#[command(
    name = "recaptcha-challenger",
    about = "Solve reCAPTCHA checkbox challenges in a Chromium tab",
    version
)]
struct Cli {
    /// Settings JSON file. Also reads RECAPTCHA_CONFIG.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache root for audio assets and screenshots. Also reads RECAPTCHA_CACHE_DIR.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Directory holding the ONNX model. Also reads RECAPTCHA_MODEL_DIR.
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a page and solve its reCAPTCHA widget.
    Challenge {
        /// Challenge style (audio, visual).
        #[arg(short, long, default_value = "audio")]
        style: String,

        /// Page hosting the widget.
        #[arg(long, default_value = DEMO_URL)]
        url: String,

        /// Prompt language of the visual challenge (en, zh).
        #[arg(long)]
        lang: Option<String>,

        /// Save a screenshot of every classified tile.
        #[arg(long)]
        screenshot: bool,

        /// Show the browser window.
        #[arg(long)]
        headed: bool,

        /// Chromium executable. Also reads RECAPTCHA_CHROMIUM_PATH.
        #[arg(long)]
        chromium: Option<PathBuf>,

        /// Proxy server for the browser, e.g. http://127.0.0.1:7890.
        #[arg(long)]
        proxy: Option<String>,
    },

    /// Download the tile classification model.
    Install {
        /// Where to download the ONNX model from.
        #[arg(long)]
        url: String,

        /// Replace an existing model.
        #[arg(long)]
        force: bool,
    },

    /// Print resolved paths and settings as JSON.
    Info,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   recaptcha-challenger completions bash > ~/.local/share/bash-completion/completions/recaptcha-challenger
    ///   recaptcha-challenger completions zsh > ~/.zfunc/_recaptcha-challenger
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Challenge {
            style,
            url,
            lang,
            screenshot,
            headed,
            chromium,
            proxy,
        } => {
            let report = challenge_cmd::run(ChallengeArgs {
                style,
                url,
                cache_dir: cli.cache_dir,
                model_dir: cli.model_dir,
                config: cli.config,
                lang,
                screenshot,
                headed,
                chromium,
                proxy,
            })
            .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.outcome.is_success() {
                std::process::exit(1);
            }
        }

        Commands::Install { url, force } => {
            install_cmd::run(&url, cli.model_dir.as_deref(), force).await?;
        }

        Commands::Info => {
            info_cmd::run(
                cli.config.as_deref(),
                cli.cache_dir.as_deref(),
                cli.model_dir.as_deref(),
            )?;
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(
                shell,
                &mut cmd,
                "recaptcha-challenger",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}
