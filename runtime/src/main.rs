// Copyright 2026 Portal Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use captcha_vision::CaptchaClassifier;
use portal_runtime::config::{resolve_model_path, resolve_port, PortalConfig};
use portal_runtime::orchestrator::{self, AppContext};
use portal_runtime::protocol::{ScrapeRequest, Task};
use portal_runtime::renderer::chromium::ChromiumRenderer;
use portal_runtime::rest;

#[derive(Parser)]
#[command(
    name = "portal",
    about = "Score portal runtime: CAPTCHA login, session bridge and report extraction",
    version,
    after_help = "Run 'portal <command> --help' for details on each command."
)]
struct Cli {
    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Path to the CAPTCHA ONNX model (default: PORTAL_MODEL, ./model.onnx, ~/.portal/models/model.onnx)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Path to the Chromium binary (default: PORTAL_CHROMIUM_PATH, then discovery)
    #[arg(long, global = true)]
    chromium: Option<PathBuf>,

    /// Portal root URL (default: PORTAL_BASE_URL or the built-in portal)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Extraction mode: http or browser (default: PORTAL_EXTRACTION_MODE or http)
    #[arg(long, global = true)]
    mode: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Port to bind on 0.0.0.0 (default: PORT or 10000)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one scrape and print the response as JSON.
    ///
    /// The password is read from PORTAL_PASSWORD, or from the first line of
    /// stdin when unset.
    Scrape {
        /// Student account
        #[arg(long)]
        account: String,
        /// score, grades, both or test
        #[arg(long, default_value = "both")]
        task: String,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish)
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "portal", &mut std::io::stdout());
            Ok(())
        }
        Commands::Serve { port } => {
            let app = build_app(&cli)?;
            rest::start(resolve_port(*port), Arc::new(app)).await
        }
        Commands::Scrape { account, task } => {
            let task: Task = task.parse()?;
            let password = if task == Task::Test {
                String::new()
            } else {
                read_password()?
            };
            let request = ScrapeRequest {
                account: account.clone(),
                password,
                task,
            };
            let app = build_app(&cli)?;
            let response = orchestrator::execute(&app, &request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolve configuration and load the process-wide handles.
fn build_app(cli: &Cli) -> Result<AppContext> {
    let mut config = PortalConfig::from_env()?;
    if let Some(url) = &cli.base_url {
        config.base_url = url.clone();
    }
    if let Some(mode) = &cli.mode {
        config.extraction_mode = mode.parse()?;
    }
    if let Some(path) = &cli.chromium {
        config.chromium_path = Some(path.clone());
    }
    config.model_path = resolve_model_path(cli.model.as_deref());
    config.validate()?;

    let classifier = CaptchaClassifier::new(config.model_path.as_deref())
        .context("failed to load CAPTCHA model")?;
    if !classifier.has_model() {
        bail!(
            "CAPTCHA model not found at {}. Pass --model or set PORTAL_MODEL.",
            classifier.model_path().display()
        );
    }

    let renderer = ChromiumRenderer::new(config.chromium_path.as_ref())?;
    tracing::info!(
        base_url = %config.base_url,
        mode = ?config.extraction_mode,
        max_sessions = config.max_sessions,
        "portal runtime ready"
    );

    Ok(AppContext::new(
        config,
        Arc::new(classifier),
        Arc::new(renderer),
    ))
}

fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var("PORTAL_PASSWORD") {
        return Ok(password);
    }
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
