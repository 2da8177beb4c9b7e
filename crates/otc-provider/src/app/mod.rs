//! cli commands of the otc provider.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use otc_client::{Config, ConfigSource};
use otc_engine::Provider;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// top-level cli definition.
#[derive(Parser, Debug)]
#[command(name = "otc-provider")]
#[command(about = "Open Telekom Cloud provider plugin")]
pub(crate) struct Cli {
    /// yaml or json file with provider options; overrides the environment.
    #[arg(short = 'c', long, global = true)]
    pub(crate) config: Option<PathBuf>,
    /// write logs here instead of stderr.
    #[arg(long, global = true, env = "OTC_LOG_FILE")]
    pub(crate) log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

/// cli subcommands.
#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// answer json-lines requests on stdin until it closes.
    Serve,
    /// print the provider schema as json.
    Schema {
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
    /// validate provider options and authenticate once.
    CheckConfig,
}

pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve => {
            let base = load_source(ConfigSource::from_env(), cli.config.as_deref())?;
            let provider = Arc::new(Provider::new(otc_resources::registry(), base));
            info!("serving plugin protocol on stdio");
            otc_engine::serve(provider, tokio::io::stdin(), tokio::io::stdout())
                .await
                .context("serve plugin protocol")?;
        }
        Command::Schema { output } => {
            let raw = schema_json()?;
            match output {
                Some(path) => std::fs::write(&path, raw)
                    .with_context(|| format!("write schema: {}", path.display()))?,
                None => println!("{raw}"),
            }
        }
        Command::CheckConfig => {
            let source = load_source(ConfigSource::from_env(), cli.config.as_deref())?;
            let config = check_config(&source).await?;
            println!("ok: authenticated in region {}", config.default_region());
        }
    }
    Ok(())
}

/// environment options with the optional config file layered on top.
fn load_source(env: ConfigSource, file: Option<&Path>) -> Result<ConfigSource> {
    match file {
        Some(path) => Ok(env.overlay(ConfigSource::from_file(path)?)),
        None => Ok(env),
    }
}

/// pretty printed schema of every resource and data source.
fn schema_json() -> Result<String> {
    let schema = otc_resources::registry().schema();
    serde_json::to_string_pretty(&schema).context("encode provider schema")
}

async fn check_config(source: &ConfigSource) -> Result<Config> {
    let config = Config::from_source(source).context("invalid provider options")?;
    config.authenticate().await.context("authentication failed")?;
    Ok(config)
}

/// log to stderr, or to `log_file` without colors; stdout is the protocol channel.
pub(crate) fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_env("OTC_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file: {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
