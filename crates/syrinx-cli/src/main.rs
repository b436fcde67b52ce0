use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use syrinx_core::Config;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(target_os = "windows")]
mod app;
#[cfg(target_os = "windows")]
mod input;

#[derive(Parser)]
#[command(name = "syrinx")]
#[command(about = "Remote loader with a named-pipe control surface")]
struct Args {
    /// Configuration file; defaults apply when it does not exist.
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Override the target process (and module) name from the config.
    #[arg(long)]
    process: Option<String>,

    /// Override the payload file name from the config.
    #[arg(long)]
    payload: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("syrinx_core=info".parse()?)
                .add_directive("syrinx_cli=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(c) => {
            info!("Loaded config from {:?}", args.config);
            c
        }
        Err(e) => {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        }
    };
    if let Some(process) = args.process {
        config.target_module = process.clone();
        config.target_process = process;
    }
    if let Some(payload) = args.payload {
        config.payload_file = payload;
    }

    run(config)
}

#[cfg(target_os = "windows")]
fn run(config: Config) -> Result<()> {
    app::run(config)
}

#[cfg(not(target_os = "windows"))]
fn run(_config: Config) -> Result<()> {
    anyhow::bail!("syrinx drives the Win32 injection and named-pipe APIs; this platform is unsupported")
}
