use anyhow::{Context, Result};
use detect::{config::Config, console::wait_for_enter};
use std::{env, path::PathBuf, process, sync::Arc};
use structopt::StructOpt;
use tracing::{error, info_span, Instrument};
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};

#[derive(Debug, Clone, StructOpt)]
/// Run a trained detector over a directory of images
struct Args {
    #[structopt(long)]
    /// configuration file, overriding MMOD_CONFIG and mmod.json5
    pub config_file: Option<PathBuf>,
}

#[tokio::main]
pub async fn main() {
    // setup tracing
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).compact();
    let filter_layer = {
        let filter = EnvFilter::from_default_env();
        if env::var("RUST_LOG").is_err() {
            filter.add_directive(LevelFilter::INFO.into())
        } else {
            filter
        }
    };
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let Args { config_file } = Args::from_args();
    let config = match config_file {
        Some(path) => Config::open(&path)
            .with_context(|| format!("failed to load config file '{}'", path.display())),
        None => Config::locate(),
    };

    let pause_on_error = config
        .as_ref()
        .map(|config| config.pause_on_error)
        .unwrap_or(false);
    if let Err(err) = run(config).await {
        error!("{:#}", err);
        if pause_on_error {
            let _ = wait_for_enter("press Enter to exit");
        }
        process::exit(1);
    }
}

async fn run(config: Result<Config>) -> Result<()> {
    let config = Arc::new(config?);
    detect::start(config).instrument(info_span!("report")).await?;
    Ok(())
}
