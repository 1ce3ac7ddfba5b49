use anyhow::Result;
use detect::console::wait_for_enter;
use std::{env, path::PathBuf, process, sync::Arc};
use structopt::StructOpt;
use tracing::{error, info_span, Instrument};
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};
use train::config::Config;

#[derive(Debug, Clone, StructOpt)]
/// Train the MMOD detector, then run it over the report directory
struct Args {
    #[structopt(parse(from_os_str))]
    /// directory containing training.xml and optionally testing.xml
    pub data_dir: Option<PathBuf>,
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

    // print usage without a data directory
    let data_dir = match Args::from_args().data_dir {
        Some(dir) => dir,
        None => {
            let _ = Args::clap().print_help();
            println!();
            return;
        }
    };

    let config = Config::locate();
    let pause_on_error = config
        .as_ref()
        .map(|config| config.pause_on_error)
        .unwrap_or(false);

    if let Err(err) = run(config, data_dir).await {
        error!("{:#}", err);
        if pause_on_error {
            let _ = wait_for_enter("press Enter to exit");
        }
        process::exit(1);
    }
}

async fn run(config: Result<Config>, data_dir: PathBuf) -> Result<()> {
    let config = Arc::new(config?);
    train::start(config, &data_dir)
        .instrument(info_span!("train"))
        .await?;
    Ok(())
}
