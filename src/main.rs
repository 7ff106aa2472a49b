//! `signerd`: keeps a fleet of DNS zones signed.
//!
//! Reads the engine configuration, loads the zone inventory and runs the
//! engine until SIGTERM, SIGINT or a `stop` command.

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use tracing::info;

use signerd::builders::EngineBuilder;
use signerd::config::EngineConfig;
use signerd::core::AppResult;
use signerd::util::init_tracing_with;

const CONFIG_ENV: &str = "SIGNERD_CONFIG";

#[derive(Parser, Debug)]
#[command(name = "signerd", version, about = "DNSSEC zone signing scheduler", long_about = None)]
struct Args {
    /// Engine configuration file (JSON); falls back to $SIGNERD_CONFIG
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `signerd=trace`; overrides RUST_LOG
    #[arg(short, long)]
    log_level: Option<String>,

    /// Override the number of worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Override the number of drudger threads
    #[arg(long)]
    drudgers: Option<usize>,
}

fn main() -> AppResult<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing_with(args.log_level.as_deref());

    let path = args
        .config
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .context("no configuration file given (use --config or SIGNERD_CONFIG)")?;
    let mut config =
        EngineConfig::load(&path).map_err(|e| anyhow::anyhow!("loading {}: {e}", path.display()))?;
    if let Some(workers) = args.workers {
        config.worker_threads = workers;
    }
    if let Some(drudgers) = args.drudgers {
        config.drudger_threads = drudgers;
    }

    info!(
        config = %path.display(),
        workers = config.worker_threads,
        drudgers = config.drudger_threads,
        "starting signerd"
    );
    let mut engine = EngineBuilder::new(config).build()?;
    engine.run()?;
    info!("signerd stopped");
    Ok(())
}
