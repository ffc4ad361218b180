//! homelink daemon executable
//!
//! Loads the XML configuration, wires the core services and runs the
//! scheduler and I/O loops on a single-threaded runtime until SIGINT.

use std::fs::File;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Context;
use clap::Parser;
use homelink_core::persist::FileStore;
use homelink_core::Services;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use xmltree::Element;

#[derive(Parser, Debug)]
#[command(name = "homelinkd", about = "KNX home-automation daemon", version)]
struct Args {
    /// Path to the XML configuration document.
    #[arg(short, long, default_value = "homelink.xml")]
    config: PathBuf,

    /// Directory for persisted object values.
    #[arg(long, default_value = "/var/lib/homelink")]
    store_dir: PathBuf,

    /// Log filter, e.g. `info` or `homelink_core=debug`.
    #[arg(long, default_value = "info")]
    log: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&args.log).context("invalid log filter")?,
        )
        .with_target(false)
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    info!("homelink daemon starting");

    let file = File::open(&args.config)
        .with_context(|| format!("cannot open {}", args.config.display()))?;
    let document = Element::parse(file).context("malformed configuration document")?;

    let services = Services::builder()
        .store(Rc::new(FileStore::new(&args.store_dir)))
        .build();
    services
        .import_config(&document)
        .context("configuration import failed")?;

    let timer_loop = services.spawn_timer_loop();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    services.shutdown();
    if timer_loop.await.is_err() {
        warn!("timer loop did not terminate cleanly");
    }

    info!("homelink daemon stopped");
    Ok(())
}
