//! `schedulerd` — the scheduler server binary.
//!
//! Grounded on `own-ai-app`'s `lib.rs` setup sequence (init logging, build
//! the scheduler, load and register tasks, start it) and
//! `original_source/server/service.go::program.run`'s ordering (config ->
//! tasks load -> scheduler start -> transport -> wait for signal), adapted
//! from a Tauri app's `setup` closure into a plain `main`.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use schedulerd_core::config::Config;
use schedulerd_core::service::{Core, TaskManager as _};
use schedulerd_core::transport;

#[derive(Parser, Debug)]
#[command(name = "schedulerd", about = "Cron-driven task scheduler daemon")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Run the scheduler without binding a transport; useful for embedding
    /// or for tests that drive the `Core` directly.
    #[arg(long)]
    no_listen: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    let addr: SocketAddr = format!("{}:{}", config.server_address, config.server_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid server_address/server_port: {e}"))?;

    let core = Core::new(config.clone()).await?;
    core.bootstrap_scheduler().await?;
    tracing::info!(
        tasks = core.tasks_list().await?.len(),
        "scheduler started"
    );

    if args.no_listen {
        tracing::info!("--no-listen set, running scheduler without a transport");
        tokio::signal::ctrl_c().await?;
        return Ok(());
    }

    tokio::select! {
        result = transport::serve(core.clone(), &config, addr) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
    }

    Ok(())
}
