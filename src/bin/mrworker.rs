//! Worker process: a stateless loop that pulls a task from the
//! coordinator, executes it with a chosen application's map/reduce
//! functions, reports completion, and repeats until told the job is done.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use taskmr::mr::apps;
use taskmr::mr::config::{default_bind_addr, Config};
use tracing::error;

#[derive(Parser, Debug)]
#[command(about = "Worker for a miniature MapReduce job")]
struct Args {
    /// Which registered application's map/reduce functions to run.
    #[arg(long, default_value = "wc")]
    app: String,

    /// Coordinator address; defaults to a per-user loopback port.
    #[arg(long)]
    coordinator: Option<SocketAddr>,

    /// Directory input files live in and where output is written.
    #[arg(long, default_value = ".")]
    working_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let Some(app) = apps::lookup(&args.app) else {
        error!(app = %args.app, "unknown application, pass one of: wc, indexer");
        return ExitCode::FAILURE;
    };

    let config = Config {
        bind_addr: args.coordinator.unwrap_or_else(default_bind_addr),
        working_dir: args.working_dir,
        timeout_secs: taskmr::mr::task::DEFAULT_TIMEOUT_SECS,
    };

    match taskmr::mr::worker::run(app, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Transient RPC failure or unrecoverable read/encode failure:
            // no in-process retry, the coordinator's timeout covers the
            // dropped task.
            error!(%err, "worker exiting on unrecoverable error");
            ExitCode::FAILURE
        }
    }
}
