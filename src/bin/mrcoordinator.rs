//! Coordinator process: owns task state for one MapReduce job and serves it
//! over RPC until every task in both phases reaches `Done`.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use tarpc::server::{incoming::Incoming, BaseChannel};
use tarpc::tokio_serde::formats::Json;
use taskmr::mr::config::{default_bind_addr, Config};
use taskmr::mr::coordinator::Coordinator;
use taskmr::mr::rpc::Service as RpcService;
use tokio::time::sleep;
use tracing::info;

/// How often the main loop polls `Coordinator::done`.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(about = "Coordinator for a miniature MapReduce job")]
struct Args {
    /// Input files, one map task each.
    #[arg(required = true)]
    input: Vec<PathBuf>,

    /// Number of reduce tasks.
    #[arg(short = 'r', long, default_value_t = 10)]
    n_reduce: usize,

    /// Address to listen on; defaults to a per-user loopback port.
    #[arg(long)]
    bind: Option<std::net::SocketAddr>,

    /// Directory input files live in and where output is written.
    #[arg(long, default_value = ".")]
    working_dir: PathBuf,

    /// Seconds before a Processing task is considered abandoned.
    #[arg(long, default_value_t = taskmr::mr::task::DEFAULT_TIMEOUT_SECS)]
    timeout_secs: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config {
        bind_addr: args.bind.unwrap_or_else(default_bind_addr),
        working_dir: args.working_dir,
        timeout_secs: args.timeout_secs,
    };

    let files: Vec<String> = args
        .input
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();

    info!(
        n_map = files.len(),
        n_reduce = args.n_reduce,
        bind = %config.bind_addr,
        "starting coordinator"
    );

    let coordinator = Coordinator::new(files, args.n_reduce, &config);

    let listener = tarpc::serde_transport::tcp::listen(config.bind_addr, Json::default).await?;
    let server = coordinator.clone();
    tokio::spawn(
        listener
            .filter_map(|r| async { r.ok() })
            .map(BaseChannel::with_defaults)
            .execute(server.serve()),
    );

    info!("coordinator listening, waiting for workers");

    while !coordinator.done() {
        sleep(POLL_INTERVAL).await;
    }

    info!("job finished, coordinator exiting");
    Ok(())
}
