//! Worker-side execution: the map shuffle-and-partition step, the reduce
//! sort-and-group step, and the request/dispatch/report loop that drives
//! both against a coordinator.

use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context as _};
use serde::{Deserialize, Serialize};
use tarpc::{client, context, tokio_serde::formats::Json};
use tracing::{info, warn};

use crate::mr::apps::Application;
use crate::mr::config::Config;
use crate::mr::hash;
use crate::mr::rpc::{self, ServiceClient, TaskType, WorkerCmd};

/// A single emitted pair, as it is written to and read back from
/// intermediate shards. One JSON object per record (`serde_json`'s
/// streaming deserializer reads them back without an outer array).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyValue {
    key: String,
    value: String,
}

/// Polling backoff applied after a `Wait` reply, so an idle worker doesn't
/// peg the coordinator with a tight RPC loop.
const WAIT_BACKOFF: Duration = Duration::from_millis(100);

/// Connects to the coordinator at `config.bind_addr` and runs the
/// request/execute/report loop until the coordinator signals the job is
/// done or the RPC transport fails.
pub async fn run(app: Application, config: Config) -> anyhow::Result<()> {
    let pid = std::process::id();
    let transport = tarpc::serde_transport::tcp::connect(config.bind_addr, Json::default)
        .await
        .with_context(|| format!("connecting to coordinator at {}", config.bind_addr))?;
    let client = ServiceClient::new(client::Config::default(), transport).spawn();

    loop {
        let reply = client
            .get_task(context::current(), pid, None)
            .await
            .context("GetTask RPC failed")?;

        match reply.cmd {
            WorkerCmd::Wait => {
                tokio::time::sleep(WAIT_BACKOFF).await;
                continue;
            }
            WorkerCmd::Done => {
                info!(pid, "job done, exiting");
                return Ok(());
            }
            WorkerCmd::Process => {}
        }

        match reply.task_type {
            TaskType::Map => {
                let file_path = reply
                    .file_path
                    .clone()
                    .context("Map task reply missing file_path")?;
                run_map(
                    app,
                    &config.working_dir,
                    pid,
                    reply.task_index,
                    reply.n_reduce,
                    &file_path,
                )
                .await?;
            }
            TaskType::Reduce => {
                run_reduce(
                    app,
                    &config.working_dir,
                    pid,
                    reply.task_index,
                    reply.n_map,
                )
                .await?;
            }
            TaskType::None => {
                warn!("coordinator replied Process with TaskType::None, ignoring");
                continue;
            }
        }

        client
            .finish_task(context::current(), pid, reply.task_type, reply.task_index, None)
            .await
            .context("FinishTask RPC failed")?;
    }
}

/// Read the input file, run the user map function, and fan its emissions
/// out to `n_reduce` temp shards partitioned by `fnv1a32(key) & 0x7fffffff
/// mod n_reduce`. Does not rename — the coordinator does that on
/// `FinishTask`.
async fn run_map(
    app: Application,
    working_dir: &Path,
    pid: u32,
    index: i64,
    n_reduce: usize,
    file_path: &str,
) -> anyhow::Result<()> {
    let working_dir = working_dir.to_path_buf();
    let file_path = file_path.to_string();
    tokio::task::spawn_blocking(move || {
        map_blocking(app, &working_dir, pid, index, n_reduce, &file_path)
    })
    .await
    .context("map task panicked")??;
    Ok(())
}

fn map_blocking(
    app: Application,
    working_dir: &Path,
    pid: u32,
    index: i64,
    n_reduce: usize,
    file_path: &str,
) -> anyhow::Result<()> {
    if n_reduce == 0 {
        bail!("n_reduce must be positive");
    }
    let input_path = working_dir.join(file_path);
    let contents = std::fs::read_to_string(&input_path)
        .with_context(|| format!("reading map input {}", input_path.display()))?;
    let pairs = (app.map)(file_path, &contents);

    let mut shards: Vec<std::fs::File> = (0..n_reduce)
        .map(|r| {
            let path = rpc::tmp_intermediate_file(working_dir, index, r, pid);
            std::fs::File::create(&path)
                .with_context(|| format!("creating temp shard {}", path.display()))
        })
        .collect::<anyhow::Result<_>>()?;

    let mut cached: Option<(String, usize)> = None;
    for (key, value) in pairs {
        let r = match &cached {
            Some((k, r)) if *k == key => *r,
            _ => {
                let r = hash::partition(&key, n_reduce);
                cached = Some((key.clone(), r));
                r
            }
        };
        let kv = KeyValue { key, value };
        serde_json::to_writer(&mut shards[r], &kv).context("encoding intermediate record")?;
    }

    for file in &mut shards {
        file.flush().context("flushing temp shard")?;
    }
    info!(pid, index, n_reduce, "map task complete, temp shards written");
    Ok(())
}

/// Read all `n_map` intermediate shards for this reduce bucket, sort by
/// key, group contiguous runs, and invoke the user reduce function once per
/// group, writing `"<key> <result>\n"` lines to a temp output file.
async fn run_reduce(
    app: Application,
    working_dir: &Path,
    pid: u32,
    index: i64,
    n_map: usize,
) -> anyhow::Result<()> {
    let working_dir = working_dir.to_path_buf();
    tokio::task::spawn_blocking(move || reduce_blocking(app, &working_dir, pid, index, n_map))
        .await
        .context("reduce task panicked")??;
    Ok(())
}

fn reduce_blocking(
    app: Application,
    working_dir: &Path,
    pid: u32,
    index: i64,
    n_map: usize,
) -> anyhow::Result<()> {
    let mut buffer: Vec<KeyValue> = Vec::new();
    for m in 0..n_map {
        let path = rpc::intermediate_file(working_dir, m as i64, index as usize);
        let file = std::fs::File::open(&path)
            .with_context(|| format!("opening intermediate shard {}", path.display()))?;
        let reader = BufReader::new(file);
        for record in serde_json::Deserializer::from_reader(reader).into_iter::<KeyValue>() {
            buffer.push(record.context("decoding intermediate record")?);
        }
    }

    buffer.sort_by(|a, b| a.key.cmp(&b.key));

    let tmp_path: PathBuf = rpc::tmp_output_file(working_dir, index, pid);
    let mut out = std::fs::File::create(&tmp_path)
        .with_context(|| format!("creating temp output {}", tmp_path.display()))?;

    let mut i = 0;
    while i < buffer.len() {
        let mut j = i;
        while j < buffer.len() && buffer[j].key == buffer[i].key {
            j += 1;
        }
        let values: Vec<String> = buffer[i..j].iter().map(|kv| kv.value.clone()).collect();
        let result = (app.reduce)(&buffer[i].key, &values);
        writeln!(out, "{} {}", buffer[i].key, result).context("writing reduce output")?;
        i = j;
    }
    out.flush().context("flushing temp output")?;
    info!(pid, index, n_map, "reduce task complete, temp output written");
    Ok(())
}
