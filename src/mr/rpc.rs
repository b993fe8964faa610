//! RPC surface: the logical `GetTask`/`FinishTask`/`Example` contract,
//! the types sent over it, and the coordinator's file-naming scheme.
//!
//! The wire framing is `tarpc` over JSON — an implementation detail of the
//! transport collaborator. Only the shapes below are normative.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// What the coordinator is telling a worker to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerCmd {
    Process,
    Wait,
    Done,
}

/// Which phase a task (or a `FinishTask` report) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    Map,
    Reduce,
    /// Reported on `GetTask` once both phases are done; never legal on `FinishTask`.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTaskReply {
    pub cmd: WorkerCmd,
    pub task_type: TaskType,
    /// Input file for a `Map` task. Absent for `Reduce` (the worker
    /// synthesizes the `M` intermediate paths from `(task_index, m)`).
    pub file_path: Option<String>,
    pub task_index: i64,
    pub n_map: usize,
    pub n_reduce: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FinishTaskReply;

/// The RPC contract served by the coordinator and called by every worker.
#[tarpc::service]
pub trait Service {
    /// Ask for the next assignable task. `pid` and `request_id` are
    /// carried for diagnostics only; dispatch never depends on them.
    async fn get_task(pid: u32, request_id: Option<String>) -> GetTaskReply;

    /// Report that `task_index` of `task_type` has been computed and its
    /// temp output written. Triggers the background publish (§4.3) and
    /// returns immediately; the reply carries no information.
    async fn finish_task(
        pid: u32,
        task_type: TaskType,
        task_index: i64,
        request_id: Option<String>,
    ) -> FinishTaskReply;

    /// Inert scaffold RPC retained from the transport's example contract.
    async fn example(x: i32) -> i32;
}

/// Final map intermediate shard: `mr-<m>-<r>`.
pub fn intermediate_file(dir: &Path, m: i64, r: usize) -> PathBuf {
    dir.join(format!("mr-{m}-{r}"))
}

/// Temp map intermediate shard, disambiguated by worker pid: `mr-<m>-<r>.<pid>`.
pub fn tmp_intermediate_file(dir: &Path, m: i64, r: usize, pid: u32) -> PathBuf {
    dir.join(format!("mr-{m}-{r}.{pid}"))
}

/// Final reduce output: `mr-out-<r>`.
pub fn output_file(dir: &Path, r: i64) -> PathBuf {
    dir.join(format!("mr-out-{r}"))
}

/// Temp reduce output, disambiguated by worker pid: `mr-tmp-out-<r>.<pid>`.
pub fn tmp_output_file(dir: &Path, r: i64, pid: u32) -> PathBuf {
    dir.join(format!("mr-tmp-out-{r}.{pid}"))
}
