//! The coordinator: owns the authoritative state of every task, serves
//! `GetTask`/`FinishTask`/`Example`, and runs the atomic publish protocol.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tarpc::context;
use tracing::{debug, warn};

use crate::mr::config::Config;
use crate::mr::error::PublishError;
use crate::mr::rpc::{
    self, FinishTaskReply, GetTaskReply, Service as RpcService, TaskType, WorkerCmd,
};
use crate::mr::task::TaskSet;

struct Inner {
    map_tasks: TaskSet,
    reduce_tasks: TaskSet,
    files: Vec<String>,
    working_dir: PathBuf,
}

/// The coordinator. Cheap to clone — every clone shares the same
/// [`TaskSet`]s and file list through an `Arc`, matching the per-call
/// `Clone` pattern `tarpc::server` expects.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// `files` becomes the map phase (one task per file, in order);
    /// `n_reduce` becomes the reduce phase's task count.
    pub fn new(files: Vec<String>, n_reduce: usize, config: &Config) -> Self {
        let map_tasks = TaskSet::with_timeout(files.len(), config.timeout_secs);
        let reduce_tasks = TaskSet::with_timeout(n_reduce, config.timeout_secs);
        tracing::info!(n_map = files.len(), n_reduce, "coordinator initialized");
        Self {
            inner: Arc::new(Inner {
                map_tasks,
                reduce_tasks,
                files,
                working_dir: config.working_dir.clone(),
            }),
        }
    }

    pub fn n_map(&self) -> usize {
        self.inner.map_tasks.len()
    }

    pub fn n_reduce(&self) -> usize {
        self.inner.reduce_tasks.len()
    }

    /// Polled periodically by the process driving the coordinator (its own
    /// `main` loop here) to learn when every task in both phases is `Done`.
    pub fn done(&self) -> bool {
        self.inner.map_tasks.done() && self.inner.reduce_tasks.done()
    }

    /// Core `GetTask` logic, independent of the RPC transport so it can be
    /// exercised directly in tests. Dispatch order is strictly
    /// map-then-reduce: reduce is never asked unless the map phase reports
    /// done.
    pub fn get_task(&self, pid: u32) -> GetTaskReply {
        let (index, cmd) = self.inner.map_tasks.get_idle_task();
        if cmd != crate::mr::task::DispatchCmd::Done {
            debug!(pid, index, ?cmd, "dispatching map");
            return GetTaskReply {
                cmd: to_wire_cmd(cmd),
                task_type: TaskType::Map,
                file_path: if index >= 0 {
                    Some(self.inner.files[index as usize].clone())
                } else {
                    None
                },
                task_index: index,
                n_map: self.n_map(),
                n_reduce: self.n_reduce(),
            };
        }

        let (index, cmd) = self.inner.reduce_tasks.get_idle_task();
        if cmd != crate::mr::task::DispatchCmd::Done {
            debug!(pid, index, ?cmd, "dispatching reduce");
            return GetTaskReply {
                cmd: to_wire_cmd(cmd),
                task_type: TaskType::Reduce,
                file_path: None,
                task_index: index,
                n_map: self.n_map(),
                n_reduce: self.n_reduce(),
            };
        }

        debug!(pid, "both phases done");
        GetTaskReply {
            cmd: WorkerCmd::Done,
            task_type: TaskType::None,
            file_path: None,
            task_index: -1,
            n_map: self.n_map(),
            n_reduce: self.n_reduce(),
        }
    }

    /// Initiates the publish step and returns immediately; the rename work
    /// happens on a spawned task so the RPC path is never blocked on I/O.
    pub fn finish_task(&self, pid: u32, task_type: TaskType, task_index: i64) -> FinishTaskReply {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.publish(task_type, task_index, pid).await {
                warn!(%err, pid, task_index, ?task_type, "publish failed");
            }
        });
        FinishTaskReply
    }

    async fn publish(&self, task_type: TaskType, index: i64, pid: u32) -> Result<(), PublishError> {
        match task_type {
            TaskType::Map => self.publish_map(index, pid).await,
            TaskType::Reduce => self.publish_reduce(index, pid).await,
            TaskType::None => Err(PublishError::UnknownTaskType(task_type)),
        }
    }

    async fn publish_map(&self, index: i64, pid: u32) -> Result<(), PublishError> {
        if index < 0 || !self.inner.map_tasks.set_moving(index as usize) {
            return Err(PublishError::LostRace { index });
        }
        let dir = &self.inner.working_dir;
        for r in 0..self.n_reduce() {
            let from = rpc::tmp_intermediate_file(dir, index, r, pid);
            let to = rpc::intermediate_file(dir, index, r);
            tokio::fs::rename(&from, &to)
                .await
                .map_err(|source| PublishError::Rename {
                    task_type: TaskType::Map,
                    index,
                    source,
                })?;
        }
        self.inner.map_tasks.set_done(index as usize);
        debug!(index, pid, "map task published");
        Ok(())
    }

    async fn publish_reduce(&self, index: i64, pid: u32) -> Result<(), PublishError> {
        if index < 0 || !self.inner.reduce_tasks.set_moving(index as usize) {
            return Err(PublishError::LostRace { index });
        }
        let dir = &self.inner.working_dir;
        let from = rpc::tmp_output_file(dir, index, pid);
        let to = rpc::output_file(dir, index);
        if let Err(source) = tokio::fs::rename(&from, &to).await {
            self.inner.reduce_tasks.moving_fail(index as usize);
            return Err(PublishError::Rename {
                task_type: TaskType::Reduce,
                index,
                source,
            });
        }
        self.inner.reduce_tasks.set_done(index as usize);
        debug!(index, pid, "reduce task published");
        Ok(())
    }
}

fn to_wire_cmd(cmd: crate::mr::task::DispatchCmd) -> WorkerCmd {
    use crate::mr::task::DispatchCmd;
    match cmd {
        DispatchCmd::Process => WorkerCmd::Process,
        DispatchCmd::Wait => WorkerCmd::Wait,
        DispatchCmd::Done => WorkerCmd::Done,
    }
}

/// tarpc transport adapter: thin delegation to the inherent methods above so
/// the state machine itself stays testable without spinning up real RPC.
#[tarpc::server]
impl RpcService for Coordinator {
    type GetTaskFut = Pin<Box<dyn Future<Output = GetTaskReply> + Send>>;
    type FinishTaskFut = Pin<Box<dyn Future<Output = FinishTaskReply> + Send>>;
    type ExampleFut = Pin<Box<dyn Future<Output = i32> + Send>>;

    fn get_task(
        self,
        _: context::Context,
        pid: u32,
        _request_id: Option<String>,
    ) -> Self::GetTaskFut {
        Box::pin(async move { self.get_task(pid) })
    }

    fn finish_task(
        self,
        _: context::Context,
        pid: u32,
        task_type: TaskType,
        task_index: i64,
        _request_id: Option<String>,
    ) -> Self::FinishTaskFut {
        Box::pin(async move { self.finish_task(pid, task_type, task_index) })
    }

    fn example(self, _: context::Context, x: i32) -> Self::ExampleFut {
        Box::pin(async move { x + 1 })
    }
}
