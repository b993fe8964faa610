//! Coordinator-internal error kinds for the publish protocol.
//!
//! None of these ever cross the RPC boundary: a `FinishTask` call always
//! returns `{}`, win or lose. They exist purely to give the `tracing` calls
//! in [`crate::mr::coordinator`] a structured `Display` to log.

use crate::mr::rpc::TaskType;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("task {index} lost the Processing->Moving race, skipping publish")]
    LostRace { index: i64 },

    #[error("rename failed while publishing {task_type:?} task {index}: {source}")]
    Rename {
        task_type: TaskType,
        index: i64,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown task type on FinishTask: {0:?}")]
    UnknownTaskType(TaskType),
}
