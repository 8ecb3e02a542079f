//! Command issuing and task supervision.
//!
//! The dispatcher does not look at gating flags: the caller decides whether
//! a command may run, the backend decides whether it does.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{Backend, Upid};
use crate::core::commands::{self, CommandShape};
use crate::core::tasks::{TaskHandle, TaskState, wait_for_task};
use crate::error::{ApiError, ApiResult};

/// Immediate result of issuing a command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Sync command finished, here is its payload.
    Completed(Value),
    /// A worker task was started and is being watched.
    Started(TaskHandle),
}

/// Delivered to the observer once the task has stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskCompletion {
    pub drive: String,
    pub command: &'static str,
    pub handle: TaskHandle,
    pub state: TaskState,
}

#[derive(Clone)]
pub struct CommandDispatcher {
    backend: Arc<dyn Backend>,
    task_poll_interval: Duration,
}

impl CommandDispatcher {
    pub fn new(backend: Arc<dyn Backend>, task_poll_interval: Duration) -> Self {
        Self {
            backend,
            task_poll_interval,
        }
    }

    /// Issue `command` against `drive`.
    ///
    /// For task commands `on_finished` is called exactly once when the task
    /// stops, unless `cancel` fires first, in which case the observer is
    /// detached and never called. The backend task keeps running either way.
    /// Sync commands drop `on_finished` without calling it.
    pub async fn issue<F>(
        &self,
        drive: &str,
        command: &str,
        params: Option<Value>,
        cancel: CancellationToken,
        on_finished: F,
    ) -> ApiResult<CommandOutcome>
    where
        F: FnOnce(TaskCompletion) + Send + 'static,
    {
        let spec = commands::lookup(command)?;
        spec.check_params(params.as_ref())?;

        debug!(drive, command, "Issuing drive command");
        let reply = self.backend.run_command(drive, spec.name, params).await?;

        match spec.shape {
            CommandShape::Sync => Ok(CommandOutcome::Completed(reply)),
            CommandShape::Task => {
                let upid: Upid = match &reply {
                    Value::String(s) => s.parse()?,
                    other => return Err(ApiError::InvalidUpid(other.to_string())),
                };
                let handle = TaskHandle::new(upid);
                info!(drive, command, upid = %handle.upid, "Task started");

                self.watch(drive.to_string(), spec.name, handle.clone(), cancel, on_finished);
                Ok(CommandOutcome::Started(handle))
            }
        }
    }

    fn watch<F>(
        &self,
        drive: String,
        command: &'static str,
        mut handle: TaskHandle,
        cancel: CancellationToken,
        on_finished: F,
    ) where
        F: FnOnce(TaskCompletion) + Send + 'static,
    {
        let backend = self.backend.clone();
        let interval = self.task_poll_interval;

        tokio::spawn(async move {
            let state = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(upid = %handle.upid, "Task observer detached");
                    return;
                }
                state = wait_for_task(backend.as_ref(), &mut handle, interval) => state,
            };

            if !state.is_success() {
                warn!(upid = %handle.upid, status = state.class(), "Task failed");
            }
            on_finished(TaskCompletion {
                drive,
                command,
                handle,
                state,
            });
        });
    }
}
