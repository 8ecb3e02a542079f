//! Worker task tracking.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api::{Backend, RunState, TaskStatus, TaskSummary, Upid};
use crate::core::commands::describe_worker;
use crate::core::poller::{self, PollState, PollerHandle};
use crate::logging::LogThrottle;

/// Classified task status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Ok,
    Warning(String),
    Unknown,
    Error(String),
}

impl TaskState {
    /// Classify a terminal status string; `None` means still running.
    pub fn from_status(status: Option<&str>) -> Self {
        match status {
            None => TaskState::Running,
            Some("OK") => TaskState::Ok,
            Some("unknown") => TaskState::Unknown,
            Some(s) if s.starts_with("WARNINGS:") => TaskState::Warning(s.to_string()),
            Some(s) => TaskState::Error(s.to_string()),
        }
    }

    pub fn glyph(&self) -> &'static str {
        match self {
            TaskState::Running => "▶",
            TaskState::Ok => "✓",
            TaskState::Warning(_) => "!",
            TaskState::Unknown => "?",
            TaskState::Error(_) => "✗",
        }
    }

    /// Style class used by renderers.
    pub fn class(&self) -> &'static str {
        match self {
            TaskState::Running => "running",
            TaskState::Ok => "ok",
            TaskState::Warning(_) => "warning",
            TaskState::Unknown => "unknown",
            TaskState::Error(_) => "error",
        }
    }

    /// Finished without error. Warnings count as success.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskState::Ok | TaskState::Warning(_))
    }
}

/// Client side handle of an issued task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskHandle {
    pub upid: Upid,
    pub started: i64,
    pub ended: Option<i64>,
    pub exit_status: Option<String>,
}

impl TaskHandle {
    pub fn new(upid: Upid) -> Self {
        let started = upid.starttime;
        Self {
            upid,
            started,
            ended: None,
            exit_status: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.ended.is_none()
    }

    /// Record the final status reported by the backend.
    pub fn finish(&mut self, status: &TaskStatus) {
        self.ended = Some(status.endtime.unwrap_or(self.started.max(status.starttime)));
        self.exit_status = Some(
            status
                .exitstatus
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        );
    }

    pub fn state(&self) -> TaskState {
        if self.is_running() {
            TaskState::Running
        } else {
            TaskState::from_status(self.exit_status.as_deref())
        }
    }
}

/// Poll the task status until the backend reports it stopped.
///
/// Failed polls are logged and retried on the next tick. Cancel by dropping
/// the future.
pub async fn wait_for_task(
    backend: &dyn Backend,
    handle: &mut TaskHandle,
    interval: Duration,
) -> TaskState {
    let throttle = LogThrottle::new(Duration::from_secs(30));
    let upid = handle.upid.to_string();

    loop {
        tokio::time::sleep(interval).await;
        match backend.task_status(&upid).await {
            Ok(status) if status.status == RunState::Stopped => {
                handle.finish(&status);
                let state = handle.state();
                debug!(upid = %upid, status = state.class(), "Task finished");
                return state;
            }
            Ok(_) => {}
            Err(e) => {
                if throttle.should_log() {
                    warn!(upid = %upid, error = %e, "Failed to query task status");
                }
            }
        }
    }
}

/// One line of the running tasks widget.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRow {
    pub upid: String,
    pub description: String,
    pub user: String,
    pub started: String,
    /// Seconds, up to `now` while running.
    pub duration: i64,
    pub state: TaskState,
}

impl TaskRow {
    pub fn from_summary(task: &TaskSummary, now: i64) -> Self {
        let end = task.endtime.unwrap_or(now);
        Self {
            upid: task.upid.clone(),
            description: describe_worker(&task.worker_type, task.worker_id.as_deref()),
            user: task.user.clone(),
            started: format_timestamp(task.starttime),
            duration: (end - task.starttime).max(0),
            state: TaskState::from_status(task.status.as_deref()),
        }
    }
}

pub fn task_rows(tasks: &[TaskSummary], now: i64) -> Vec<TaskRow> {
    tasks.iter().map(|t| TaskRow::from_summary(t, now)).collect()
}

/// Live list of running tasks on the node, polled in the background.
///
/// Dropping it stops the poll.
pub struct RunningTasks {
    rx: watch::Receiver<PollState<Vec<TaskSummary>>>,
    _poller: PollerHandle,
}

impl RunningTasks {
    /// Start polling. Must be called within a tokio runtime.
    pub fn start(backend: Arc<dyn Backend>, interval: Duration, limit: usize) -> Self {
        let (tx, rx) = watch::channel(PollState::default());
        let poller = poller::spawn("task-list", interval, true, Arc::new(tx), move || {
            let backend = backend.clone();
            async move { backend.list_tasks(true, limit).await }
        });
        Self {
            rx,
            _poller: poller,
        }
    }

    pub fn rows(&self, now: i64) -> Vec<TaskRow> {
        match &self.rx.borrow().latest {
            Some(tasks) => task_rows(tasks, now),
            None => Vec::new(),
        }
    }

    /// Error of the last poll, if it failed.
    pub fn error(&self) -> Option<String> {
        self.rx.borrow().error.clone()
    }

    /// Wait for the next poll result. Returns `false` once polling has ended.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Local time `YYYY-MM-DD HH:MM:SS`, or the raw number if out of range.
pub fn format_timestamp(epoch: i64) -> String {
    match DateTime::from_timestamp(epoch, 0) {
        Some(utc) => utc
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => epoch.to_string(),
    }
}
