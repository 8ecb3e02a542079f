//! Backend access.
//!
//! ## Architecture
//!
//! - `types`: serde records for drives, drive status, tasks
//! - `upid`: task identifier parsing
//! - `client`: reqwest implementation of [`Backend`] talking to the REST API
//!
//! The simulated implementation lives in [`crate::sim`].

pub mod client;
pub mod types;
pub mod upid;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ApiResult;

pub use client::HttpBackend;
pub use types::{
    Device, DriveStatus, Envelope, ErrorBody, MamAttribute, RunState, TaskStatus, TaskSummary,
};
pub use upid::Upid;

/// Everything the console needs from the backend.
///
/// The backend is authoritative: it owns drive state and executes commands.
/// Implementations never retry on their own.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Current drive list.
    async fn list_drives(&self) -> ApiResult<Vec<Device>>;

    /// Status of a single drive and its loaded medium.
    async fn drive_status(&self, drive: &str) -> ApiResult<DriveStatus>;

    /// Run a drive command.
    ///
    /// Task-producing commands answer with the UPID string, the others with
    /// their result payload.
    async fn run_command(&self, drive: &str, command: &str, params: Option<Value>)
    -> ApiResult<Value>;

    async fn task_status(&self, upid: &str) -> ApiResult<TaskStatus>;

    /// Task list, newest first.
    async fn list_tasks(&self, running_only: bool, limit: usize) -> ApiResult<Vec<TaskSummary>>;
}
