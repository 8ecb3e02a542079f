//! Record types returned by the backend.
//!
//! Every snapshot kind has its own record with named optional fields, so a
//! malformed payload is rejected when it is decoded instead of surfacing as
//! a missing field somewhere in the panel.

use serde::{Deserialize, Serialize};

/// Response envelope used by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// Error body returned alongside non-success statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Drive list entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Device {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub serial: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changer_drivenum: Option<u64>,
    /// Identifier of the task currently holding the drive lock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl Device {
    /// True while a task owns the drive.
    pub fn is_locked(&self) -> bool {
        self.state.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Drive and media status.
///
/// Media related fields are only present when a medium is loaded.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DriveStatus {
    /// Space separated status flags, e.g. `ONLINE IM_REP_EN`.
    pub status: String,
    /// Block size, 0 is variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocksize: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub density: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_flags: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u32>,
    /// Medium manufacture date (epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufactured: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_read: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_written: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_mounts: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium_passes: Option<u64>,
    /// Estimated wear, 0.0 to 1.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium_wearout: Option<f64>,
}

/// Medium auxiliary memory attribute, one row of the cartridge memory listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MamAttribute {
    pub id: u16,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Stopped,
}

/// Result of the per-task status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub upid: String,
    pub status: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exitstatus: Option<String>,
    pub starttime: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endtime: Option<i64>,
}

/// Entry of the task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub upid: String,
    pub node: String,
    pub worker_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub user: String,
    pub starttime: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endtime: Option<i64>,
    /// Terminal status, absent while the task runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_state_is_optional() {
        let json = r#"{"name":"drv0","vendor":"HP","model":"Ultrium 6","serial":"X1","path":"/dev/nst0"}"#;
        let dev: Device = serde_json::from_str(json).unwrap();
        assert_eq!(dev.name, "drv0");
        assert!(dev.state.is_none());
        assert!(!dev.is_locked());
    }

    #[test]
    fn empty_state_is_not_locked() {
        let json = r#"{"name":"drv0","state":""}"#;
        let dev: Device = serde_json::from_str(json).unwrap();
        assert!(!dev.is_locked());
    }

    #[test]
    fn drive_status_requires_status_field() {
        let missing = r#"{"blocksize":0}"#;
        assert!(serde_json::from_str::<DriveStatus>(missing).is_err());

        let json = r#"{"status":"ONLINE","blocksize":0,"bytes-read":1024,"medium-wearout":0.25}"#;
        let status: DriveStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.bytes_read, Some(1024));
        assert_eq!(status.medium_wearout, Some(0.25));
    }

    #[test]
    fn task_status_parses_stopped_state() {
        let json = r#"{"upid":"UPID:x","status":"stopped","exitstatus":"OK","starttime":10}"#;
        let status: TaskStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.status, RunState::Stopped);
        assert_eq!(status.exitstatus.as_deref(), Some("OK"));
    }
}
