//! In-memory tape backend.
//!
//! Behaves like the real server for everything the console touches: drives
//! get locked while a worker task runs, media commands need a loaded tape,
//! and tasks finish after a configurable delay. Used by the tests, by
//! `--simulation`, and by the `simulate` HTTP server.

mod server;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::api::{
    Backend, Device, DriveStatus, MamAttribute, RunState, TaskStatus, TaskSummary, Upid,
};
use crate::error::{ApiError, ApiResult};

pub use server::{SimServer, router};

const NODE: &str = "localhost";
const AUTH_ID: &str = "root@pam";
const DEFAULT_TASK_DURATION: Duration = Duration::from_secs(3);
const OFFLINE_FLAGS: &str = "DR_OPEN IM_REP_EN";
const ONLINE_FLAGS: &str = "ONLINE IM_REP_EN";

#[derive(Debug, Clone)]
struct SimMedia {
    label: String,
    uuid: String,
    ctime: i64,
    mounts: u64,
    passes: u64,
    bytes_read: u64,
    bytes_written: u64,
}

#[derive(Debug)]
struct SimDrive {
    device: Device,
    flags: String,
    media: Option<SimMedia>,
}

#[derive(Debug)]
struct SimTask {
    upid: Upid,
    endtime: Option<i64>,
    status: Option<String>,
}

#[derive(Debug, Default)]
struct SimState {
    drives: Vec<SimDrive>,
    tasks: Vec<SimTask>,
    next_task_id: u64,
    requests: HashMap<&'static str, usize>,
    unreachable: bool,
}

impl SimState {
    fn drive(&self, name: &str) -> ApiResult<&SimDrive> {
        self.drives
            .iter()
            .find(|d| d.device.name == name)
            .ok_or_else(|| ApiError::DriveNotFound(name.to_string()))
    }

    fn drive_mut(&mut self, name: &str) -> ApiResult<&mut SimDrive> {
        self.drives
            .iter_mut()
            .find(|d| d.device.name == name)
            .ok_or_else(|| ApiError::DriveNotFound(name.to_string()))
    }

    /// Count a request, failing it if the backend is "down".
    fn request(&mut self, method: &'static str) -> ApiResult<()> {
        *self.requests.entry(method).or_default() += 1;
        if self.unreachable {
            Err(ApiError::Unreachable)
        } else {
            Ok(())
        }
    }
}

/// Cloneable handle; all clones share the same drives and tasks.
#[derive(Clone)]
pub struct SimulatedBackend {
    state: Arc<Mutex<SimState>>,
    task_duration: Duration,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
            task_duration: DEFAULT_TASK_DURATION,
        }
    }

    pub fn with_task_duration(mut self, duration: Duration) -> Self {
        self.task_duration = duration;
        self
    }

    /// Two drives, one with a tape loaded.
    pub fn demo() -> Self {
        let sim = Self::new();
        sim.add_drive("drv0");
        sim.add_drive("drv1");
        sim.load_media("drv0", "TAPE01L8");
        sim
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_drive(&self, name: &str) {
        let mut state = self.lock();
        let index = state.drives.len();
        state.drives.push(SimDrive {
            device: Device {
                name: name.to_string(),
                path: format!("/dev/tape/by-id/scsi-{name}-nst"),
                vendor: "IBM".to_string(),
                model: "ULT3580-HH8".to_string(),
                serial: format!("10WT{index:06}"),
                changer: None,
                changer_drivenum: None,
                state: None,
            },
            flags: OFFLINE_FLAGS.to_string(),
            media: None,
        });
        info!(drive = name, "(Simulator) Drive added");
    }

    pub fn remove_drive(&self, name: &str) {
        self.lock().drives.retain(|d| d.device.name != name);
        info!(drive = name, "(Simulator) Drive removed");
    }

    /// Insert a tape; the drive goes online.
    pub fn load_media(&self, drive: &str, label: &str) {
        let mut state = self.lock();
        let Ok(d) = state.drive_mut(drive) else {
            return;
        };
        d.flags = ONLINE_FLAGS.to_string();
        d.media = Some(SimMedia {
            label: label.to_string(),
            uuid: media_uuid(label),
            ctime: 1_600_000_000,
            mounts: 12,
            passes: 40,
            bytes_read: 3 << 30,
            bytes_written: 7 << 30,
        });
    }

    pub fn unload_media(&self, drive: &str) {
        let mut state = self.lock();
        if let Ok(d) = state.drive_mut(drive) {
            d.flags = OFFLINE_FLAGS.to_string();
            d.media = None;
        }
    }

    /// Override the status flags reported for a drive.
    pub fn set_drive_status(&self, drive: &str, flags: &str) {
        let mut state = self.lock();
        if let Ok(d) = state.drive_mut(drive) {
            d.flags = flags.to_string();
        }
    }

    /// Set or clear the lock owner shown in the drive list.
    pub fn set_drive_state(&self, drive: &str, owner: Option<&str>) {
        let mut state = self.lock();
        if let Ok(d) = state.drive_mut(drive) {
            d.device.state = owner.map(str::to_string);
        }
    }

    pub fn drive_state(&self, drive: &str) -> Option<String> {
        let state = self.lock();
        state.drive(drive).ok().and_then(|d| d.device.state.clone())
    }

    /// Make every request fail as if the network was down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    pub fn request_count(&self, method: &str) -> usize {
        self.lock().requests.get(method).copied().unwrap_or(0)
    }

    pub fn finished_tasks(&self) -> usize {
        self.lock().tasks.iter().filter(|t| t.endtime.is_some()).count()
    }

    fn start_task(
        &self,
        state: &mut SimState,
        drive: &str,
        worker_type: &str,
        finish: impl FnOnce(&mut SimDrive) -> Result<(), String> + Send + 'static,
    ) -> ApiResult<Value> {
        state.next_task_id += 1;
        let now = chrono::Utc::now().timestamp();
        let upid = Upid::new(
            NODE,
            std::process::id(),
            0,
            state.next_task_id,
            now,
            worker_type,
            Some(drive),
            AUTH_ID,
        );
        state.drive_mut(drive)?.device.state = Some(upid.to_string());
        state.tasks.push(SimTask {
            upid: upid.clone(),
            endtime: None,
            status: None,
        });
        debug!(upid = %upid, "(Simulator) Task started");

        let sim = self.clone();
        let drive = drive.to_string();
        let duration = self.task_duration;
        let reply = Value::String(upid.to_string());

        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let mut state = sim.lock();
            let result = match state.drive_mut(&drive) {
                Ok(d) => {
                    d.device.state = None;
                    finish(d)
                }
                Err(e) => Err(e.to_string()),
            };
            let status = match result {
                Ok(()) => "OK".to_string(),
                Err(msg) => msg,
            };
            if let Some(task) = state.tasks.iter_mut().find(|t| t.upid == upid) {
                task.endtime = Some(upid.starttime + duration.as_secs() as i64);
                task.status = Some(status.clone());
            }
            debug!(upid = %upid, status = %status, "(Simulator) Task finished");
        });

        Ok(reply)
    }
}

/// Stable fake UUID derived from the label.
fn media_uuid(label: &str) -> String {
    let hash = label
        .bytes()
        .fold(0u128, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u128));
    format!("{hash:032x}")
}

fn require_media(drive: &SimDrive) -> ApiResult<&SimMedia> {
    if !drive.flags.split_whitespace().any(|f| f == "ONLINE") {
        return Err(ApiError::Rejected(format!("drive '{}' is not online", drive.device.name)));
    }
    drive
        .media
        .as_ref()
        .ok_or_else(|| ApiError::Rejected("no media loaded".to_string()))
}

fn cartridge_memory(media: &SimMedia) -> Vec<MamAttribute> {
    vec![
        MamAttribute { id: 0x0000, name: "Remaining Capacity In Partition".into(), value: "11528 GB".into() },
        MamAttribute { id: 0x0001, name: "Maximum Capacity In Partition".into(), value: "11999 GB".into() },
        MamAttribute { id: 0x0003, name: "Load Count".into(), value: media.mounts.to_string() },
        MamAttribute { id: 0x0400, name: "Medium Manufacturer".into(), value: "FUJIFILM".into() },
        MamAttribute { id: 0x0401, name: "Medium Serial Number".into(), value: media.uuid[..10].to_uppercase() },
        MamAttribute { id: 0x0806, name: "Barcode".into(), value: media.label.clone() },
    ]
}

#[async_trait]
impl Backend for SimulatedBackend {
    async fn list_drives(&self) -> ApiResult<Vec<Device>> {
        let mut state = self.lock();
        state.request("list_drives")?;
        Ok(state.drives.iter().map(|d| d.device.clone()).collect())
    }

    async fn drive_status(&self, drive: &str) -> ApiResult<DriveStatus> {
        let mut state = self.lock();
        state.request("drive_status")?;
        let d = state.drive(drive)?;

        let mut status = DriveStatus {
            status: d.flags.clone(),
            blocksize: Some(0),
            options: Some("buffer-writes".to_string()),
            ..DriveStatus::default()
        };
        if let Some(media) = &d.media {
            status.density = Some("LTO8".to_string());
            status.file_number = Some(0);
            status.block_number = Some(0);
            status.manufactured = Some(media.ctime);
            status.bytes_read = Some(media.bytes_read);
            status.bytes_written = Some(media.bytes_written);
            status.volume_mounts = Some(media.mounts);
            status.medium_passes = Some(media.passes);
            status.medium_wearout = Some(media.passes as f64 / 16000.0);
        }
        Ok(status)
    }

    async fn run_command(
        &self,
        drive: &str,
        command: &str,
        params: Option<Value>,
    ) -> ApiResult<Value> {
        let mut state = self.lock();
        state.request("run_command")?;

        let d = state.drive(drive)?;
        if let Some(owner) = &d.device.state {
            return Err(ApiError::Rejected(format!("drive '{drive}' is locked by {owner}")));
        }

        match command {
            "read-label" => {
                let media = require_media(d)?;
                Ok(json!({
                    "label-text": media.label,
                    "uuid": media.uuid,
                    "ctime": media.ctime,
                }))
            }
            "volume-statistics" => {
                let media = require_media(d)?;
                Ok(json!({
                    "volume-mounts": media.mounts,
                    "volume-datasets-written": 4,
                    "volume-datasets-read": 2,
                    "medium-passes": media.passes,
                    "bytes-read": media.bytes_read,
                    "bytes-written": media.bytes_written,
                    "serial": media.uuid[..10].to_uppercase(),
                    "worm": false,
                }))
            }
            "cartridge-memory" => {
                let media = require_media(d)?;
                Ok(serde_json::to_value(cartridge_memory(media)).unwrap_or(Value::Null))
            }
            "eject-media" => self.start_task(&mut state, drive, "eject-media", |d| {
                if d.media.take().is_none() {
                    return Err("no media loaded".to_string());
                }
                d.flags = OFFLINE_FLAGS.to_string();
                Ok(())
            }),
            "catalog" => self.start_task(&mut state, drive, "catalog-media", |d| match &mut d.media {
                Some(media) => {
                    media.passes += 1;
                    media.bytes_read += 1 << 20;
                    Ok(())
                }
                None => Err("no media loaded".to_string()),
            }),
            "label-media" => {
                let label = params
                    .as_ref()
                    .and_then(|p| p.get("label-text"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::Rejected("missing parameter 'label-text'".to_string()))?;
                self.start_task(&mut state, drive, "label-media", move |d| match &mut d.media {
                    Some(media) => {
                        media.label = label;
                        Ok(())
                    }
                    None => Err("no media loaded".to_string()),
                })
            }
            other => Err(ApiError::Rejected(format!("unknown command '{other}'"))),
        }
    }

    async fn task_status(&self, upid: &str) -> ApiResult<TaskStatus> {
        let mut state = self.lock();
        state.request("task_status")?;
        let task = state
            .tasks
            .iter()
            .find(|t| t.upid.as_str() == upid)
            .ok_or_else(|| ApiError::TaskNotFound(upid.to_string()))?;

        Ok(TaskStatus {
            upid: upid.to_string(),
            status: if task.endtime.is_some() {
                RunState::Stopped
            } else {
                RunState::Running
            },
            exitstatus: task.status.clone(),
            starttime: task.upid.starttime,
            endtime: task.endtime,
        })
    }

    async fn list_tasks(&self, running_only: bool, limit: usize) -> ApiResult<Vec<TaskSummary>> {
        let mut state = self.lock();
        state.request("list_tasks")?;
        Ok(state
            .tasks
            .iter()
            .rev()
            .filter(|t| !running_only || t.endtime.is_none())
            .take(limit)
            .map(|t| TaskSummary {
                upid: t.upid.to_string(),
                node: t.upid.node.clone(),
                worker_type: t.upid.worker_type.clone(),
                worker_id: t.upid.worker_id.clone(),
                user: t.upid.auth_id.clone(),
                starttime: t.upid.starttime,
                endtime: t.endtime,
                status: t.status.clone(),
            })
            .collect())
    }
}

/// Drive the simulator from stdin: `add <drive>`, `rm <drive>`,
/// `load <drive> <label>`, `unload <drive>`, `status <drive> <flags...>`,
/// `down`, `up`.
pub fn spawn_stdin_controller(sim: SimulatedBackend) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lines() {
            let Ok(cmd) = line else { break };
            let parts: Vec<&str> = cmd.split_whitespace().collect();
            match parts.as_slice() {
                ["add", drive] => sim.add_drive(drive),
                ["rm", drive] => sim.remove_drive(drive),
                ["load", drive, label] => sim.load_media(drive, label),
                ["unload", drive] => sim.unload_media(drive),
                ["status", drive, flags @ ..] => sim.set_drive_status(drive, &flags.join(" ")),
                ["down"] => sim.set_unreachable(true),
                ["up"] => sim.set_unreachable(false),
                _ => eprintln!(
                    "(Simulator) Use: add <drive> | rm <drive> | load <drive> <label> | unload <drive> | status <drive> <flags> | down | up"
                ),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn eject_locks_drive_until_task_ends() {
        let sim = SimulatedBackend::demo();
        let reply = sim.run_command("drv0", "eject-media", None).await.unwrap();
        let upid = reply.as_str().unwrap().to_string();

        assert_eq!(sim.drive_state("drv0").as_deref(), Some(upid.as_str()));
        assert_eq!(sim.task_status(&upid).await.unwrap().status, RunState::Running);
        assert!(matches!(
            sim.run_command("drv0", "catalog", None).await,
            Err(ApiError::Rejected(_))
        ));

        tokio::time::sleep(DEFAULT_TASK_DURATION + Duration::from_millis(10)).await;
        let status = sim.task_status(&upid).await.unwrap();
        assert_eq!(status.status, RunState::Stopped);
        assert_eq!(status.exitstatus.as_deref(), Some("OK"));
        assert!(sim.drive_state("drv0").is_none());
        assert_eq!(sim.drive_status("drv0").await.unwrap().status, OFFLINE_FLAGS);
    }

    #[tokio::test]
    async fn media_commands_need_online_drive() {
        let sim = SimulatedBackend::demo();
        let memory = sim.run_command("drv0", "cartridge-memory", None).await.unwrap();
        let rows: Vec<MamAttribute> = serde_json::from_value(memory).unwrap();
        assert!(rows.iter().any(|r| r.value == "TAPE01L8"));

        assert!(matches!(
            sim.run_command("drv1", "read-label", None).await,
            Err(ApiError::Rejected(_))
        ));
        assert!(matches!(
            sim.drive_status("nope").await,
            Err(ApiError::DriveNotFound(_))
        ));
    }

    #[tokio::test]
    async fn task_list_is_newest_first() {
        let sim = SimulatedBackend::demo().with_task_duration(Duration::from_secs(3600));
        sim.load_media("drv1", "TAPE02L8");
        sim.run_command("drv0", "catalog", None).await.unwrap();
        sim.run_command("drv1", "catalog", None).await.unwrap();

        let tasks = sim.list_tasks(true, 10).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].worker_id.as_deref(), Some("drv1"));
        assert_eq!(tasks[0].worker_type, "catalog-media");
        assert!(tasks.iter().all(|t| t.status.is_none()));
        assert_eq!(sim.list_tasks(false, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_backend_fails_every_call() {
        let sim = SimulatedBackend::demo();
        sim.set_unreachable(true);
        assert!(sim.list_drives().await.unwrap_err().is_transport());
        sim.set_unreachable(false);
        assert_eq!(sim.list_drives().await.unwrap().len(), 2);
        assert_eq!(sim.request_count("list_drives"), 2);
    }
}
