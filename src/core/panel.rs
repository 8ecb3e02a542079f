//! Drive status panel controller.
//!
//! A synchronous state machine: every input returns the effects the
//! session has to carry out (mask changes, status reloads). It owns no
//! timers and no I/O, so every transition is testable in isolation.
//!
//! ```text
//! Uninitialized --first snapshot--> Busy | Idle
//! Busy --state cleared--> Idle     (first time: unmask + reload, latches `loaded`)
//! Idle --state set------> Busy     (re-mask, latch stays)
//! ```

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{Device, DriveStatus};
use crate::core::dispatcher::{CommandOutcome, TaskCompletion};
use crate::core::state::{DeviceStateModel, DriveFlags, MediaListing, PanelAction};
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelPhase {
    Uninitialized,
    Busy,
    Idle,
}

/// Side effects requested by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelEffect {
    Mask,
    Unmask,
    ReloadStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Message shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            text: text.into(),
        }
    }
}

/// Everything the rendering layer needs to draw the panel.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelView {
    pub drive: String,
    pub phase: PanelPhase,
    pub flags: DriveFlags,
    pub masked: bool,
    pub device: Option<Device>,
    pub status: Option<DriveStatus>,
    pub media: MediaListing,
    pub notice: Option<Notice>,
    /// Tasks issued from this panel that have not finished yet.
    pub running_tasks: usize,
}

pub struct StatusPanel {
    model: DeviceStateModel,
    phase: PanelPhase,
    loaded: bool,
    render_ready: bool,
    /// Mask state the controller wants.
    mask_wanted: bool,
    /// Mask state actually applied by the renderer.
    masked: bool,
    notice: Option<Notice>,
    /// UPIDs of tasks started from this panel and not finished yet.
    running: BTreeSet<String>,
    /// Completions that arrived before their start was reported.
    finished_early: BTreeSet<String>,
}

impl StatusPanel {
    /// New panel, masked until the drive is first seen idle.
    pub fn new(drive: impl Into<String>) -> Self {
        Self {
            model: DeviceStateModel::new(drive),
            phase: PanelPhase::Uninitialized,
            loaded: false,
            render_ready: false,
            mask_wanted: true,
            masked: true,
            notice: None,
            running: BTreeSet::new(),
            finished_early: BTreeSet::new(),
        }
    }

    pub fn drive(&self) -> &str {
        self.model.drive()
    }

    pub fn phase(&self) -> PanelPhase {
        self.phase
    }

    pub fn flags(&self) -> DriveFlags {
        DriveFlags {
            online: self.model.online(),
            busy: self.model.busy(),
            loaded: self.loaded,
        }
    }

    pub fn masked(&self) -> bool {
        self.masked
    }

    pub fn model(&self) -> &DeviceStateModel {
        &self.model
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn is_enabled(&self, action: PanelAction) -> bool {
        action.is_enabled(self.flags())
    }

    /// The automatic status poll only makes sense for a usable, unlocked drive.
    pub fn wants_status_polling(&self) -> bool {
        self.model.online() && !self.model.busy()
    }

    /// New drive list snapshot from the registry.
    pub fn on_devices(&mut self, devices: &[Device]) -> Vec<PanelEffect> {
        let was_present = self.model.device().is_some();
        let busy = self.model.apply_devices(devices);
        let mut effects = Vec::new();

        // A drive that comes back has no status until it is fetched again.
        if self.loaded && !was_present && !busy && self.model.device().is_some() {
            effects.push(PanelEffect::ReloadStatus);
        }

        match (self.phase, busy) {
            (PanelPhase::Busy, true) | (PanelPhase::Idle, false) => {}
            (_, true) => {
                debug!(drive = self.drive(), "Drive busy");
                self.phase = PanelPhase::Busy;
                self.request_mask(true, &mut effects);
            }
            (_, false) => {
                debug!(drive = self.drive(), "Drive idle");
                self.phase = PanelPhase::Idle;
                self.request_mask(false, &mut effects);
                if !self.loaded {
                    self.loaded = true;
                    effects.push(PanelEffect::ReloadStatus);
                }
            }
        }

        effects
    }

    /// New status snapshot from the panel's own poller.
    pub fn on_status(&mut self, status: DriveStatus) {
        let was_online = self.model.online();
        let online = self.model.apply_status(status);
        if was_online != online {
            info!(drive = self.drive(), online, "Drive online state changed");
        }
    }

    /// The status poll failed; the previous snapshot stays.
    pub fn on_status_error(&mut self, message: &str) {
        self.notice = Some(Notice::error(format!("Status update failed: {message}")));
    }

    /// Result of issuing a command.
    pub fn on_command_result(&mut self, command: &str, result: Result<CommandOutcome, ApiError>) {
        match result {
            Ok(CommandOutcome::Completed(value)) => self.store_result(command, value),
            Ok(CommandOutcome::Started(handle)) => {
                let upid = handle.upid.as_str().to_string();
                if !self.finished_early.remove(&upid) {
                    self.running.insert(upid);
                    self.notice = Some(Notice::info(format!("{command}: started {}", handle.upid)));
                }
            }
            Err(e) => {
                warn!(drive = self.drive(), command, error = %e, "Command failed");
                self.notice = Some(Notice::error(format!("{command} failed: {e}")));
            }
        }
    }

    fn store_result(&mut self, command: &str, value: Value) {
        if self.model.store_media(command, value) {
            self.notice = Some(Notice::info(format!("{command}: done")));
        } else {
            debug!(drive = self.drive(), command, "Discarding media result, drive offline");
        }
    }

    /// A task issued from this panel stopped, successfully or not.
    pub fn on_task_finished(&mut self, completion: &TaskCompletion) -> Vec<PanelEffect> {
        let upid = &completion.handle.upid;
        if !self.running.remove(upid.as_str()) {
            self.finished_early.insert(upid.as_str().to_string());
        }
        self.notice = Some(if completion.state.is_success() {
            Notice::info(format!("{}: task {} finished", completion.command, upid))
        } else {
            Notice::error(format!(
                "{}: task {} failed: {}",
                completion.command,
                upid,
                completion.handle.exit_status.as_deref().unwrap_or("unknown")
            ))
        });
        vec![PanelEffect::ReloadStatus]
    }

    /// The renderer finished its first layout pass; flush any held mask change.
    pub fn on_render_ready(&mut self) -> Vec<PanelEffect> {
        let mut effects = Vec::new();
        if !self.render_ready {
            self.render_ready = true;
            self.flush_mask(&mut effects);
        }
        effects
    }

    fn request_mask(&mut self, masked: bool, effects: &mut Vec<PanelEffect>) {
        self.mask_wanted = masked;
        if self.render_ready {
            self.flush_mask(effects);
        }
    }

    fn flush_mask(&mut self, effects: &mut Vec<PanelEffect>) {
        if self.masked != self.mask_wanted {
            self.masked = self.mask_wanted;
            effects.push(if self.masked {
                PanelEffect::Mask
            } else {
                PanelEffect::Unmask
            });
        }
    }

    pub fn view(&self) -> PanelView {
        PanelView {
            drive: self.drive().to_string(),
            phase: self.phase,
            flags: self.flags(),
            masked: self.masked,
            device: self.model.device().cloned(),
            status: self.model.status().cloned(),
            media: self.model.media().clone(),
            notice: self.notice.clone(),
            running_tasks: self.running.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Upid;
    use crate::core::tasks::{TaskHandle, TaskState};
    use serde_json::json;

    const EJECT_UPID: &str =
        "UPID:pbs:00000001:00000001:00000001:65A0B1C0:eject-media:drv0:root@pam:";

    fn snapshot(state: Option<&str>) -> Vec<Device> {
        vec![Device {
            name: "drv0".to_string(),
            path: "/dev/nst0".to_string(),
            vendor: "HP".to_string(),
            model: "Ultrium 8".to_string(),
            serial: "HU1".to_string(),
            changer: None,
            changer_drivenum: None,
            state: state.map(str::to_string),
        }]
    }

    fn status(flags: &str) -> DriveStatus {
        DriveStatus {
            status: flags.to_string(),
            ..DriveStatus::default()
        }
    }

    fn ready_panel() -> StatusPanel {
        let mut panel = StatusPanel::new("drv0");
        assert!(panel.on_render_ready().is_empty());
        panel
    }

    fn completion(exit: &str) -> TaskCompletion {
        let mut handle = TaskHandle::new(EJECT_UPID.parse::<Upid>().unwrap());
        handle.ended = Some(handle.started + 5);
        handle.exit_status = Some(exit.to_string());
        TaskCompletion {
            drive: "drv0".to_string(),
            command: "eject-media",
            state: TaskState::from_status(Some(exit)),
            handle,
        }
    }

    fn count(effects: &[PanelEffect], wanted: PanelEffect) -> usize {
        effects.iter().filter(|e| **e == wanted).count()
    }

    #[test]
    fn idle_reload_fires_once_per_panel() {
        let mut panel = ready_panel();
        let sequence = [Some(EJECT_UPID), Some(EJECT_UPID), None, Some(EJECT_UPID), None];

        let mut per_event = Vec::new();
        for state in sequence {
            per_event.push(panel.on_devices(&snapshot(state)));
        }

        let reloads: Vec<usize> = per_event
            .iter()
            .map(|e| count(e, PanelEffect::ReloadStatus))
            .collect();
        assert_eq!(reloads, [0, 0, 1, 0, 0]);
        assert_eq!(per_event[2], [PanelEffect::Unmask, PanelEffect::ReloadStatus]);
        assert_eq!(per_event[3], [PanelEffect::Mask]);
        assert!(panel.flags().loaded);
    }

    #[test]
    fn first_snapshot_idle_loads_immediately() {
        let mut panel = ready_panel();
        assert_eq!(panel.phase(), PanelPhase::Uninitialized);

        let effects = panel.on_devices(&snapshot(None));
        assert_eq!(effects, [PanelEffect::Unmask, PanelEffect::ReloadStatus]);
        assert_eq!(panel.phase(), PanelPhase::Idle);
        assert!(!panel.masked());

        assert!(panel.on_devices(&snapshot(None)).is_empty());
    }

    #[test]
    fn busy_drive_blocks_reload_until_idle() {
        let mut panel = ready_panel();
        panel.on_devices(&snapshot(Some(EJECT_UPID)));
        assert_eq!(panel.phase(), PanelPhase::Busy);
        assert!(panel.flags().busy);
        assert!(!panel.is_enabled(PanelAction::Reload));
        assert!(panel.masked());

        let effects = panel.on_devices(&snapshot(None));
        assert!(!panel.flags().busy);
        assert!(panel.is_enabled(PanelAction::Reload));
        assert_eq!(count(&effects, PanelEffect::Unmask), 1);
        assert_eq!(count(&effects, PanelEffect::ReloadStatus), 1);
    }

    #[test]
    fn online_idle_drive_enables_every_action() {
        let mut panel = ready_panel();
        panel.on_devices(&snapshot(None));
        panel.on_status(status("ONLINE"));

        let flags = panel.flags();
        assert!(flags.online);
        assert!(!flags.busy);
        for action in PanelAction::ALL {
            assert!(panel.is_enabled(action), "{action:?} disabled");
        }
        assert!(panel.wants_status_polling());
    }

    #[test]
    fn mask_changes_wait_for_render_ready() {
        let mut panel = StatusPanel::new("drv0");
        assert!(panel.on_devices(&snapshot(None)).contains(&PanelEffect::ReloadStatus));
        assert!(panel.masked());

        // Busy and idle again before the first layout pass: latest wins.
        assert!(panel.on_devices(&snapshot(Some(EJECT_UPID))).is_empty());
        assert!(panel.on_devices(&snapshot(None)).is_empty());

        assert_eq!(panel.on_render_ready(), [PanelEffect::Unmask]);
        assert!(!panel.masked());
        assert!(panel.on_render_ready().is_empty());
    }

    #[test]
    fn held_mask_that_ends_where_it_started_is_dropped() {
        let mut panel = StatusPanel::new("drv0");
        panel.on_devices(&snapshot(Some(EJECT_UPID)));
        assert!(panel.on_render_ready().is_empty());
        assert!(panel.masked());
    }

    #[test]
    fn offline_transition_clears_cartridge_listing() {
        let mut panel = ready_panel();
        panel.on_devices(&snapshot(None));
        panel.on_status(status("ONLINE"));
        panel.on_command_result(
            "cartridge-memory",
            Ok(CommandOutcome::Completed(json!([
                { "id": 0, "name": "Remaining Capacity", "value": "12000 GB" },
                { "id": 1, "name": "Maximum Capacity", "value": "12000 GB" }
            ]))),
        );
        assert_eq!(panel.view().media.cartridge_memory().len(), 2);

        panel.on_status(status("DR_OPEN"));
        assert!(panel.view().media.is_empty());
        assert!(!panel.is_enabled(PanelAction::CartridgeMemory));
    }

    #[test]
    fn task_completion_always_reloads() {
        let mut panel = ready_panel();
        panel.on_devices(&snapshot(None));

        let ok = panel.on_task_finished(&completion("OK"));
        assert_eq!(ok, [PanelEffect::ReloadStatus]);
        assert_eq!(panel.notice().unwrap().level, NoticeLevel::Info);

        let failed = panel.on_task_finished(&completion("drive not ready"));
        assert_eq!(failed, [PanelEffect::ReloadStatus]);
        let notice = panel.notice().unwrap();
        assert_eq!(notice.level, NoticeLevel::Error);
        assert!(notice.text.contains(EJECT_UPID));
        assert!(notice.text.contains("drive not ready"));
    }

    #[test]
    fn running_count_ignores_report_order() {
        let mut panel = ready_panel();
        panel.on_devices(&snapshot(None));
        panel.on_status(status("ONLINE"));
        let done = completion("OK");

        panel.on_task_finished(&done);
        assert_eq!(panel.view().running_tasks, 0);
        panel.on_command_result("eject-media", Ok(CommandOutcome::Started(done.handle.clone())));
        let view = panel.view();
        assert_eq!(view.running_tasks, 0);
        assert!(view.notice.unwrap().text.contains("finished"));

        panel.on_command_result("eject-media", Ok(CommandOutcome::Started(done.handle.clone())));
        assert_eq!(panel.view().running_tasks, 1);
        panel.on_task_finished(&done);
        assert_eq!(panel.view().running_tasks, 0);
    }

    #[test]
    fn rejected_command_only_reports() {
        let mut panel = ready_panel();
        panel.on_devices(&snapshot(None));
        panel.on_status(status("ONLINE"));
        panel.on_command_result("read-label", Err(ApiError::Rejected("no media".into())));

        let view = panel.view();
        assert_eq!(view.notice.unwrap().level, NoticeLevel::Error);
        assert!(view.media.is_empty());
        assert_eq!(view.running_tasks, 0);
    }

    #[test]
    fn missing_drive_disables_everything_but_reload() {
        let mut panel = ready_panel();
        panel.on_devices(&snapshot(None));
        panel.on_status(status("ONLINE"));

        panel.on_devices(&[]);
        let flags = panel.flags();
        assert!(!flags.online);
        assert!(!flags.busy);
        assert!(panel.is_enabled(PanelAction::Reload));
        assert!(!panel.is_enabled(PanelAction::Eject));
    }

    #[test]
    fn late_status_for_missing_drive_stays_offline() {
        let mut panel = ready_panel();
        panel.on_devices(&[]);
        panel.on_status(status("ONLINE"));

        let flags = panel.flags();
        assert!(!flags.online);
        assert!(panel.model().device().is_none());
        for action in PanelAction::ALL.into_iter().filter(|a| *a != PanelAction::Reload) {
            assert!(!panel.is_enabled(action), "{action:?} enabled for a missing drive");
        }
    }

    #[test]
    fn returning_drive_reloads_status() {
        let mut panel = ready_panel();
        panel.on_devices(&snapshot(None));
        panel.on_status(status("ONLINE"));

        assert!(panel.on_devices(&[]).is_empty());
        assert_eq!(panel.on_devices(&snapshot(None)), [PanelEffect::ReloadStatus]);
        assert!(!panel.flags().online);
        panel.on_status(status("ONLINE"));
        assert!(panel.flags().online);
    }
}
