//! Event loop of an open drive panel.
//!
//! One task per panel merges the drive list subscription, the panel's own
//! status poller, command results and task completions into the
//! [`StatusPanel`] controller, then publishes the resulting [`PanelView`].
//! Requests are spawned, so the loop never waits on the backend.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{Backend, DriveStatus};
use crate::core::dispatcher::{CommandDispatcher, CommandOutcome, TaskCompletion};
use crate::core::panel::{PanelEffect, PanelView, StatusPanel};
use crate::core::poller::{self, PollState, PollerHandle};
use crate::core::registry::{DeviceRegistry, DeviceSubscription};
use crate::core::state::PanelAction;
use crate::error::ApiError;

/// Input from the rendering layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelInput {
    /// Button press with optional parameters (label text for Label Media).
    Action(PanelAction, Option<Value>),
    /// First layout pass finished.
    RenderReady,
}

enum SessionEvent {
    CommandReturned {
        command: &'static str,
        result: Result<CommandOutcome, ApiError>,
    },
    TaskFinished(TaskCompletion),
}

/// Handle held by the view. Dropping it closes the panel.
pub struct PanelHandle {
    input: mpsc::UnboundedSender<PanelInput>,
    view: watch::Receiver<PanelView>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PanelHandle {
    pub fn send(&self, input: PanelInput) {
        let _ = self.input.send(input);
    }

    pub fn action(&self, action: PanelAction) {
        self.send(PanelInput::Action(action, None));
    }

    /// Latest published view.
    pub fn view(&self) -> PanelView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PanelView> {
        self.view.clone()
    }

    /// Close the panel and wait for its loop to exit.
    ///
    /// Task observers are detached; tasks on the backend keep running.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PanelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Open a panel for `drive`. Must be called within a tokio runtime.
pub fn open(
    drive: &str,
    backend: Arc<dyn Backend>,
    registry: &DeviceRegistry,
    dispatcher: CommandDispatcher,
    status_interval: Duration,
) -> PanelHandle {
    let cancel = CancellationToken::new();
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let panel = StatusPanel::new(drive);
    let (view_tx, view_rx) = watch::channel(panel.view());

    let (status_tx, status_rx) = watch::channel(PollState::default());
    let status_poller = {
        let drive = drive.to_string();
        poller::spawn(
            "drive-status",
            status_interval,
            false,
            Arc::new(status_tx),
            move || {
                let backend = backend.clone();
                let drive = drive.clone();
                async move { backend.drive_status(&drive).await }
            },
        )
    };

    let session = Session {
        panel,
        devices: registry.subscribe(),
        status_rx,
        status_seen: (0, None),
        status_poller,
        dispatcher,
        events_tx,
        view_tx,
        cancel: cancel.clone(),
    };
    info!(drive, "Panel opened");
    let task = tokio::spawn(session.run(input_rx, events_rx));

    PanelHandle {
        input: input_tx,
        view: view_rx,
        cancel,
        task: Some(task),
    }
}

struct Session {
    panel: StatusPanel,
    devices: DeviceSubscription,
    status_rx: watch::Receiver<PollState<DriveStatus>>,
    /// Last status state handled: load count and error text.
    status_seen: (u64, Option<String>),
    status_poller: PollerHandle,
    dispatcher: CommandDispatcher,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    view_tx: watch::Sender<PanelView>,
    cancel: CancellationToken,
}

impl Session {
    async fn run(
        mut self,
        mut inputs: mpsc::UnboundedReceiver<PanelInput>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        if let Some(snapshot) = self.devices.take_current() {
            let effects = self.panel.on_devices(&snapshot);
            self.apply(effects);
        }
        self.publish();

        loop {
            let effects = tokio::select! {
                _ = self.cancel.cancelled() => break,
                snapshot = self.devices.changed() => match snapshot {
                    Some(snapshot) => self.panel.on_devices(&snapshot),
                    None => break,
                },
                changed = self.status_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.handle_status();
                    Vec::new()
                }
                Some(event) = events.recv() => self.handle_event(event),
                input = inputs.recv() => match input {
                    Some(input) => self.handle_input(input),
                    None => break,
                },
            };

            self.apply(effects);
            self.publish();
        }

        self.status_poller.stop();
        info!(drive = self.panel.drive(), "Panel closed");
    }

    fn handle_status(&mut self) {
        let state = self.status_rx.borrow_and_update().clone();
        if state.loads != self.status_seen.0 {
            if let Some(status) = &state.latest {
                self.panel.on_status(status.as_ref().clone());
            }
        } else if state.error.is_some() && state.error != self.status_seen.1 {
            if let Some(error) = &state.error {
                self.panel.on_status_error(error);
            }
        }
        self.status_seen = (state.loads, state.error);
    }

    fn handle_event(&mut self, event: SessionEvent) -> Vec<PanelEffect> {
        match event {
            SessionEvent::CommandReturned { command, result } => {
                self.panel.on_command_result(command, result);
                Vec::new()
            }
            SessionEvent::TaskFinished(completion) => self.panel.on_task_finished(&completion),
        }
    }

    fn handle_input(&mut self, input: PanelInput) -> Vec<PanelEffect> {
        match input {
            PanelInput::RenderReady => self.panel.on_render_ready(),
            PanelInput::Action(action, params) => {
                self.perform(action, params);
                Vec::new()
            }
        }
    }

    fn perform(&mut self, action: PanelAction, params: Option<Value>) {
        if !self.panel.is_enabled(action) {
            debug!(drive = self.panel.drive(), ?action, "Action disabled, ignoring");
            return;
        }

        let Some(command) = action.command() else {
            self.status_poller.reload();
            return;
        };

        let dispatcher = self.dispatcher.clone();
        let events = self.events_tx.clone();
        let drive = self.panel.drive().to_string();
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            let done = events.clone();
            let result = dispatcher
                .issue(&drive, command, params, cancel, move |completion| {
                    let _ = done.send(SessionEvent::TaskFinished(completion));
                })
                .await;
            let _ = events.send(SessionEvent::CommandReturned { command, result });
        });
    }

    fn apply(&mut self, effects: Vec<PanelEffect>) {
        for effect in effects {
            match effect {
                PanelEffect::ReloadStatus => self.status_poller.reload(),
                PanelEffect::Mask | PanelEffect::Unmask => {
                    debug!(drive = self.panel.drive(), ?effect, "Detail region mask changed");
                }
            }
        }
        self.status_poller
            .set_active(self.panel.wants_status_polling());
    }

    fn publish(&self) {
        let view = self.panel.view();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}
