pub mod commands;
pub mod dispatcher;
pub mod panel;
pub mod poller;
pub mod registry;
pub mod session;
pub mod state;
pub mod tasks;

pub use commands::{COMMANDS, CommandShape, CommandSpec};
pub use dispatcher::{CommandDispatcher, CommandOutcome, TaskCompletion};
pub use panel::{Notice, NoticeLevel, PanelEffect, PanelPhase, PanelView, StatusPanel};
pub use poller::{PollState, PollerHandle};
pub use registry::{DeviceRegistry, DeviceSubscription};
pub use session::{PanelHandle, PanelInput};
pub use state::{DeviceStateModel, DriveFlags, MediaListing, PanelAction};
pub use tasks::{RunningTasks, TaskHandle, TaskRow, TaskState};
