use std::sync::Arc;

use crate::api::{Backend, HttpBackend};
use crate::config::AppConfig;
use crate::core::{CommandDispatcher, DeviceRegistry, PanelHandle, session};
use crate::error::ApiResult;
use crate::sim::SimulatedBackend;

/// Everything a command handler or view needs, built once from config.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub backend: Arc<dyn Backend>,
    pub registry: DeviceRegistry,
    pub dispatcher: CommandDispatcher,
}

impl AppContext {
    /// Connect to the configured server, or a demo simulator in simulation mode.
    pub fn new(config: AppConfig) -> ApiResult<Self> {
        let backend: Arc<dyn Backend> = if config.simulation {
            Arc::new(SimulatedBackend::demo())
        } else {
            Arc::new(HttpBackend::new(
                &config.server,
                &config.node,
                config.request_timeout(),
                config.accept_invalid_certs,
            )?)
        };
        Ok(Self::with_backend(config, backend))
    }

    pub fn with_backend(config: AppConfig, backend: Arc<dyn Backend>) -> Self {
        let registry = DeviceRegistry::new(backend.clone(), config.device_poll_interval());
        let dispatcher = CommandDispatcher::new(backend.clone(), config.task_poll_interval());
        Self {
            config: Arc::new(config),
            backend,
            registry,
            dispatcher,
        }
    }

    /// Open a status panel for `drive`.
    pub fn open_panel(&self, drive: &str) -> PanelHandle {
        session::open(
            drive,
            self.backend.clone(),
            &self.registry,
            self.dispatcher.clone(),
            self.config.status_poll_interval(),
        )
    }
}
