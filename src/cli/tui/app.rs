//! Drive panel state for the terminal UI.

use serde_json::json;
use tokio::sync::watch;

use crate::context::AppContext;
use crate::core::{PanelAction, PanelHandle, PanelInput, PanelView, TaskRow};

/// Actions that can be triggered by user input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    Press(PanelAction),
    /// Open the label text prompt.
    StartLabel,
    PromptInput(char),
    PromptBackspace,
    PromptSubmit,
    PromptCancel,
}

pub struct TuiApp {
    /// Keeps the shared drive registry alive for the panel.
    ctx: AppContext,
    panel: PanelHandle,
    pub view: PanelView,
    pub task_rows: Vec<TaskRow>,
    pub task_error: Option<String>,
    /// Label text being typed, `Some` while the prompt is open.
    pub prompt: Option<String>,
    pub running: bool,
    render_ready: bool,
}

impl TuiApp {
    pub fn new(ctx: &AppContext, drive: &str) -> Self {
        let panel = ctx.open_panel(drive);
        let view = panel.view();
        Self {
            ctx: ctx.clone(),
            panel,
            view,
            task_rows: Vec::new(),
            task_error: None,
            prompt: None,
            running: true,
            render_ready: false,
        }
    }

    pub fn simulation(&self) -> bool {
        self.ctx.config.simulation
    }

    pub fn subscribe(&self) -> watch::Receiver<PanelView> {
        self.panel.subscribe()
    }

    /// Pull the latest panel view.
    pub fn refresh(&mut self) {
        self.view = self.panel.view();
    }

    /// Called after every draw; the first one releases held mask requests.
    pub fn mark_rendered(&mut self) {
        if !self.render_ready {
            self.render_ready = true;
            self.panel.send(PanelInput::RenderReady);
        }
    }

    pub fn is_prompting(&self) -> bool {
        self.prompt.is_some()
    }

    pub fn is_enabled(&self, action: PanelAction) -> bool {
        action.is_enabled(self.view.flags)
    }

    pub fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => self.running = false,
            Action::Press(action) => self.panel.action(action),
            Action::StartLabel => {
                if self.is_enabled(PanelAction::LabelMedia) {
                    self.prompt = Some(String::new());
                }
            }
            Action::PromptInput(c) => {
                if let Some(text) = &mut self.prompt {
                    text.push(c);
                }
            }
            Action::PromptBackspace => {
                if let Some(text) = &mut self.prompt {
                    text.pop();
                }
            }
            Action::PromptSubmit => {
                if let Some(text) = self.prompt.take() {
                    let text = text.trim();
                    if !text.is_empty() {
                        self.panel.send(PanelInput::Action(
                            PanelAction::LabelMedia,
                            Some(json!({ "label-text": text })),
                        ));
                    }
                }
            }
            Action::PromptCancel => self.prompt = None,
        }
    }

    /// Close the panel session.
    pub async fn close(self) {
        self.panel.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Backend;
    use crate::config::AppConfig;
    use crate::sim::SimulatedBackend;
    use std::sync::Arc;

    fn app(sim: &SimulatedBackend) -> TuiApp {
        let config = AppConfig {
            simulation: true,
            ..AppConfig::default()
        };
        let ctx = AppContext::with_backend(config, Arc::new(sim.clone()));
        TuiApp::new(&ctx, "drv0")
    }

    #[tokio::test(start_paused = true)]
    async fn label_prompt_sends_label_text() {
        let sim = SimulatedBackend::demo();
        let mut app = app(&sim);
        let mut views = app.subscribe();
        views.wait_for(|v| v.flags.online).await.unwrap();
        app.refresh();

        app.handle_action(Action::StartLabel);
        for c in "TAPE09".chars() {
            app.handle_action(Action::PromptInput(c));
        }
        app.handle_action(Action::PromptInput('X'));
        app.handle_action(Action::PromptBackspace);
        assert_eq!(app.prompt.as_deref(), Some("TAPE09"));

        app.handle_action(Action::PromptSubmit);
        assert!(!app.is_prompting());

        views.wait_for(|v| v.running_tasks == 1).await.unwrap();
        views.wait_for(|v| v.running_tasks == 0).await.unwrap();

        let label = sim.run_command("drv0", "read-label", None).await.unwrap();
        assert_eq!(label["label-text"], "TAPE09");
        app.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn label_prompt_needs_online_drive() {
        let sim = SimulatedBackend::new();
        sim.add_drive("drv0");
        let mut app = app(&sim);
        app.refresh();

        app.handle_action(Action::StartLabel);
        assert!(!app.is_prompting());

        app.handle_action(Action::Quit);
        assert!(!app.running);
        app.close().await;
    }
}
