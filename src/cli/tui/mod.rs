//! Interactive drive status panel.
//!
//! Renders the [`PanelView`](crate::core::PanelView) of one drive together
//! with the running tasks of the node, and turns key presses into panel
//! actions.

mod app;
mod input;
mod ui;

use std::io::{self, stdout};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::mpsc;

use crate::context::AppContext;
use crate::core::RunningTasks;
use app::TuiApp;

/// Run the panel for `drive` until the operator quits.
pub async fn run(ctx: AppContext, drive: &str) -> Result<()> {
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen).context("Failed to enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("Failed to create terminal")?;

    let mut app = TuiApp::new(&ctx, drive);
    let mut tasks = RunningTasks::start(
        ctx.backend.clone(),
        ctx.config.task_poll_interval(),
        ctx.config.task_list_limit,
    );
    let result = run_app(&mut terminal, &mut app, &mut tasks).await;

    disable_raw_mode().context("Failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("Failed to leave alternate screen")?;
    terminal.show_cursor().context("Failed to show cursor")?;

    app.close().await;
    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut TuiApp,
    tasks: &mut RunningTasks,
) -> Result<()> {
    let mut events = spawn_event_reader();
    let mut views = app.subscribe();
    // Keeps the duration column of running tasks moving.
    let mut tick = tokio::time::interval(Duration::from_secs(1));

    loop {
        app.refresh();
        app.task_rows = tasks.rows(chrono::Utc::now().timestamp());
        app.task_error = tasks.error();

        terminal.draw(|frame| ui::render(frame, app))?;
        app.mark_rendered();

        if !app.running {
            break;
        }

        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if let Some(action) = input::handle_event(event, app.is_prompting()) {
                        app.handle_action(action);
                    }
                }
                None => break,
            },
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tasks.changed() => {}
            _ = tick.tick() => {}
        }
    }

    Ok(())
}

/// Read terminal events on a dedicated thread; crossterm's reader blocks.
fn spawn_event_reader() -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        while !tx.is_closed() {
            match event::poll(Duration::from_millis(200)) {
                Ok(true) => match event::read() {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                Ok(false) => {}
                Err(_) => break,
            }
        }
    });
    rx
}
