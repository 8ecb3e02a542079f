//! One-shot subcommands.

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::context::AppContext;
use crate::core::state::is_online;
use crate::core::tasks::{format_timestamp, task_rows};
use crate::core::{CommandOutcome, TaskState};

/// Parse `key=value` pairs into a JSON object for a command payload.
pub fn parse_params(pairs: &[String]) -> Result<Option<Value>> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let mut map = Map::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid parameter '{pair}', expected key=value");
        };
        if key.is_empty() {
            bail!("invalid parameter '{pair}', empty key");
        }
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(Some(Value::Object(map)))
}

pub async fn list_drives(ctx: &AppContext) -> Result<()> {
    let drives = ctx
        .backend
        .list_drives()
        .await
        .context("Failed to list drives")?;

    if drives.is_empty() {
        println!("No drives configured");
        return Ok(());
    }

    println!("{:<12} {:<10} {:<16} {:<14} STATE", "NAME", "VENDOR", "MODEL", "SERIAL");
    for drive in drives {
        println!(
            "{:<12} {:<10} {:<16} {:<14} {}",
            drive.name,
            drive.vendor,
            drive.model,
            drive.serial,
            drive.state.as_deref().filter(|s| !s.is_empty()).unwrap_or("-")
        );
    }
    Ok(())
}

pub async fn show_status(ctx: &AppContext, drive: &str) -> Result<()> {
    let status = ctx
        .backend
        .drive_status(drive)
        .await
        .with_context(|| format!("Failed to read status of drive '{drive}'"))?;

    println!("{}", serde_json::to_string_pretty(&status)?);
    if !is_online(Some(&status)) {
        println!("(drive is not online, media commands are unavailable)");
    }
    Ok(())
}

/// Issue a command and, for task commands, wait for the task to stop.
pub async fn run_command(
    ctx: &AppContext,
    drive: &str,
    command: &str,
    params: Option<Value>,
) -> Result<()> {
    let (done_tx, done_rx) = oneshot::channel();
    let outcome = ctx
        .dispatcher
        .issue(drive, command, params, CancellationToken::new(), move |completion| {
            let _ = done_tx.send(completion);
        })
        .await
        .with_context(|| format!("{command} on drive '{drive}' failed"))?;

    match outcome {
        CommandOutcome::Completed(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        CommandOutcome::Started(handle) => {
            println!("Task started: {}", handle.upid);
            let completion = done_rx.await.context("Task observer went away")?;
            info!(upid = %completion.handle.upid, status = completion.state.class(), "Task stopped");
            match completion.state {
                TaskState::Ok => {
                    println!("Task finished: OK");
                    Ok(())
                }
                TaskState::Warning(text) => {
                    println!("Task finished: {text}");
                    Ok(())
                }
                TaskState::Error(text) => bail!("task {} failed: {text}", completion.handle.upid),
                TaskState::Unknown | TaskState::Running => {
                    bail!("task {} ended with unknown status", completion.handle.upid)
                }
            }
        }
    }
}

pub async fn list_tasks(ctx: &AppContext, all: bool) -> Result<()> {
    let tasks = ctx
        .backend
        .list_tasks(!all, ctx.config.task_list_limit)
        .await
        .context("Failed to list tasks")?;

    if tasks.is_empty() {
        println!("No {}tasks", if all { "" } else { "running " });
        return Ok(());
    }

    let now = chrono::Utc::now().timestamp();
    for row in task_rows(&tasks, now) {
        println!(
            "{} {:<28} {:<14} {}  {:>6}s  {}",
            row.state.glyph(),
            row.description,
            row.user,
            row.started,
            row.duration,
            row.upid
        );
    }
    println!("({} tasks as of {})", tasks.len(), format_timestamp(now));
    Ok(())
}
