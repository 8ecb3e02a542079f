//! Drive commands known to the console.
//!
//! The table is plain data. A new command only needs an entry with the
//! right shape; the dispatcher does not change.

use serde_json::Value;

use crate::error::{ApiError, ApiResult};

/// How the backend answers a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandShape {
    /// The reply is the result payload.
    Sync,
    /// The reply is the UPID of a worker task.
    Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub shape: CommandShape,
    pub title: &'static str,
    /// Parameter that must be present in the payload.
    pub required_param: Option<&'static str>,
}

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "eject-media",
        shape: CommandShape::Task,
        title: "Eject Media",
        required_param: None,
    },
    CommandSpec {
        name: "catalog",
        shape: CommandShape::Task,
        title: "Catalog Media",
        required_param: None,
    },
    CommandSpec {
        name: "label-media",
        shape: CommandShape::Task,
        title: "Label Media",
        required_param: Some("label-text"),
    },
    CommandSpec {
        name: "read-label",
        shape: CommandShape::Sync,
        title: "Read Label",
        required_param: None,
    },
    CommandSpec {
        name: "volume-statistics",
        shape: CommandShape::Sync,
        title: "Volume Statistics",
        required_param: None,
    },
    CommandSpec {
        name: "cartridge-memory",
        shape: CommandShape::Sync,
        title: "Cartridge Memory",
        required_param: None,
    },
];

pub fn lookup(name: &str) -> ApiResult<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|spec| spec.name == name)
        .ok_or_else(|| ApiError::UnknownCommand(name.to_string()))
}

impl CommandSpec {
    /// Check the payload carries the required parameter.
    pub fn check_params(&self, params: Option<&Value>) -> ApiResult<()> {
        let Some(required) = self.required_param else {
            return Ok(());
        };
        let present = params
            .and_then(|p| p.get(required))
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty());
        if present {
            Ok(())
        } else {
            Err(ApiError::Rejected(format!(
                "{} requires parameter '{}'",
                self.name, required
            )))
        }
    }
}

/// Human readable name of a worker type, as shown in task lists.
pub fn describe_worker(worker_type: &str, worker_id: Option<&str>) -> String {
    let title = match worker_type {
        "catalog-media" => "Catalog Media",
        "label-media" => "Label Media",
        "barcode-label-media" => "Barcode Label Media",
        "tape-backup" => "Tape Backup",
        "tape-restore" => "Tape Restore",
        other => {
            return match lookup(other) {
                Ok(spec) => with_id(spec.title, worker_id),
                Err(_) => with_id(other, worker_id),
            };
        }
    };
    with_id(title, worker_id)
}

fn with_id(title: &str, worker_id: Option<&str>) -> String {
    match worker_id {
        Some(id) if !id.is_empty() => format!("{title} {id}"),
        _ => title.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shapes_match_command_kinds() {
        assert_eq!(lookup("eject-media").unwrap().shape, CommandShape::Task);
        assert_eq!(lookup("catalog").unwrap().shape, CommandShape::Task);
        assert_eq!(lookup("read-label").unwrap().shape, CommandShape::Sync);
        assert_eq!(lookup("volume-statistics").unwrap().shape, CommandShape::Sync);
        assert_eq!(lookup("cartridge-memory").unwrap().shape, CommandShape::Sync);
        assert!(matches!(lookup("format-media"), Err(ApiError::UnknownCommand(_))));
    }

    #[test]
    fn label_media_needs_label_text() {
        let spec = lookup("label-media").unwrap();
        assert!(spec.check_params(None).is_err());
        assert!(spec.check_params(Some(&json!({ "label-text": "  " }))).is_err());
        assert!(spec.check_params(Some(&json!({ "label-text": "TAPE01" }))).is_ok());
        assert!(lookup("eject-media").unwrap().check_params(None).is_ok());
    }

    #[test]
    fn worker_descriptions() {
        assert_eq!(describe_worker("eject-media", Some("drv0")), "Eject Media drv0");
        assert_eq!(describe_worker("catalog-media", Some("drv0")), "Catalog Media drv0");
        assert_eq!(describe_worker("garbage_collection", None), "garbage_collection");
    }
}
