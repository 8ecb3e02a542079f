//! Unique process/task identifiers.
//!
//! Format: `UPID:{node}:{pid:08X}:{pstart:08X}:{task_id:08X}:{starttime:08X}:{worker_type}:{worker_id}:{auth_id}:`

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ApiError;

static UPID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^UPID:(?P<node>[a-zA-Z0-9]([a-zA-Z0-9\-]*[a-zA-Z0-9])?):",
        r"(?P<pid>[0-9A-Fa-f]{8}):(?P<pstart>[0-9A-Fa-f]{8,9}):(?P<task_id>[0-9A-Fa-f]{8,16}):",
        r"(?P<starttime>[0-9A-Fa-f]{8}):(?P<wtype>[^:\s]+):(?P<wid>[^:\s]*):(?P<authid>[^:\s]+):$"
    ))
    .unwrap_or_else(|e| panic!("UPID pattern does not compile: {e}"))
});

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Upid {
    pub node: String,
    pub pid: u32,
    pub pstart: u64,
    pub task_id: u64,
    pub starttime: i64,
    pub worker_type: String,
    pub worker_id: Option<String>,
    pub auth_id: String,
    raw: String,
}

impl Upid {
    /// Build a new identifier, formatted the way the backend does.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node: &str,
        pid: u32,
        pstart: u64,
        task_id: u64,
        starttime: i64,
        worker_type: &str,
        worker_id: Option<&str>,
        auth_id: &str,
    ) -> Self {
        let raw = format!(
            "UPID:{}:{:08X}:{:08X}:{:08X}:{:08X}:{}:{}:{}:",
            node,
            pid,
            pstart,
            task_id,
            starttime,
            worker_type,
            worker_id.unwrap_or(""),
            auth_id
        );
        Self {
            node: node.to_string(),
            pid,
            pstart,
            task_id,
            starttime,
            worker_type: worker_type.to_string(),
            worker_id: worker_id.map(str::to_string),
            auth_id: auth_id.to_string(),
            raw,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for Upid {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ApiError::InvalidUpid(s.to_string());
        let caps = UPID_REGEX.captures(s).ok_or_else(invalid)?;

        let hex_u64 = |name: &str| u64::from_str_radix(&caps[name], 16).map_err(|_| invalid());
        let pid = u32::from_str_radix(&caps["pid"], 16).map_err(|_| invalid())?;
        let starttime = i64::from_str_radix(&caps["starttime"], 16).map_err(|_| invalid())?;
        let worker_id = match &caps["wid"] {
            "" => None,
            wid => Some(wid.to_string()),
        };

        Ok(Self {
            node: caps["node"].to_string(),
            pid,
            pstart: hex_u64("pstart")?,
            task_id: hex_u64("task_id")?,
            starttime,
            worker_type: caps["wtype"].to_string(),
            worker_id,
            auth_id: caps["authid"].to_string(),
            raw: s.to_string(),
        })
    }
}

impl fmt::Display for Upid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for Upid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Upid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "UPID:pbs1:000004D2:0001E240:0000002A:65A0B1C0:eject-media:drv0:root@pam:";

    #[test]
    fn parses_all_fields() {
        let upid: Upid = SAMPLE.parse().unwrap();
        assert_eq!(upid.node, "pbs1");
        assert_eq!(upid.pid, 1234);
        assert_eq!(upid.pstart, 123456);
        assert_eq!(upid.task_id, 42);
        assert_eq!(upid.starttime, 0x65A0B1C0);
        assert_eq!(upid.worker_type, "eject-media");
        assert_eq!(upid.worker_id.as_deref(), Some("drv0"));
        assert_eq!(upid.auth_id, "root@pam");
        assert_eq!(upid.to_string(), SAMPLE);
    }

    #[test]
    fn new_formats_like_backend() {
        let upid = Upid::new("pbs1", 1234, 123456, 42, 0x65A0B1C0, "eject-media", Some("drv0"), "root@pam");
        assert_eq!(upid.as_str(), SAMPLE);
        assert_eq!(SAMPLE.parse::<Upid>().unwrap(), upid);
    }

    #[test]
    fn empty_worker_id() {
        let upid: Upid = "UPID:pbs1:000004D2:0001E240:0000002A:65A0B1C0:garbage_collection::root@pam:"
            .parse()
            .unwrap();
        assert!(upid.worker_id.is_none());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!("not-a-upid".parse::<Upid>(), Err(ApiError::InvalidUpid(_))));
        assert!("UPID:pbs1:XYZ:0:0:0:a:b:c:".parse::<Upid>().is_err());
    }
}
