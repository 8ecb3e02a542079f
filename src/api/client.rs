//! REST client for the backup server API.
//!
//! Every endpoint answers with a `{"data": ...}` envelope; failures carry a
//! `{"message": ...}` body and a non-success status.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::Backend;
use super::types::{Device, DriveStatus, Envelope, ErrorBody, TaskStatus, TaskSummary};
use crate::error::{ApiError, ApiResult};

const API_PREFIX: &str = "/api2/json";

/// Backend reached over HTTP(S).
pub struct HttpBackend {
    base_url: String,
    /// `base_url` with the API prefix, parsed once.
    api_root: Url,
    node: String,
    client: Client,
}

impl HttpBackend {
    /// Create a client for the server at `base_url`, e.g. `https://pbs:8007`.
    pub fn new(
        base_url: &str,
        node: &str,
        timeout: Duration,
        accept_invalid_certs: bool,
    ) -> ApiResult<Self> {
        let base_url = base_url.trim_end_matches('/');
        let api_root = Url::parse(&format!("{base_url}{API_PREFIX}"))
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| ApiError::InvalidUrl(base_url.to_string()))?;

        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|source| ApiError::Transport {
                path: base_url.to_string(),
                source,
            })?;

        Ok(Self {
            base_url: base_url.to_string(),
            api_root,
            node: node.to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full endpoint URL; every segment is percent-encoded on its own.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_root.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> ApiResult<T> {
        let url = self.endpoint(segments);
        let path = url
            .path()
            .strip_prefix(self.api_root.path())
            .unwrap_or(url.path());
        debug!(%method, path, "API request");

        let mut request = self.client.request(method, url.clone());
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let transport = |source| ApiError::Transport {
            path: path.to_string(),
            source,
        };

        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(transport)?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&bytes)
                .map(|body| body.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).trim().to_string());
            return Err(ApiError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        let envelope: Envelope<T> =
            serde_json::from_slice(&bytes).map_err(|source| ApiError::Decode {
                path: path.to_string(),
                source,
            })?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list_drives(&self) -> ApiResult<Vec<Device>> {
        self.request(Method::GET, &["tape", "drive"], &[], None)
            .await
    }

    async fn drive_status(&self, drive: &str) -> ApiResult<DriveStatus> {
        self.request(Method::GET, &["tape", "drive", drive, "status"], &[], None)
            .await
    }

    async fn run_command(
        &self,
        drive: &str,
        command: &str,
        params: Option<Value>,
    ) -> ApiResult<Value> {
        let segments = ["tape", "drive", drive, command];
        self.request(Method::POST, &segments, &[], params.as_ref())
            .await
    }

    async fn task_status(&self, upid: &str) -> ApiResult<TaskStatus> {
        let segments = ["nodes", self.node.as_str(), "tasks", upid, "status"];
        self.request(Method::GET, &segments, &[], None).await
    }

    async fn list_tasks(&self, running_only: bool, limit: usize) -> ApiResult<Vec<TaskSummary>> {
        let segments = ["nodes", self.node.as_str(), "tasks"];
        let query = [
            ("running", if running_only { "1" } else { "0" }.to_string()),
            ("limit", limit.to_string()),
        ];
        self.request(Method::GET, &segments, &query, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> HttpBackend {
        HttpBackend::new("https://pbs:8007/", "pbs", Duration::from_secs(5), false).unwrap()
    }

    #[test]
    fn path_segments_are_encoded() {
        let url = backend().endpoint(&["tape", "drive", "drv/0?x#y", "status"]);
        assert_eq!(
            url.as_str(),
            "https://pbs:8007/api2/json/tape/drive/drv%2F0%3Fx%23y/status"
        );
    }

    #[test]
    fn upid_stays_one_segment() {
        let upid = "UPID:pbs:00000001:00000001:00000001:65A0B1C0:eject-media:drv0:root@pam:";
        let url = backend().endpoint(&["nodes", "pbs", "tasks", upid, "status"]);
        let segments: Vec<_> = url.path_segments().unwrap().collect();
        assert_eq!(segments.len(), 7);
        assert_eq!(segments[5], upid);
        assert!(url.path().ends_with("/status"));
    }

    #[test]
    fn bad_base_url_is_rejected() {
        let err = HttpBackend::new("not a url", "pbs", Duration::from_secs(5), false);
        assert!(matches!(err, Err(ApiError::InvalidUrl(_))));
    }
}
