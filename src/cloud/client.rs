//! Typed HTTP wrapper over the Cloud.dk REST API.
//!
//! [`CloudClient::request`] is the single low-level operation: it prepends
//! the configured endpoint, authenticates with the `X-API-Key` header, and
//! retries with a fixed backoff when the transport fails or the status code
//! falls outside the accepted set.  The typed helpers encode the retry
//! parameters of each call site.

use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::cloud::entities::{
    DiskBody, DiskCreateBody, DiskListBody, LogsListBody, ServerBody, ServerCreateBody,
};
use crate::error::CsiError;

/// A decoded-status response; the body stays raw until the caller decodes it.
#[derive(Debug)]
pub struct CloudResponse {
    /// Final HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl CloudResponse {
    /// Decode the body as JSON into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, CsiError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| CsiError::Internal(format!("malformed API response: {e}")))
    }
}

/// Client for the Cloud.dk REST API.
#[derive(Debug, Clone)]
pub struct CloudClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl CloudClient {
    /// Create a client for the given endpoint root and API key.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    /// Perform a request against `<endpoint>/<path_tail>`.
    ///
    /// The request is attempted up to `max_attempts` times with a fixed
    /// `backoff` delay between attempts; an attempt counts as failed when the
    /// transport errors or the status code is not in `accept_status`.  A
    /// terminal 404 surfaces as [`CsiError::NotFound`] so callers can
    /// distinguish absence from failure.
    pub async fn request(
        &self,
        method: Method,
        path_tail: &str,
        body: Option<Vec<u8>>,
        accept_status: &[u16],
        max_attempts: u32,
        backoff: Duration,
    ) -> Result<CloudResponse, CsiError> {
        let url = format!("{}/{}", self.endpoint.trim_end_matches('/'), path_tail);
        let mut last_status: Option<u16> = None;

        for attempt in 1..=max_attempts.max(1) {
            let mut builder = self
                .http
                .request(method.clone(), &url)
                .header("X-API-Key", &self.api_key);

            if let Some(ref bytes) = body {
                builder = builder
                    .header("Content-Type", "application/json")
                    .body(bytes.clone());
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    last_status = Some(status);

                    if accept_status.contains(&status) {
                        let body = response
                            .bytes()
                            .await
                            .map_err(|e| {
                                CsiError::Internal(format!("{method} {path_tail}: {e}"))
                            })?
                            .to_vec();
                        return Ok(CloudResponse { status, body });
                    }

                    debug!(%method, path = path_tail, status, attempt, "unexpected API status");
                }
                Err(e) => {
                    warn!(%method, path = path_tail, attempt, error = %e, "API transport error");
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(backoff).await;
            }
        }

        match last_status {
            Some(404) => Err(CsiError::NotFound(format!("{method} {path_tail}: status 404"))),
            Some(status) => Err(CsiError::Internal(format!(
                "{method} {path_tail}: unexpected status {status}",
            ))),
            None => Err(CsiError::Internal(format!(
                "{method} {path_tail}: request failed after {max_attempts} attempts",
            ))),
        }
    }

    /// Fetch a server by its identifier; absence is [`CsiError::NotFound`].
    pub async fn get_server(&self, id: &str) -> Result<ServerBody, CsiError> {
        self.request(
            Method::GET,
            &format!("cloudservers/{id}"),
            None,
            &[200],
            1,
            Duration::from_secs(1),
        )
        .await?
        .json()
    }

    /// Find a server whose hostname (or label) matches exactly.
    ///
    /// The provider filter is a substring match, so the listing is filtered
    /// client-side; no match is [`CsiError::NotFound`].
    pub async fn get_server_by_hostname(&self, hostname: &str) -> Result<ServerBody, CsiError> {
        let response = self
            .request(
                Method::GET,
                &format!("cloudservers?hostname={hostname}"),
                None,
                &[200],
                1,
                Duration::from_secs(1),
            )
            .await?;

        let servers: Vec<ServerBody> = response.json()?;

        servers
            .into_iter()
            .find(|s| s.hostname == hostname || s.label == hostname)
            .ok_or_else(|| CsiError::NotFound(format!("no server with hostname {hostname:?}")))
    }

    /// Create a new server.
    pub async fn create_server(&self, body: &ServerCreateBody) -> Result<ServerBody, CsiError> {
        let payload = serde_json::to_vec(body).map_err(CsiError::internal)?;
        self.request(
            Method::POST,
            "cloudservers",
            Some(payload),
            &[200],
            1,
            Duration::from_secs(1),
        )
        .await?
        .json()
    }

    /// Delete a server.  Absence (404) counts as success; the call retries
    /// generously because deletion is the compensation path for every failed
    /// create.
    pub async fn delete_server(&self, id: &str) -> Result<(), CsiError> {
        self.request(
            Method::DELETE,
            &format!("cloudservers/{id}"),
            None,
            &[200, 404],
            6,
            Duration::from_secs(10),
        )
        .await?;
        Ok(())
    }

    /// List the disks attached to a server.
    pub async fn list_disks(&self, id: &str) -> Result<DiskListBody, CsiError> {
        self.request(
            Method::GET,
            &format!("cloudservers/{id}/disks"),
            None,
            &[200],
            1,
            Duration::from_secs(1),
        )
        .await?
        .json()
    }

    /// Attach a new disk to a server.
    pub async fn create_disk(
        &self,
        id: &str,
        body: &DiskCreateBody,
    ) -> Result<DiskBody, CsiError> {
        let payload = serde_json::to_vec(body).map_err(CsiError::internal)?;
        self.request(
            Method::POST,
            &format!("cloudservers/{id}/disks"),
            Some(payload),
            &[200],
            1,
            Duration::from_secs(1),
        )
        .await?
        .json()
    }

    /// Fetch the server's transaction log.
    pub async fn list_logs(&self, id: &str) -> Result<LogsListBody, CsiError> {
        self.request(
            Method::GET,
            &format!("cloudservers/{id}/logs"),
            None,
            &[200],
            1,
            Duration::from_secs(1),
        )
        .await?
        .json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_json_decodes() {
        let response = CloudResponse {
            status: 200,
            body: br#"{"identifier": "abc", "hostname": "h", "label": "h"}"#.to_vec(),
        };
        let server: ServerBody = response.json().expect("decode");
        assert_eq!(server.identifier, "abc");
    }

    #[test]
    fn response_json_rejects_garbage() {
        let response = CloudResponse { status: 200, body: b"not json".to_vec() };
        let result: Result<ServerBody, _> = response.json();
        assert!(matches!(result, Err(CsiError::Internal(_))));
    }

    #[tokio::test]
    async fn request_surfaces_transport_failure() {
        // Nothing listens on this address; a single attempt must fail fast
        // with an internal error naming the method and path.
        let client = CloudClient::new("http://127.0.0.1:1/v1", "key");
        let err = client
            .request(Method::GET, "cloudservers/x", None, &[200], 1, Duration::from_millis(10))
            .await
            .expect_err("no server is listening");
        assert!(matches!(err, CsiError::Internal(_)));
        assert!(err.to_string().contains("cloudservers/x"));
    }
}
