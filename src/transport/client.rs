//! Unix-domain-socket client used to issue CSI requests, primarily from
//! tests and diagnostics tooling.

use std::path::Path;

use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::CsiError;
use crate::message::CsiMessage;
use crate::transport::{read_frame, write_frame};

/// A lightweight CSI client that sends [`CsiMessage`] requests over a single
/// socket connection and returns the server's response.
pub struct CsiClient {
    stream: Mutex<UnixStream>,
}

impl CsiClient {
    /// Connect to the CSI server at `socket_path`.
    pub async fn connect(socket_path: &Path) -> Result<Self, CsiError> {
        let stream = UnixStream::connect(socket_path).await.map_err(CsiError::transport)?;
        debug!(path = %socket_path.display(), "CSI connection established");
        Ok(Self { stream: Mutex::new(stream) })
    }

    /// Send a request and wait for the corresponding response.
    ///
    /// Requests share one connection and are serialized on it; the server
    /// answers every frame with exactly one response frame.
    pub async fn request(&self, msg: &CsiMessage) -> Result<CsiMessage, CsiError> {
        let mut stream = self.stream.lock().await;

        write_frame(&mut *stream, msg).await?;

        let response = read_frame(&mut *stream)
            .await?
            .ok_or_else(|| CsiError::Transport("connection closed before response".into()))?;

        debug!(%response, "CSI response received");
        Ok(response)
    }
}
