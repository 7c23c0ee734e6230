//! SSH and SFTP sessions to storage servers.
//!
//! Two dial paths exist: password authentication is used once, during the
//! initial bootstrap of a freshly created server, before the driver's public
//! key has been authorized; key authentication covers every operation after
//! that.  Host keys are not verified — each server is minted by this driver
//! and must be bootstrapped within minutes of creation, before any
//! fingerprint could have been recorded.

use std::sync::Arc;

use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::CsiError;

const SSH_USER: &str = "root";
const SSH_PORT: u16 = 22;

/// Accepts any host key; see the module docs for the trust assumption.
struct AcceptAllHostKeys;

#[async_trait::async_trait]
impl client::Handler for AcceptAllHostKeys {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Factory for SSH connections to storage servers.
#[derive(Debug, Clone)]
pub struct SshFactory {
    private_key_pem: String,
}

impl SshFactory {
    /// Create a factory around the driver's decoded PEM private key.  The key
    /// is parsed per dial, so construction never fails.
    pub fn new(private_key_pem: impl Into<String>) -> Self {
        Self { private_key_pem: private_key_pem.into() }
    }

    async fn dial(&self, ip: &str) -> Result<Handle<AcceptAllHostKeys>, CsiError> {
        let config = Arc::new(client::Config::default());
        client::connect(config, (ip, SSH_PORT), AcceptAllHostKeys)
            .await
            .map_err(|e| CsiError::Internal(format!("ssh dial {ip}: {e}")))
    }

    /// Connect with the server's initial root password (bootstrap only).
    pub async fn dial_password(
        &self,
        ip: &str,
        password: &str,
    ) -> Result<SshConnection, CsiError> {
        let mut handle = self.dial(ip).await?;

        let authenticated = handle
            .authenticate_password(SSH_USER, password)
            .await
            .map_err(|e| CsiError::Internal(format!("ssh password auth {ip}: {e}")))?;

        if !authenticated {
            return Err(CsiError::Internal(format!("ssh password auth rejected by {ip}")));
        }

        debug!(ip, "ssh connection established (password)");
        Ok(SshConnection { handle })
    }

    /// Connect with the driver's private key (steady state).
    pub async fn dial_key(&self, ip: &str) -> Result<SshConnection, CsiError> {
        let key_pair = russh_keys::decode_secret_key(&self.private_key_pem, None)
            .map_err(|e| CsiError::Internal(format!("ssh private key: {e}")))?;

        let mut handle = self.dial(ip).await?;

        let authenticated = handle
            .authenticate_publickey(SSH_USER, Arc::new(key_pair))
            .await
            .map_err(|e| CsiError::Internal(format!("ssh key auth {ip}: {e}")))?;

        if !authenticated {
            return Err(CsiError::Internal(format!("ssh key auth rejected by {ip}")));
        }

        debug!(ip, "ssh connection established (key)");
        Ok(SshConnection { handle })
    }
}

/// An authenticated SSH connection to a storage server.
pub struct SshConnection {
    handle: Handle<AcceptAllHostKeys>,
}

impl SshConnection {
    /// Open an SFTP channel on this connection.
    pub async fn open_sftp(&self) -> Result<SftpSession, CsiError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| CsiError::Internal(format!("ssh channel: {e}")))?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| CsiError::Internal(format!("sftp subsystem: {e}")))?;

        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| CsiError::Internal(format!("sftp session: {e}")))
    }

    /// Run a command and collect its combined output.  A missing or non-zero
    /// exit status is an error carrying the output.
    pub async fn run(&self, command: &str) -> Result<String, CsiError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| CsiError::Internal(format!("ssh channel: {e}")))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| CsiError::Internal(format!("ssh exec: {e}")))?;

        let mut output = Vec::new();
        let mut exit_status: Option<u32> = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, .. } => output.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                _ => {}
            }
        }

        let output = String::from_utf8_lossy(&output).into_owned();

        match exit_status {
            Some(0) => Ok(output),
            Some(status) => Err(CsiError::Internal(format!(
                "command exited with status {status}: {}",
                output.trim(),
            ))),
            None => Err(CsiError::Internal(format!(
                "command ended without an exit status: {}",
                output.trim(),
            ))),
        }
    }

    /// Write `contents` to `path` over SFTP, creating parent directories and
    /// overwriting any existing file.  Carriage returns are stripped so the
    /// uploaded scripts always carry LF line endings.
    pub async fn upload(
        &self,
        sftp: &SftpSession,
        path: &str,
        contents: &str,
    ) -> Result<(), CsiError> {
        let map_err =
            |e: russh_sftp::client::error::Error| CsiError::Internal(format!("sftp {path}: {e}"));

        // mkdir -p for every parent segment.
        if let Some((parent, _)) = path.rsplit_once('/') {
            let mut partial = String::new();
            for segment in parent.split('/').filter(|s| !s.is_empty()) {
                partial.push('/');
                partial.push_str(segment);
                if !sftp.try_exists(&partial).await.map_err(map_err)? {
                    sftp.create_dir(&partial).await.map_err(map_err)?;
                }
            }
        }

        let normalized = contents.replace('\r', "");

        let mut file = sftp.create(path).await.map_err(map_err)?;
        file.write_all(normalized.as_bytes())
            .await
            .map_err(|e| CsiError::Internal(format!("sftp write {path}: {e}")))?;
        file.shutdown()
            .await
            .map_err(|e| CsiError::Internal(format!("sftp close {path}: {e}")))?;

        debug!(path, bytes = normalized.len(), "uploaded file");
        Ok(())
    }

    /// Close the connection gracefully.  Errors are ignored; the server side
    /// reaps half-closed connections on its own.
    pub async fn disconnect(self) {
        let _ = self.handle.disconnect(Disconnect::ByApplication, "", "en").await;
    }
}
