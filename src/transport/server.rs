//! Unix-domain-socket server that dispatches incoming CSI requests to the
//! appropriate trait implementations.

use std::path::Path;
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, instrument, warn};

use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;
use crate::node::CsiNode;
use crate::transport::{read_frame, write_frame};

/// A CSI server that accepts connections on a Unix socket and dispatches
/// [`CsiMessage`] requests to a [`CsiIdentity`] + [`CsiController`] +
/// [`CsiNode`] implementation.
pub struct CsiServer<T> {
    listener: UnixListener,
    handler: Arc<T>,
}

impl<T> CsiServer<T>
where
    T: CsiIdentity + CsiController + CsiNode + 'static,
{
    /// Bind the server to `socket_path`.
    ///
    /// A stale socket file left over from a previous process is removed
    /// before binding; the kubelet reconnects after plugin restarts.
    pub fn bind(socket_path: &Path, handler: Arc<T>) -> Result<Self, CsiError> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(CsiError::transport)?;
        }

        if socket_path.exists() {
            std::fs::remove_file(socket_path).map_err(CsiError::transport)?;
        }

        let listener = UnixListener::bind(socket_path).map_err(CsiError::transport)?;
        info!(path = %socket_path.display(), "CSI server listening");
        Ok(Self { listener, handler })
    }

    /// Accept connections in a loop.
    ///
    /// Each accepted connection is served on its own Tokio task; frames
    /// within a connection are handled sequentially, preserving the caller's
    /// request order.
    pub async fn serve(&self) -> Result<(), CsiError> {
        loop {
            let (stream, _addr) = self.listener.accept().await.map_err(CsiError::transport)?;
            let handler = Arc::clone(&self.handler);

            tokio::spawn(async move {
                debug!("CSI connection accepted");
                if let Err(e) = Self::handle_connection(stream, handler).await {
                    warn!(error = %e, "CSI connection error");
                }
            });
        }
    }

    /// Serve all frames on a single connection until the peer hangs up.
    async fn handle_connection(stream: UnixStream, handler: Arc<T>) -> Result<(), CsiError> {
        let (mut reader, mut writer) = stream.into_split();

        while let Some(request) = read_frame(&mut reader).await? {
            debug!(%request, "CSI request received");

            let response = Self::dispatch(&handler, request).await;
            if let Err(e) = write_frame(&mut writer, &response).await {
                error!(error = %e, "failed to write CSI response");
                return Err(e);
            }
        }

        Ok(())
    }

    /// Map a [`CsiMessage`] request to the correct trait method call and
    /// wrap the result in a response [`CsiMessage`].
    #[instrument(skip_all)]
    async fn dispatch(handler: &T, request: CsiMessage) -> CsiMessage {
        match request {
            // --- Identity ---------------------------------------------------
            CsiMessage::GetPluginInfo => match handler.get_plugin_info().await {
                Ok(info) => CsiMessage::PluginInfoResponse(info),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::GetPluginCapabilities => match handler.get_plugin_capabilities().await {
                Ok(caps) => CsiMessage::PluginCapabilitiesResponse(caps),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::Probe => match handler.probe().await {
                Ok(ready) => CsiMessage::ProbeResult(ready),
                Err(e) => CsiMessage::Error(e),
            },

            // --- Controller -------------------------------------------------
            CsiMessage::ControllerGetCapabilities => {
                match handler.controller_capabilities().await {
                    Ok(caps) => CsiMessage::ControllerCapabilitiesResponse(caps),
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::CreateVolume(req) => match handler.create_volume(req).await {
                Ok(volume) => CsiMessage::VolumeCreated(volume),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::DeleteVolume { volume_id } => {
                match handler.delete_volume(&volume_id).await {
                    Ok(()) => CsiMessage::Ok,
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::ControllerPublishVolume(req) => {
                match CsiController::publish_volume(handler, req).await {
                    Ok(()) => CsiMessage::Ok,
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::ControllerUnpublishVolume(req) => {
                match CsiController::unpublish_volume(handler, req).await {
                    Ok(()) => CsiMessage::Ok,
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::ValidateVolumeCapabilities { volume_id, capabilities } => {
                match handler.validate_volume_capabilities(&volume_id, &capabilities).await {
                    Ok(confirmed) => CsiMessage::ConfirmedCapabilities(confirmed),
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::ListVolumes => match handler.list_volumes().await {
                Ok(_) => CsiMessage::Ok,
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::GetCapacity => match handler.get_capacity().await {
                Ok(_) => CsiMessage::Ok,
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::ControllerExpandVolume { volume_id, capacity_range } => {
                let capacity_bytes = capacity_range.map(|r| r.required_bytes).unwrap_or(0);
                match CsiController::expand_volume(handler, &volume_id, capacity_bytes).await {
                    Ok(_) => CsiMessage::Ok,
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::CreateSnapshot { source_volume_id, name } => {
                match handler.create_snapshot(&source_volume_id, &name).await {
                    Ok(()) => CsiMessage::Ok,
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::DeleteSnapshot { snapshot_id } => {
                match handler.delete_snapshot(&snapshot_id).await {
                    Ok(()) => CsiMessage::Ok,
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::ListSnapshots => match handler.list_snapshots().await {
                Ok(()) => CsiMessage::Ok,
                Err(e) => CsiMessage::Error(e),
            },

            // --- Node -------------------------------------------------------
            CsiMessage::NodeGetInfo => match handler.get_info().await {
                Ok(info) => CsiMessage::NodeInfoResponse(info),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::NodeGetCapabilities => match handler.node_capabilities().await {
                Ok(caps) => CsiMessage::NodeCapabilitiesResponse(caps),
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::NodeStageVolume(req) => match handler.stage_volume(req).await {
                Ok(()) => CsiMessage::Ok,
                Err(e) => CsiMessage::Error(e),
            },
            CsiMessage::NodeUnstageVolume { volume_id, staging_target_path } => {
                match handler.unstage_volume(&volume_id, &staging_target_path).await {
                    Ok(()) => CsiMessage::Ok,
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::NodePublishVolume(req) => {
                match CsiNode::publish_volume(handler, req).await {
                    Ok(()) => CsiMessage::Ok,
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::NodeUnpublishVolume { volume_id, target_path } => {
                match CsiNode::unpublish_volume(handler, &volume_id, &target_path).await {
                    Ok(()) => CsiMessage::Ok,
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::NodeExpandVolume { volume_id } => {
                match CsiNode::expand_volume(handler, &volume_id).await {
                    Ok(()) => CsiMessage::Ok,
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::NodeGetVolumeStats { volume_id } => {
                match handler.volume_stats(&volume_id).await {
                    Ok(()) => CsiMessage::Ok,
                    Err(e) => CsiMessage::Error(e),
                }
            }

            // --- Response variants should never arrive as requests ----------
            other => {
                warn!(msg = %other, "unexpected message variant received as request");
                CsiMessage::Error(CsiError::InvalidArgument(format!(
                    "unexpected message: {other}",
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CsiClient;
    use crate::types::*;
    use async_trait::async_trait;

    /// Minimal handler standing in for the real backend.
    struct StubBackend;

    #[async_trait]
    impl CsiIdentity for StubBackend {
        async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
            Ok(PluginInfo { name: "stub".into(), vendor_version: "0.0.0".into() })
        }

        async fn probe(&self) -> Result<bool, CsiError> {
            Ok(true)
        }

        async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
            Ok(vec![PluginCapability::ControllerService])
        }
    }

    #[async_trait]
    impl CsiController for StubBackend {
        async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
            Ok(Volume {
                volume_id: VolumeId::new(VolumeKind::NetworkStorage, req.name),
                capacity_bytes: 0,
            })
        }

        async fn delete_volume(&self, _volume_id: &str) -> Result<(), CsiError> {
            Ok(())
        }

        async fn publish_volume(
            &self,
            _req: ControllerPublishVolumeRequest,
        ) -> Result<(), CsiError> {
            Ok(())
        }

        async fn unpublish_volume(
            &self,
            _req: ControllerUnpublishVolumeRequest,
        ) -> Result<(), CsiError> {
            Ok(())
        }

        async fn validate_volume_capabilities(
            &self,
            _volume_id: &str,
            capabilities: &[VolumeCapability],
        ) -> Result<Vec<VolumeCapability>, CsiError> {
            Ok(capabilities.to_vec())
        }

        async fn controller_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
            Ok(vec![ControllerCapability::CreateDeleteVolume])
        }

        async fn list_volumes(&self) -> Result<Vec<Volume>, CsiError> {
            Err(CsiError::Unimplemented("listing volumes is not supported".into()))
        }

        async fn get_capacity(&self) -> Result<u64, CsiError> {
            Err(CsiError::Unimplemented("capacity queries are not supported".into()))
        }

        async fn expand_volume(
            &self,
            _volume_id: &str,
            _capacity_bytes: u64,
        ) -> Result<u64, CsiError> {
            Err(CsiError::Unimplemented("volume expansion is not supported".into()))
        }

        async fn create_snapshot(
            &self,
            _source_volume_id: &str,
            _name: &str,
        ) -> Result<(), CsiError> {
            Err(CsiError::Unimplemented("snapshots are not supported".into()))
        }

        async fn delete_snapshot(&self, _snapshot_id: &str) -> Result<(), CsiError> {
            Err(CsiError::Unimplemented("snapshots are not supported".into()))
        }

        async fn list_snapshots(&self) -> Result<(), CsiError> {
            Err(CsiError::Unimplemented("snapshots are not supported".into()))
        }
    }

    #[async_trait]
    impl CsiNode for StubBackend {
        async fn stage_volume(&self, _req: NodeStageVolumeRequest) -> Result<(), CsiError> {
            Ok(())
        }

        async fn unstage_volume(
            &self,
            _volume_id: &str,
            _staging_target_path: &str,
        ) -> Result<(), CsiError> {
            Ok(())
        }

        async fn publish_volume(&self, _req: NodePublishVolumeRequest) -> Result<(), CsiError> {
            Ok(())
        }

        async fn unpublish_volume(
            &self,
            _volume_id: &str,
            _target_path: &str,
        ) -> Result<(), CsiError> {
            Ok(())
        }

        async fn get_info(&self) -> Result<NodeInfo, CsiError> {
            Ok(NodeInfo { node_id: "stub-node".into() })
        }

        async fn node_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
            Ok(vec![NodeCapability::StageUnstageVolume])
        }

        async fn expand_volume(&self, _volume_id: &str) -> Result<(), CsiError> {
            Err(CsiError::Unimplemented("volume expansion is not supported".into()))
        }

        async fn volume_stats(&self, _volume_id: &str) -> Result<(), CsiError> {
            Err(CsiError::Unimplemented("volume statistics are not supported".into()))
        }
    }

    async fn start_server(dir: &std::path::Path) -> std::path::PathBuf {
        let socket_path = dir.join("csi.sock");
        let server = CsiServer::bind(&socket_path, Arc::new(StubBackend)).expect("bind");
        tokio::spawn(async move {
            let _ = server.serve().await;
        });
        socket_path
    }

    #[tokio::test]
    async fn request_response_over_unix_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket_path = start_server(dir.path()).await;

        let client = CsiClient::connect(&socket_path).await.expect("connect");

        let response = client.request(&CsiMessage::Probe).await.expect("probe");
        assert!(matches!(response, CsiMessage::ProbeResult(true)));

        let response = client.request(&CsiMessage::GetPluginInfo).await.expect("info");
        match response {
            CsiMessage::PluginInfoResponse(info) => assert_eq!(info.name, "stub"),
            other => panic!("unexpected response: {other}"),
        }

        // Multiple requests flow over the same connection.
        let response = client.request(&CsiMessage::NodeGetInfo).await.expect("node info");
        assert!(matches!(response, CsiMessage::NodeInfoResponse(_)));
    }

    #[tokio::test]
    async fn unimplemented_operations_surface_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket_path = start_server(dir.path()).await;

        let client = CsiClient::connect(&socket_path).await.expect("connect");
        let response = client.request(&CsiMessage::ListVolumes).await.expect("list");
        assert!(matches!(response, CsiMessage::Error(CsiError::Unimplemented(_))));
    }

    #[tokio::test]
    async fn response_variants_are_rejected_as_requests() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket_path = start_server(dir.path()).await;

        let client = CsiClient::connect(&socket_path).await.expect("connect");
        let response = client.request(&CsiMessage::Ok).await.expect("send");
        assert!(matches!(response, CsiMessage::Error(CsiError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn bind_replaces_a_stale_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket_path = dir.path().join("csi.sock");

        // A dead server leaves the socket file behind.
        std::fs::write(&socket_path, b"").expect("stale file");

        let server = CsiServer::bind(&socket_path, Arc::new(StubBackend)).expect("rebind");
        drop(server);
    }
}
