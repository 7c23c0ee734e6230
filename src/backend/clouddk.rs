//! Cloud.dk backend for CSI.
//!
//! [`CloudDkBackend`] implements [`CsiIdentity`], [`CsiController`], and
//! [`CsiNode`] on top of the [`NetworkStorageManager`].  Controller
//! operations act on the remote cloud (server records, exports, ipset); node
//! operations act on the local filesystem (NFS and bind mounts).
//!
//! # Volume routing
//!
//! Volume identifiers carry a kind prefix.  Multi-node capabilities map to
//! network storage (`ns-`); everything else routes to the block storage
//! (`bs-`) arms, which are wired through but answer `Unimplemented`.
//!
//! # Thread safety
//!
//! The backend holds no mutable state: every request reads and writes remote
//! or node-local resources only, so concurrent RPCs need no in-process
//! locking.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, instrument};

use crate::backend::network_storage::{NetworkStorage, NetworkStorageManager};
use crate::config::Configuration;
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::node::CsiNode;
use crate::types::*;

/// The canonical plugin name registered with Kubernetes.
pub const DRIVER_NAME: &str = "csi.cloud.dk";

/// The driver's version number.
pub const DRIVER_VERSION: &str = "0.1.0";

const GIB: u64 = 1_073_741_824;

/// Concrete CSI backend backed by Cloud.dk virtual servers.
pub struct CloudDkBackend {
    manager: NetworkStorageManager,
    node_id: String,
}

impl CloudDkBackend {
    /// Create a backend from the driver configuration.
    pub fn new(config: &Configuration) -> Result<Self, CsiError> {
        Ok(Self {
            manager: NetworkStorageManager::new(config)?,
            node_id: config.node_id.clone(),
        })
    }

    /// Parse a raw volume identifier, requiring it to be present.
    fn parse_volume_id(volume_id: &str) -> Result<VolumeId, CsiError> {
        if volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("the volume ID must be provided".into()));
        }
        VolumeId::parse(volume_id)
    }

    /// Load a network storage volume, or fail with `Unimplemented` for the
    /// block storage arm.
    async fn load_network_storage(&self, id: &VolumeId) -> Result<NetworkStorage, CsiError> {
        match id.kind() {
            VolumeKind::BlockStorage => {
                Err(CsiError::Unimplemented("block storage has not been implemented".into()))
            }
            VolumeKind::NetworkStorage => self.manager.load(id.cloud_id()).await,
        }
    }
}

/// Run an external mount utility and fail on a non-zero exit.
async fn run_command(program: &str, args: &[&str]) -> Result<(), CsiError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| CsiError::Internal(format!("{program}: {e}")))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(CsiError::Internal(format!(
            "{program} {} exited with {}: {}",
            args.join(" "),
            output.status,
            stderr.trim(),
        )))
    }
}

// ---------------------------------------------------------------------------
// CsiIdentity
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiIdentity for CloudDkBackend {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo { name: DRIVER_NAME.to_owned(), vendor_version: DRIVER_VERSION.to_owned() })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        Ok(true)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(vec![PluginCapability::ControllerService])
    }
}

// ---------------------------------------------------------------------------
// CsiController
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiController for CloudDkBackend {
    #[instrument(skip(self, req), fields(name = %req.name))]
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        if req.name.is_empty() {
            return Err(CsiError::InvalidArgument("the volume name must be provided".into()));
        }
        if req.volume_capabilities.is_empty() {
            return Err(CsiError::InvalidArgument(
                "the volume capabilities must be provided".into(),
            ));
        }
        if req.volume_content_source.is_some() {
            return Err(CsiError::InvalidArgument("volume sources are not supported".into()));
        }

        let size_gib = parse_capacity(req.capacity_range.as_ref())?;

        // Multi-node capabilities need an NFS server; anything else would be
        // block storage.
        let network_storage =
            req.volume_capabilities.iter().any(|cap| cap.access_mode.is_multi_node());

        if !network_storage {
            return Err(CsiError::Unimplemented("block storage has not been implemented".into()));
        }

        let ns = self.manager.create(&req.name, size_gib).await?;

        info!(volume_id = %ns.id, size_gib, "volume created");
        Ok(Volume {
            volume_id: VolumeId::new(VolumeKind::NetworkStorage, ns.id),
            capacity_bytes: ns.size_gib * GIB,
        })
    }

    #[instrument(skip(self))]
    async fn delete_volume(&self, volume_id: &str) -> Result<(), CsiError> {
        let id = Self::parse_volume_id(volume_id)?;

        match id.kind() {
            VolumeKind::BlockStorage => {
                Err(CsiError::Unimplemented("block storage has not been implemented".into()))
            }
            VolumeKind::NetworkStorage => {
                // A server that is already gone makes the delete a no-op.
                let ns = match self.manager.load(id.cloud_id()).await {
                    Ok(ns) => ns,
                    Err(CsiError::NotFound(_)) => return Ok(()),
                    Err(e) => return Err(e),
                };

                self.manager.delete(&ns.id).await?;
                info!(%volume_id, "volume deleted");
                Ok(())
            }
        }
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, node_id = %req.node_id))]
    async fn publish_volume(&self, req: ControllerPublishVolumeRequest) -> Result<(), CsiError> {
        if req.node_id.is_empty() {
            return Err(CsiError::InvalidArgument("the node ID must be provided".into()));
        }
        if req.readonly {
            return Err(CsiError::InvalidArgument("read-only volumes are not supported".into()));
        }

        let id = Self::parse_volume_id(&req.volume_id)?;
        let ns = self.load_network_storage(&id).await?;

        self.manager.add_node(&ns, &req.node_id).await?;
        info!(volume_id = %req.volume_id, node_id = %req.node_id, "volume published");
        Ok(())
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, node_id = %req.node_id))]
    async fn unpublish_volume(
        &self,
        req: ControllerUnpublishVolumeRequest,
    ) -> Result<(), CsiError> {
        if req.node_id.is_empty() {
            return Err(CsiError::InvalidArgument("the node ID must be provided".into()));
        }

        let id = Self::parse_volume_id(&req.volume_id)?;

        // A vanished volume has nothing left to revoke.
        let ns = match self.load_network_storage(&id).await {
            Ok(ns) => ns,
            Err(CsiError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        self.manager.remove_node(&ns, &req.node_id).await?;
        info!(volume_id = %req.volume_id, node_id = %req.node_id, "volume unpublished");
        Ok(())
    }

    async fn validate_volume_capabilities(
        &self,
        volume_id: &str,
        capabilities: &[VolumeCapability],
    ) -> Result<Vec<VolumeCapability>, CsiError> {
        if capabilities.is_empty() {
            return Err(CsiError::InvalidArgument(
                "the volume capabilities must be provided".into(),
            ));
        }

        let id = Self::parse_volume_id(volume_id)?;

        let supported_modes: &[AccessMode] = match id.kind() {
            VolumeKind::BlockStorage => &[AccessMode::SingleNodeWriter],
            VolumeKind::NetworkStorage => {
                self.manager.load(id.cloud_id()).await?;
                &[AccessMode::MultiNodeMultiWriter]
            }
        };

        let confirmed: Vec<VolumeCapability> = capabilities
            .iter()
            .filter(|cap| supported_modes.contains(&cap.access_mode))
            .cloned()
            .collect();

        if confirmed.len() != capabilities.len() {
            return Err(CsiError::InvalidArgument("unsupported volume capabilities".into()));
        }

        Ok(confirmed)
    }

    async fn controller_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        Ok(vec![
            ControllerCapability::CreateDeleteVolume,
            ControllerCapability::PublishUnpublishVolume,
        ])
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>, CsiError> {
        Err(CsiError::Unimplemented("listing volumes is not supported".into()))
    }

    async fn get_capacity(&self) -> Result<u64, CsiError> {
        Err(CsiError::Unimplemented("capacity queries are not supported".into()))
    }

    async fn expand_volume(&self, _volume_id: &str, _capacity_bytes: u64) -> Result<u64, CsiError> {
        Err(CsiError::Unimplemented("volume expansion is not supported".into()))
    }

    async fn create_snapshot(&self, _source_volume_id: &str, _name: &str) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("snapshots are not supported".into()))
    }

    async fn delete_snapshot(&self, _snapshot_id: &str) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("snapshots are not supported".into()))
    }

    async fn list_snapshots(&self) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("snapshots are not supported".into()))
    }
}

// ---------------------------------------------------------------------------
// CsiNode
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiNode for CloudDkBackend {
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        let id = Self::parse_volume_id(&req.volume_id)?;

        if req.staging_target_path.is_empty() {
            return Err(CsiError::InvalidArgument(
                "the staging target path must be provided".into(),
            ));
        }
        let ns = self.load_network_storage(&id).await?;

        tokio::fs::create_dir_all(&req.staging_target_path).await.map_err(|e| {
            CsiError::MountFailed { path: req.staging_target_path.clone(), reason: e.to_string() }
        })?;

        let export = format!("{}:/mnt/data", ns.ip);
        run_command("mount", &["-t", "nfs", &export, &req.staging_target_path])
            .await
            .map_err(|e| CsiError::MountFailed {
                path: req.staging_target_path.clone(),
                reason: e.to_string(),
            })?;

        info!(path = %req.staging_target_path, export, "volume staged");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unstage_volume(
        &self,
        volume_id: &str,
        staging_target_path: &str,
    ) -> Result<(), CsiError> {
        if staging_target_path.is_empty() {
            return Err(CsiError::InvalidArgument(
                "the staging target path must be provided".into(),
            ));
        }

        let id = Self::parse_volume_id(volume_id)?;
        if id.kind() == VolumeKind::BlockStorage {
            return Err(CsiError::Unimplemented("block storage has not been implemented".into()));
        }

        run_command("umount", &[staging_target_path]).await.map_err(|e| {
            CsiError::UnmountFailed { path: staging_target_path.to_owned(), reason: e.to_string() }
        })?;

        info!(path = staging_target_path, "volume unstaged");
        Ok(())
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        if req.staging_target_path.is_empty() {
            return Err(CsiError::InvalidArgument(
                "the staging target path must be provided".into(),
            ));
        }
        if req.target_path.is_empty() {
            return Err(CsiError::InvalidArgument("the target path must be provided".into()));
        }
        Self::parse_volume_id(&req.volume_id)?;

        let target = Path::new(&req.target_path);
        tokio::fs::create_dir_all(target).await.map_err(|e| CsiError::MountFailed {
            path: req.target_path.clone(),
            reason: e.to_string(),
        })?;
        tokio::fs::set_permissions(target, std::fs::Permissions::from_mode(0o750))
            .await
            .map_err(|e| CsiError::MountFailed {
                path: req.target_path.clone(),
                reason: e.to_string(),
            })?;

        run_command("mount", &["--bind", &req.staging_target_path, &req.target_path])
            .await
            .map_err(|e| CsiError::MountFailed {
                path: req.target_path.clone(),
                reason: e.to_string(),
            })?;

        info!(target_path = %req.target_path, "volume published (bind-mount)");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unpublish_volume(
        &self,
        volume_id: &str,
        target_path: &str,
    ) -> Result<(), CsiError> {
        if target_path.is_empty() {
            return Err(CsiError::InvalidArgument("the target path must be provided".into()));
        }
        Self::parse_volume_id(volume_id)?;

        run_command("umount", &[target_path]).await.map_err(|e| CsiError::UnmountFailed {
            path: target_path.to_owned(),
            reason: e.to_string(),
        })?;

        tokio::fs::remove_dir_all(target_path).await.map_err(|e| CsiError::UnmountFailed {
            path: target_path.to_owned(),
            reason: e.to_string(),
        })?;

        info!(target_path, "volume unpublished");
        Ok(())
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo { node_id: self.node_id.clone() })
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

#[cfg(test)]
mod tests {
    use super::*;

    fn make_backend() -> CloudDkBackend {
        let config = Configuration {
            api_endpoint: "http://127.0.0.1:1/v1".into(),
            api_key: "test-key".into(),
            csi_endpoint: "unix:///tmp/csi.sock".into(),
            node_id: "test-node".into(),
            server_memory: 4096,
            server_processors: 2,
            ssh_private_key: String::new(),
            ssh_public_key: String::new(),
        };
        CloudDkBackend::new(&config).expect("backend")
    }

    #[tokio::test]
    async fn plugin_info() {
        let backend = make_backend();
        let info = backend.get_plugin_info().await.unwrap();
        assert_eq!(info.name, "csi.cloud.dk");
        assert_eq!(info.vendor_version, "0.1.0");
    }

    #[tokio::test]
    async fn probe_is_always_ready() {
        assert!(make_backend().probe().await.unwrap());
    }

    #[tokio::test]
    async fn advertised_capabilities() {
        let backend = make_backend();
        assert_eq!(
            backend.get_plugin_capabilities().await.unwrap(),
            vec![PluginCapability::ControllerService],
        );
        assert_eq!(
            backend.controller_capabilities().await.unwrap(),
            vec![
                ControllerCapability::CreateDeleteVolume,
                ControllerCapability::PublishUnpublishVolume,
            ],
        );
        assert_eq!(
            backend.node_capabilities().await.unwrap(),
            vec![NodeCapability::StageUnstageVolume],
        );
    }

    #[tokio::test]
    async fn node_info_reports_configured_id() {
        let info = make_backend().get_info().await.unwrap();
        assert_eq!(info.node_id, "test-node");
    }

    #[tokio::test]
    async fn create_volume_requires_name_and_capabilities() {
        let backend = make_backend();

        let result = backend.create_volume(CreateVolumeRequest::default()).await;
        assert!(matches!(result, Err(CsiError::InvalidArgument(_))));

        let result = backend
            .create_volume(CreateVolumeRequest { name: "pvc-1".into(), ..Default::default() })
            .await;
        assert!(matches!(result, Err(CsiError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn create_volume_rejects_content_sources() {
        let backend = make_backend();
        let result = backend
            .create_volume(CreateVolumeRequest {
                name: "pvc-1".into(),
                volume_capabilities: vec![VolumeCapability::with_mode(
                    AccessMode::MultiNodeMultiWriter,
                )],
                volume_content_source: Some("ns-other".into()),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(CsiError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn create_volume_rejects_undersized_capacity() {
        let backend = make_backend();
        let result = backend
            .create_volume(CreateVolumeRequest {
                name: "pvc-1".into(),
                capacity_range: Some(CapacityRange {
                    required_bytes: 524_288_000, // 500 MiB
                    limit_bytes: 0,
                }),
                volume_capabilities: vec![VolumeCapability::with_mode(
                    AccessMode::MultiNodeMultiWriter,
                )],
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(CsiError::OutOfRange(_))));
    }

    #[tokio::test]
    async fn single_node_capabilities_route_to_block_storage() {
        let backend = make_backend();
        let result = backend
            .create_volume(CreateVolumeRequest {
                name: "pvc-1".into(),
                volume_capabilities: vec![VolumeCapability::with_mode(
                    AccessMode::SingleNodeWriter,
                )],
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(CsiError::Unimplemented(_))));
    }

    #[tokio::test]
    async fn delete_volume_validates_the_id() {
        let backend = make_backend();

        let result = backend.delete_volume("").await;
        assert!(matches!(result, Err(CsiError::InvalidArgument(_))));

        let result = backend.delete_volume("ns-abc-def").await;
        assert!(matches!(result, Err(CsiError::InvalidArgument(_))));

        let result = backend.delete_volume("bs-abc").await;
        assert!(matches!(result, Err(CsiError::Unimplemented(_))));
    }

    #[tokio::test]
    async fn publish_rejects_readonly() {
        let backend = make_backend();
        let result = CsiController::publish_volume(
            &backend,
            ControllerPublishVolumeRequest {
                volume_id: "ns-abc".into(),
                node_id: "node-a".into(),
                readonly: true,
            },
        )
        .await;
        assert!(matches!(result, Err(CsiError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn block_storage_publish_is_unimplemented() {
        let backend = make_backend();
        let result = CsiController::publish_volume(
            &backend,
            ControllerPublishVolumeRequest {
                volume_id: "bs-abc".into(),
                node_id: "node-a".into(),
                readonly: false,
            },
        )
        .await;
        assert!(matches!(result, Err(CsiError::Unimplemented(_))));
    }

    #[tokio::test]
    async fn validate_capabilities_checks_block_storage_modes() {
        let backend = make_backend();

        // The bs- arm needs no volume lookup, so it exercises the capability
        // matching logic offline.
        let confirmed = backend
            .validate_volume_capabilities(
                "bs-abc",
                &[VolumeCapability::with_mode(AccessMode::SingleNodeWriter)],
            )
            .await
            .unwrap();
        assert_eq!(confirmed.len(), 1);

        let result = backend
            .validate_volume_capabilities(
                "bs-abc",
                &[
                    VolumeCapability::with_mode(AccessMode::SingleNodeWriter),
                    VolumeCapability::with_mode(AccessMode::MultiNodeMultiWriter),
                ],
            )
            .await;
        assert!(matches!(result, Err(CsiError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn validate_capabilities_requires_input() {
        let backend = make_backend();
        let result = backend.validate_volume_capabilities("ns-abc", &[]).await;
        assert!(matches!(result, Err(CsiError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn unimplemented_controller_surface() {
        let backend = make_backend();
        assert!(matches!(backend.list_volumes().await, Err(CsiError::Unimplemented(_))));
        assert!(matches!(backend.get_capacity().await, Err(CsiError::Unimplemented(_))));
        assert!(matches!(
            CsiController::expand_volume(&backend, "ns-abc", GIB).await,
            Err(CsiError::Unimplemented(_)),
        ));
        assert!(matches!(
            backend.create_snapshot("ns-abc", "snap").await,
            Err(CsiError::Unimplemented(_)),
        ));
        assert!(matches!(backend.delete_snapshot("snap").await, Err(CsiError::Unimplemented(_))));
        assert!(matches!(backend.list_snapshots().await, Err(CsiError::Unimplemented(_))));
    }

    #[tokio::test]
    async fn unimplemented_node_surface() {
        let backend = make_backend();
        assert!(matches!(
            CsiNode::expand_volume(&backend, "ns-abc").await,
            Err(CsiError::Unimplemented(_)),
        ));
        assert!(matches!(backend.volume_stats("ns-abc").await, Err(CsiError::Unimplemented(_))));
    }

    #[tokio::test]
    async fn stage_validates_inputs() {
        let backend = make_backend();

        let result = backend
            .stage_volume(NodeStageVolumeRequest {
                volume_id: "ns-abc".into(),
                staging_target_path: String::new(),
                volume_capability: VolumeCapability::with_mode(AccessMode::MultiNodeMultiWriter),
            })
            .await;
        assert!(matches!(result, Err(CsiError::InvalidArgument(_))));

        let result = backend
            .stage_volume(NodeStageVolumeRequest {
                volume_id: "bs-abc".into(),
                staging_target_path: "/tmp/staging".into(),
                volume_capability: VolumeCapability::with_mode(AccessMode::SingleNodeWriter),
            })
            .await;
        assert!(matches!(result, Err(CsiError::Unimplemented(_))));
    }

    #[tokio::test]
    async fn unstage_validates_inputs() {
        let backend = make_backend();

        let result = backend.unstage_volume("ns-abc", "").await;
        assert!(matches!(result, Err(CsiError::InvalidArgument(_))));

        let result = backend.unstage_volume("bs-abc", "/tmp/staging").await;
        assert!(matches!(result, Err(CsiError::Unimplemented(_))));
    }
}
