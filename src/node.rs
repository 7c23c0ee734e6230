//! CSI Node service trait.
//!
//! The Node service runs on each worker node and handles the local filesystem
//! operations required to make a volume available to Pod containers:
//!
//! 1. **Stage** — NFS-mount the storage server's export at a global path.
//! 2. **Publish** — bind-mount the global path into the Pod's container.
//! 3. **Unpublish** — remove the bind-mount.
//! 4. **Unstage** — unmount the NFS mount.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{NodeCapability, NodeInfo, NodePublishVolumeRequest, NodeStageVolumeRequest};

/// Node service — local mount / unmount operations.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Stage a volume: mount the NFS export at the global staging path.
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError>;

    /// Unstage a volume: unmount the NFS export from the staging path.
    async fn unstage_volume(
        &self,
        volume_id: &str,
        staging_target_path: &str,
    ) -> Result<(), CsiError>;

    /// Publish a volume: bind-mount the staged global path into the container.
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError>;

    /// Unpublish a volume: unmount the bind-mount and remove the target path.
    async fn unpublish_volume(&self, volume_id: &str, target_path: &str)
        -> Result<(), CsiError>;

    /// Return information about the node on which this service is running.
    async fn get_info(&self) -> Result<NodeInfo, CsiError>;

    /// Advertise the capabilities supported by the node service.
    async fn node_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError>;

    /// Expand a volume on this node.
    async fn expand_volume(&self, volume_id: &str) -> Result<(), CsiError>;

    /// Return capacity statistics for a staged volume.
    async fn volume_stats(&self, volume_id: &str) -> Result<(), CsiError>;
}
