//! CSI Controller service trait.
//!
//! The Controller service manages the centralized volume lifecycle: creation,
//! deletion, node attachment, and capability validation.  For this driver
//! every mutating operation ultimately acts on a dedicated Cloud.dk storage
//! server; there is no driver-local volume database.
//!
//! The snapshot, listing, capacity, and expansion operations are part of the
//! wire surface but deliberately unimplemented; they answer
//! [`CsiError::Unimplemented`] so the contract stays extension-compatible.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{
    ControllerCapability, ControllerPublishVolumeRequest, ControllerUnpublishVolumeRequest,
    CreateVolumeRequest, Volume, VolumeCapability,
};

/// Controller service — centralized volume management.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Provision a new volume.
    ///
    /// Idempotent with respect to the request name: a second call while the
    /// derived storage server still exists fails with
    /// [`CsiError::AlreadyExists`].
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError>;

    /// Delete a previously provisioned volume.
    ///
    /// Idempotent: deleting a volume whose server no longer exists succeeds.
    async fn delete_volume(&self, volume_id: &str) -> Result<(), CsiError>;

    /// Grant a node access to the volume's NFS export.
    async fn publish_volume(&self, req: ControllerPublishVolumeRequest) -> Result<(), CsiError>;

    /// Revoke a node's access to the volume's NFS export.
    async fn unpublish_volume(
        &self,
        req: ControllerUnpublishVolumeRequest,
    ) -> Result<(), CsiError>;

    /// Check the requested capabilities against the volume's supported set
    /// and return the confirmed subset.  A partial match is an error.
    async fn validate_volume_capabilities(
        &self,
        volume_id: &str,
        capabilities: &[VolumeCapability],
    ) -> Result<Vec<VolumeCapability>, CsiError>;

    /// Advertise the capabilities supported by the controller service.
    async fn controller_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError>;

    /// List all volumes known to this controller.
    async fn list_volumes(&self) -> Result<Vec<Volume>, CsiError>;

    /// Return the total available capacity in bytes.
    async fn get_capacity(&self) -> Result<u64, CsiError>;

    /// Expand a volume to a new capacity.
    async fn expand_volume(&self, volume_id: &str, capacity_bytes: u64) -> Result<u64, CsiError>;

    /// Create a snapshot of a source volume.
    async fn create_snapshot(&self, source_volume_id: &str, name: &str) -> Result<(), CsiError>;

    /// Delete a snapshot.
    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), CsiError>;

    /// List snapshots.
    async fn list_snapshots(&self) -> Result<(), CsiError>;
}
