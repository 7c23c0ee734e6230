//! Core CSI types: volume identifiers, capabilities, capacity parsing, and
//! request/response payloads.
//!
//! These types form the data model shared by the CSI traits, transport layer,
//! and the Cloud.dk backend.  They are all [`Serialize`]/[`Deserialize`] so
//! they can be transmitted over the socket transport as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::CsiError;

/// Default volume capacity when the request carries no range: 16 GiB.
pub const DEFAULT_VOLUME_CAPACITY_BYTES: u64 = 17_179_869_184;

/// Smallest supported volume capacity: 1 GiB.
pub const MINIMUM_VOLUME_CAPACITY_BYTES: u64 = 1_073_741_824;

/// Largest supported volume capacity: 8 TiB.
pub const MAXIMUM_VOLUME_CAPACITY_BYTES: u64 = 8_796_093_022_208;

const GIB: u64 = 1_073_741_824;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// The storage flavor encoded in a volume identifier prefix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VolumeKind {
    /// A dedicated NFS server shared by many nodes (`ns-` prefix).
    NetworkStorage,
    /// Single-writer block storage (`bs-` prefix); reserved, never
    /// provisioned by this driver.
    BlockStorage,
}

impl VolumeKind {
    /// The wire prefix for this kind.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::NetworkStorage => "ns",
            Self::BlockStorage => "bs",
        }
    }
}

/// Unique identifier for a volume, wire form `<kind>-<cloudId>`.
///
/// The cloud identifier is the provider's server identifier; the presence of
/// that server *is* the presence of the volume.  Cloud.dk identifiers contain
/// no dashes, so the wire form always holds exactly one `-`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct VolumeId {
    kind: VolumeKind,
    cloud_id: String,
}

impl VolumeId {
    /// Build an identifier from its parts.
    pub fn new(kind: VolumeKind, cloud_id: impl Into<String>) -> Self {
        Self { kind, cloud_id: cloud_id.into() }
    }

    /// Parse the wire form.  Anything other than exactly two non-empty parts
    /// separated by a single `-`, with a known kind prefix, is rejected.
    pub fn parse(s: &str) -> Result<Self, CsiError> {
        let parts: Vec<&str> = s.split('-').collect();

        if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(CsiError::InvalidArgument(format!("invalid volume id: {s:?}")));
        }

        let kind = match parts[0] {
            "ns" => VolumeKind::NetworkStorage,
            "bs" => VolumeKind::BlockStorage,
            other => {
                return Err(CsiError::InvalidArgument(format!("invalid volume type: {other:?}")))
            }
        };

        Ok(Self { kind, cloud_id: parts[1].to_owned() })
    }

    /// The storage flavor.
    pub fn kind(&self) -> VolumeKind {
        self.kind
    }

    /// The provider-side server identifier.
    pub fn cloud_id(&self) -> &str {
        &self.cloud_id
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind.prefix(), self.cloud_id)
    }
}

impl TryFrom<String> for VolumeId {
    type Error = CsiError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<VolumeId> for String {
    fn from(id: VolumeId) -> Self {
        id.to_string()
    }
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed, mirroring the CSI access modes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    /// Single-node read-write.
    SingleNodeWriter,
    /// Single-node read-only.
    SingleNodeReaderOnly,
    /// Multi-node read-only.
    MultiNodeReaderOnly,
    /// Multi-node, at most one writer.
    MultiNodeSingleWriter,
    /// Multi-node read-write.
    MultiNodeMultiWriter,
}

impl AccessMode {
    /// Whether the mode requires the volume to be reachable from several
    /// nodes at once.  Multi-node modes route to network storage; the rest
    /// route to the (unimplemented) block-storage path.
    pub fn is_multi_node(self) -> bool {
        matches!(
            self,
            Self::MultiNodeReaderOnly | Self::MultiNodeSingleWriter | Self::MultiNodeMultiWriter
        )
    }
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    /// Requested access mode.
    pub access_mode: AccessMode,
    /// Additional mount flags (e.g. `"noatime"`).
    #[serde(default)]
    pub mount_flags: Vec<String>,
    /// Filesystem type; network storage volumes are exported over NFS.
    #[serde(default = "default_fs_type")]
    pub fs_type: String,
}

fn default_fs_type() -> String {
    "nfs".to_owned()
}

impl VolumeCapability {
    /// Convenience constructor for a capability with default mount options.
    pub fn with_mode(access_mode: AccessMode) -> Self {
        Self { access_mode, mount_flags: Vec::new(), fs_type: default_fs_type() }
    }
}

// ---------------------------------------------------------------------------
// Capacity
// ---------------------------------------------------------------------------

/// Requested capacity bounds in bytes; `0` means undefined.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacityRange {
    /// Minimum capacity the volume must provide.
    #[serde(default)]
    pub required_bytes: u64,
    /// Maximum capacity the volume may provide.
    #[serde(default)]
    pub limit_bytes: u64,
}

/// Parse a capacity range into a size in gibibytes.
///
/// With neither bound defined the default capacity applies.  Bounds below the
/// minimum or above the maximum supported capacity, or a required capacity
/// exceeding the limit, are out of range.  The chosen size is
/// `ceil(max(required, limit) / 1 GiB)`.
pub fn parse_capacity(range: Option<&CapacityRange>) -> Result<u64, CsiError> {
    let range = range.copied().unwrap_or_default();

    let mut required = range.required_bytes;
    let limit = range.limit_bytes;
    let required_defined = required > 0;
    let limit_defined = limit > 0;

    if !required_defined && !limit_defined {
        required = DEFAULT_VOLUME_CAPACITY_BYTES;
    }

    if required_defined && required < MINIMUM_VOLUME_CAPACITY_BYTES {
        return Err(CsiError::OutOfRange(
            "the required capacity cannot be less than the minimum supported volume capacity"
                .into(),
        ));
    }

    if limit_defined && limit < MINIMUM_VOLUME_CAPACITY_BYTES {
        return Err(CsiError::OutOfRange(
            "the capacity limit cannot be less than the minimum supported volume capacity".into(),
        ));
    }

    if required > MAXIMUM_VOLUME_CAPACITY_BYTES {
        return Err(CsiError::OutOfRange(
            "the required capacity cannot be greater than the maximum supported volume capacity"
                .into(),
        ));
    }

    if limit > MAXIMUM_VOLUME_CAPACITY_BYTES {
        return Err(CsiError::OutOfRange(
            "the capacity limit cannot be greater than the maximum supported volume capacity"
                .into(),
        ));
    }

    if required_defined && limit_defined && required > limit {
        return Err(CsiError::OutOfRange(
            "the required capacity is greater than the capacity limit".into(),
        ));
    }

    Ok(required.max(limit).div_ceil(GIB))
}

// ---------------------------------------------------------------------------
// Volume metadata
// ---------------------------------------------------------------------------

/// Metadata for a provisioned volume, as returned to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    /// Unique volume identifier.
    pub volume_id: VolumeId,
    /// Provisioned capacity in bytes.
    pub capacity_bytes: u64,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to create a new volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    /// Name for the volume; the storage server hostname derives from it.
    pub name: String,
    /// Requested capacity bounds.
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
    /// Required capabilities.
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Arbitrary parameters forwarded from the storage class.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Source to pre-populate the volume from; not supported.
    #[serde(default)]
    pub volume_content_source: Option<String>,
}

/// Request to attach a volume to a node (grant NFS access).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerPublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: String,
    /// Consumer node; its name is the IaaS hostname of the node VM.
    pub node_id: String,
    /// Whether the node may only read the volume; not supported.
    #[serde(default)]
    pub readonly: bool,
}

/// Request to detach a volume from a node (revoke NFS access).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerUnpublishVolumeRequest {
    /// Volume to unpublish.
    pub volume_id: String,
    /// Consumer node being revoked.
    pub node_id: String,
}

/// Request to stage (globally mount) a volume on a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStageVolumeRequest {
    /// Volume to stage.
    pub volume_id: String,
    /// Global staging mount point.
    pub staging_target_path: String,
    /// Requested capability.
    pub volume_capability: VolumeCapability,
}

/// Request to publish (bind-mount) a staged volume into a Pod container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: String,
    /// The global staging mount point (source of the bind mount).
    pub staging_target_path: String,
    /// Target path inside the container.
    pub target_path: String,
    /// Requested capability.
    pub volume_capability: VolumeCapability,
    /// Whether the bind mount should be read-only.
    #[serde(default)]
    pub read_only: bool,
}

// ---------------------------------------------------------------------------
// Plugin & node info
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"csi.cloud.dk"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

/// Capabilities advertised by the CSI plugin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
}

/// Capabilities advertised by the Controller service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerCapability {
    /// Volumes can be created and deleted.
    CreateDeleteVolume,
    /// Volumes can be attached to and detached from nodes.
    PublishUnpublishVolume,
}

/// Capabilities advertised by the Node service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeCapability {
    /// Volumes are staged at a global path before per-Pod publishing.
    StageUnstageVolume,
}

/// Information about the node on which the CSI Node service runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub node_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_id_display() {
        let id = VolumeId::new(VolumeKind::NetworkStorage, "abc123");
        assert_eq!(id.to_string(), "ns-abc123");
    }

    #[test]
    fn volume_id_roundtrip() {
        let id = VolumeId::parse("ns-abc123").expect("parse");
        assert_eq!(id.kind(), VolumeKind::NetworkStorage);
        assert_eq!(id.cloud_id(), "abc123");
        assert_eq!(VolumeId::parse(&id.to_string()).unwrap(), id);

        let id = VolumeId::parse("bs-def456").expect("parse");
        assert_eq!(id.kind(), VolumeKind::BlockStorage);
    }

    #[test]
    fn volume_id_rejects_malformed() {
        for input in ["", "ns", "nsabc", "ns-", "-abc", "ns-abc-def", "xx-abc"] {
            assert!(
                matches!(VolumeId::parse(input), Err(CsiError::InvalidArgument(_))),
                "expected {input:?} to be rejected",
            );
        }
    }

    #[test]
    fn volume_id_serde_as_string() {
        let id = VolumeId::new(VolumeKind::NetworkStorage, "abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"ns-abc\"");
        let de: VolumeId = serde_json::from_str(&json).unwrap();
        assert_eq!(de, id);

        let bad: Result<VolumeId, _> = serde_json::from_str("\"ns-a-b\"");
        assert!(bad.is_err());
    }

    #[test]
    fn access_mode_multi_node() {
        assert!(AccessMode::MultiNodeMultiWriter.is_multi_node());
        assert!(AccessMode::MultiNodeReaderOnly.is_multi_node());
        assert!(AccessMode::MultiNodeSingleWriter.is_multi_node());
        assert!(!AccessMode::SingleNodeWriter.is_multi_node());
        assert!(!AccessMode::SingleNodeReaderOnly.is_multi_node());
    }

    #[test]
    fn capacity_defaults_to_16_gib() {
        assert_eq!(parse_capacity(None).unwrap(), 16);
        assert_eq!(parse_capacity(Some(&CapacityRange::default())).unwrap(), 16);
    }

    #[test]
    fn capacity_below_minimum_is_out_of_range() {
        // 500 MiB.
        let range = CapacityRange { required_bytes: 524_288_000, limit_bytes: 0 };
        assert!(matches!(parse_capacity(Some(&range)), Err(CsiError::OutOfRange(_))));

        let range = CapacityRange { required_bytes: 0, limit_bytes: 524_288_000 };
        assert!(matches!(parse_capacity(Some(&range)), Err(CsiError::OutOfRange(_))));
    }

    #[test]
    fn capacity_above_maximum_is_out_of_range() {
        let range = CapacityRange {
            required_bytes: MAXIMUM_VOLUME_CAPACITY_BYTES + 1,
            limit_bytes: 0,
        };
        assert!(matches!(parse_capacity(Some(&range)), Err(CsiError::OutOfRange(_))));

        let range = CapacityRange {
            required_bytes: 0,
            limit_bytes: MAXIMUM_VOLUME_CAPACITY_BYTES + 1,
        };
        assert!(matches!(parse_capacity(Some(&range)), Err(CsiError::OutOfRange(_))));
    }

    #[test]
    fn capacity_required_above_limit_is_out_of_range() {
        let range = CapacityRange { required_bytes: 4 * GIB, limit_bytes: 2 * GIB };
        assert!(matches!(parse_capacity(Some(&range)), Err(CsiError::OutOfRange(_))));
    }

    #[test]
    fn capacity_picks_the_larger_bound_and_rounds_up() {
        let range = CapacityRange { required_bytes: 2 * GIB, limit_bytes: 4 * GIB };
        assert_eq!(parse_capacity(Some(&range)).unwrap(), 4);

        let range = CapacityRange { required_bytes: 3 * GIB + 1, limit_bytes: 0 };
        assert_eq!(parse_capacity(Some(&range)).unwrap(), 4);
    }

    #[test]
    fn capacity_rounding_is_stable() {
        // Re-parsing a rounded size yields the same size.
        let range = CapacityRange { required_bytes: 3 * GIB + 1, limit_bytes: 0 };
        let gib = parse_capacity(Some(&range)).unwrap();
        let again = CapacityRange { required_bytes: gib * GIB, limit_bytes: 0 };
        assert_eq!(parse_capacity(Some(&again)).unwrap(), gib);
    }
}
