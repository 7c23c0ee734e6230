//! CSI protocol messages transmitted over the socket transport.
//!
//! [`CsiMessage`] is the top-level envelope for all request and response
//! variants exchanged between a CSI client (the orchestrator sidecar) and the
//! CSI server.  Each frame carries exactly one request and is answered by
//! exactly one response variant (or [`CsiMessage::Error`]).

use serde::{Deserialize, Serialize};

use crate::error::CsiError;
use crate::types::*;

/// Top-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Identity requests ------------------------------------------------
    /// Query plugin info.
    GetPluginInfo,
    /// Query plugin capabilities.
    GetPluginCapabilities,
    /// Health probe.
    Probe,

    // ----- Controller requests ----------------------------------------------
    /// Query controller capabilities.
    ControllerGetCapabilities,
    /// Create a new volume.
    CreateVolume(CreateVolumeRequest),
    /// Delete a volume.
    DeleteVolume {
        volume_id: String,
    },
    /// Grant a node access to a volume.
    ControllerPublishVolume(ControllerPublishVolumeRequest),
    /// Revoke a node's access to a volume.
    ControllerUnpublishVolume(ControllerUnpublishVolumeRequest),
    /// Validate volume capabilities.
    ValidateVolumeCapabilities {
        volume_id: String,
        capabilities: Vec<VolumeCapability>,
    },
    /// List all known volumes; not implemented by this driver.
    ListVolumes,
    /// Query remaining capacity; not implemented by this driver.
    GetCapacity,
    /// Expand a volume; not implemented by this driver.
    ControllerExpandVolume {
        volume_id: String,
        capacity_range: Option<CapacityRange>,
    },
    /// Create a snapshot; not implemented by this driver.
    CreateSnapshot {
        source_volume_id: String,
        name: String,
    },
    /// Delete a snapshot; not implemented by this driver.
    DeleteSnapshot {
        snapshot_id: String,
    },
    /// List snapshots; not implemented by this driver.
    ListSnapshots,

    // ----- Node requests ----------------------------------------------------
    /// Query node info.
    NodeGetInfo,
    /// Query node capabilities.
    NodeGetCapabilities,
    /// Stage (NFS-mount) a volume at a global path.
    NodeStageVolume(NodeStageVolumeRequest),
    /// Unstage a previously staged volume.
    NodeUnstageVolume {
        volume_id: String,
        staging_target_path: String,
    },
    /// Publish (bind-mount) a staged volume into a Pod.
    NodePublishVolume(NodePublishVolumeRequest),
    /// Unpublish a previously published volume.
    NodeUnpublishVolume {
        volume_id: String,
        target_path: String,
    },
    /// Expand a volume on the node; not implemented by this driver.
    NodeExpandVolume {
        volume_id: String,
    },
    /// Query volume statistics; not implemented by this driver.
    NodeGetVolumeStats {
        volume_id: String,
    },

    // ----- Responses --------------------------------------------------------
    /// Plugin information.
    PluginInfoResponse(PluginInfo),
    /// Plugin capabilities.
    PluginCapabilitiesResponse(Vec<PluginCapability>),
    /// Probe result.
    ProbeResult(bool),
    /// Controller capabilities.
    ControllerCapabilitiesResponse(Vec<ControllerCapability>),
    /// A volume was successfully created.
    VolumeCreated(Volume),
    /// The subset of requested capabilities the volume supports.
    ConfirmedCapabilities(Vec<VolumeCapability>),
    /// Node capabilities.
    NodeCapabilitiesResponse(Vec<NodeCapability>),
    /// Node information.
    NodeInfoResponse(NodeInfo),
    /// Generic success acknowledgement (no payload).
    Ok,
    /// An error occurred.
    Error(CsiError),
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GetPluginInfo => f.write_str("GetPluginInfo"),
            Self::GetPluginCapabilities => f.write_str("GetPluginCapabilities"),
            Self::Probe => f.write_str("Probe"),
            Self::ControllerGetCapabilities => f.write_str("ControllerGetCapabilities"),
            Self::CreateVolume(req) => write!(f, "CreateVolume(name={})", req.name),
            Self::DeleteVolume { volume_id } => write!(f, "DeleteVolume({volume_id})"),
            Self::ControllerPublishVolume(req) => {
                write!(f, "ControllerPublishVolume({}, node={})", req.volume_id, req.node_id)
            }
            Self::ControllerUnpublishVolume(req) => {
                write!(f, "ControllerUnpublishVolume({}, node={})", req.volume_id, req.node_id)
            }
            Self::ValidateVolumeCapabilities { volume_id, .. } => {
                write!(f, "ValidateVolumeCapabilities({volume_id})")
            }
            Self::ListVolumes => f.write_str("ListVolumes"),
            Self::GetCapacity => f.write_str("GetCapacity"),
            Self::ControllerExpandVolume { volume_id, .. } => {
                write!(f, "ControllerExpandVolume({volume_id})")
            }
            Self::CreateSnapshot { source_volume_id, .. } => {
                write!(f, "CreateSnapshot(source={source_volume_id})")
            }
            Self::DeleteSnapshot { snapshot_id } => write!(f, "DeleteSnapshot({snapshot_id})"),
            Self::ListSnapshots => f.write_str("ListSnapshots"),
            Self::NodeGetInfo => f.write_str("NodeGetInfo"),
            Self::NodeGetCapabilities => f.write_str("NodeGetCapabilities"),
            Self::NodeStageVolume(req) => write!(f, "NodeStageVolume({})", req.volume_id),
            Self::NodeUnstageVolume { volume_id, .. } => {
                write!(f, "NodeUnstageVolume({volume_id})")
            }
            Self::NodePublishVolume(req) => write!(f, "NodePublishVolume({})", req.volume_id),
            Self::NodeUnpublishVolume { volume_id, .. } => {
                write!(f, "NodeUnpublishVolume({volume_id})")
            }
            Self::NodeExpandVolume { volume_id } => write!(f, "NodeExpandVolume({volume_id})"),
            Self::NodeGetVolumeStats { volume_id } => {
                write!(f, "NodeGetVolumeStats({volume_id})")
            }
            Self::PluginInfoResponse(info) => write!(f, "PluginInfo(name={})", info.name),
            Self::PluginCapabilitiesResponse(caps) => {
                write!(f, "PluginCapabilities(count={})", caps.len())
            }
            Self::ProbeResult(ready) => write!(f, "ProbeResult({ready})"),
            Self::ControllerCapabilitiesResponse(caps) => {
                write!(f, "ControllerCapabilities(count={})", caps.len())
            }
            Self::VolumeCreated(vol) => write!(f, "VolumeCreated({})", vol.volume_id),
            Self::ConfirmedCapabilities(caps) => {
                write!(f, "ConfirmedCapabilities(count={})", caps.len())
            }
            Self::NodeCapabilitiesResponse(caps) => {
                write!(f, "NodeCapabilities(count={})", caps.len())
            }
            Self::NodeInfoResponse(info) => write!(f, "NodeInfo({})", info.node_id),
            Self::Ok => f.write_str("Ok"),
            Self::Error(e) => write!(f, "Error({e})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serde_roundtrip() {
        let msg = CsiMessage::CreateVolume(CreateVolumeRequest {
            name: "pvc-1".into(),
            volume_capabilities: vec![VolumeCapability::with_mode(
                AccessMode::MultiNodeMultiWriter,
            )],
            ..Default::default()
        });
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        assert!(matches!(de, CsiMessage::CreateVolume(_)));
    }

    #[test]
    fn error_message_roundtrip() {
        let msg = CsiMessage::Error(CsiError::NotFound("server missing".into()));
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        assert!(matches!(de, CsiMessage::Error(CsiError::NotFound(_))));
    }

    #[test]
    fn display_formatting() {
        assert_eq!(CsiMessage::Ok.to_string(), "Ok");
        assert_eq!(CsiMessage::Probe.to_string(), "Probe");
        assert_eq!(
            CsiMessage::DeleteVolume { volume_id: "ns-x".into() }.to_string(),
            "DeleteVolume(ns-x)",
        );
    }
}
