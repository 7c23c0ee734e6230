//! Typed bodies for the Cloud.dk REST API.
//!
//! Field names follow the provider's camelCase wire form.  Decoding is the
//! caller's responsibility; [`super::client::CloudClient`] only moves bytes.

use serde::{Deserialize, Serialize};

/// A virtual server as returned by `GET cloudservers/<id>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerBody {
    /// Opaque provider-side identifier.
    pub identifier: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterfaceBody>,
    #[serde(default)]
    pub disks: Vec<DiskBody>,
}

impl ServerBody {
    /// The first IPv4 address of the first network interface — the stable
    /// endpoint for NFS and SSH.  `None` when the server has no interfaces.
    pub fn primary_address(&self) -> Option<&str> {
        self.network_interfaces
            .first()
            .and_then(|iface| iface.ip_addresses.first())
            .map(|ip| ip.address.as_str())
    }
}

/// A network interface attached to a server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceBody {
    #[serde(default)]
    pub ip_addresses: Vec<IpAddressBody>,
}

/// A single address assignment.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpAddressBody {
    pub address: String,
}

/// A disk attached to a server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskBody {
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub label: String,
    /// Size in gibibytes.
    #[serde(default)]
    pub size: u64,
}

/// Response body of `GET cloudservers/<id>/disks`.
pub type DiskListBody = Vec<DiskBody>;

/// One entry of the server's transaction log.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntryBody {
    /// `pending`, `running`, `done`, `failed`, ...
    #[serde(default)]
    pub status: String,
}

/// Response body of `GET cloudservers/<id>/logs`.
pub type LogsListBody = Vec<LogEntryBody>;

/// Request body of `POST cloudservers`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCreateBody {
    pub hostname: String,
    pub label: String,
    pub initial_root_password: String,
    pub package: String,
    pub template: String,
    pub location: String,
}

/// Request body of `POST cloudservers/<id>/disks`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskCreateBody {
    pub label: String,
    /// Size in gibibytes.
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_body_decodes_wire_form() {
        let json = r#"{
            "identifier": "abc123",
            "hostname": "k8s-network-storage-pvc-1",
            "label": "k8s-network-storage-pvc-1",
            "networkInterfaces": [
                {"ipAddresses": [{"address": "203.0.113.10"}, {"address": "203.0.113.11"}]}
            ],
            "disks": [{"identifier": "d1", "label": "k8s-network-storage", "size": 16}]
        }"#;
        let server: ServerBody = serde_json::from_str(json).expect("decode");
        assert_eq!(server.identifier, "abc123");
        assert_eq!(server.primary_address(), Some("203.0.113.10"));
        assert_eq!(server.disks[0].size, 16);
    }

    #[test]
    fn server_body_without_interfaces() {
        let json = r#"{"identifier": "abc123"}"#;
        let server: ServerBody = serde_json::from_str(json).expect("decode");
        assert_eq!(server.primary_address(), None);
    }

    #[test]
    fn server_create_body_uses_camel_case() {
        let body = ServerCreateBody {
            hostname: "h".into(),
            label: "h".into(),
            initial_root_password: "secret".into(),
            package: "ac949a1cb4731d".into(),
            template: "ubuntu-18.04-x64".into(),
            location: "dk1".into(),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"initialRootPassword\":\"secret\""));
    }

    #[test]
    fn logs_list_decodes_statuses() {
        let json = r#"[{"status": "pending"}, {"status": "done"}]"#;
        let logs: LogsListBody = serde_json::from_str(json).expect("decode");
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].status, "pending");
    }
}
