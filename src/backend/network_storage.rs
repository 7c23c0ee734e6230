//! The network storage lifecycle engine.
//!
//! A network storage volume is a dedicated Cloud.dk virtual server exporting
//! a single ext4 data disk over NFS.  All state lives on the remote side:
//! the server record is the volume, the disk labeled
//! [`DISK_LABEL`] is the data disk, and the exports file plus the `nodes`
//! ipset on the server hold the access list.  The engine keeps no local
//! database and no cross-request mutable state; idempotency comes from the
//! derived hostname (create) and the 404-as-success delete contract.

use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use crate::backend::provision;
use crate::cloud::entities::{DiskCreateBody, ServerCreateBody};
use crate::cloud::{packages, CloudClient};
use crate::config::Configuration;
use crate::error::CsiError;
use crate::ssh::{SshConnection, SshFactory};

/// Label of the data disk on every storage server.
pub const DISK_LABEL: &str = "k8s-network-storage";

/// Prefix of the hostname derived from the volume name.
pub const HOSTNAME_PREFIX: &str = "k8s-network-storage-";

const SERVER_TEMPLATE: &str = "ubuntu-18.04-x64";
const SERVER_LOCATION: &str = "dk1";
const ROOT_PASSWORD_LENGTH: usize = 64;

const TRANSACTION_TIMEOUT: Duration = Duration::from_secs(600);
const TRANSACTION_POLL_INTERVAL: Duration = Duration::from_secs(10);
const SSH_READY_TIMEOUT: Duration = Duration::from_secs(300);
const SSH_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// A provisioned network storage volume.
///
/// Plain data; every lifecycle operation lives on
/// [`NetworkStorageManager`], which holds the configuration the operations
/// need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkStorage {
    /// Provider-side server identifier; doubles as the volume identity.
    pub id: String,
    /// First IPv4 address of the first network interface — the NFS endpoint.
    pub ip: String,
    /// Size of the data disk in gibibytes.
    pub size_gib: u64,
}

/// Orchestrates the lifecycle of network storage volumes.
pub struct NetworkStorageManager {
    cloud: CloudClient,
    ssh: SshFactory,
    public_key: String,
    package_id: &'static str,
}

/// Derive the storage server hostname from a volume name.
pub fn storage_hostname(name: &str) -> String {
    format!("{HOSTNAME_PREFIX}{name}")
}

fn generate_root_password() -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

    let mut rng = rand::thread_rng();
    let mut password = String::with_capacity(ROOT_PASSWORD_LENGTH);

    // A leading letter keeps the password valid for picky password policies.
    password.push('p');

    for _ in 1..ROOT_PASSWORD_LENGTH {
        password.push(CHARS[rng.gen_range(0..CHARS.len())] as char);
    }

    password
}

impl NetworkStorageManager {
    /// Build a manager from the driver configuration.  The server package is
    /// resolved eagerly so an unsupported memory/processor pair fails fast.
    pub fn new(config: &Configuration) -> Result<Self, CsiError> {
        let package_id =
            packages::resolve_package(config.server_memory, config.server_processors)?;

        Ok(Self {
            cloud: CloudClient::new(config.api_endpoint.as_str(), config.api_key.as_str()),
            ssh: SshFactory::new(config.ssh_private_key.as_str()),
            public_key: config.ssh_public_key.clone(),
            package_id,
        })
    }

    /// Create a new storage server of the given size and provision it end to
    /// end.  Either a fully bootstrapped, disk-mounted volume is returned or
    /// the server is deleted again and an error surfaces; a half-provisioned
    /// server is never reported as success.
    #[instrument(skip(self))]
    pub async fn create(&self, name: &str, size_gib: u64) -> Result<NetworkStorage, CsiError> {
        let hostname = storage_hostname(name);

        // The derived hostname is the idempotency key: at most one server per
        // volume name may come into being.
        match self.cloud.get_server_by_hostname(&hostname).await {
            Ok(_) => {
                return Err(CsiError::AlreadyExists(format!(
                    "server already exists (hostname: {hostname})",
                )))
            }
            Err(CsiError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        info!(hostname, "creating storage server");

        let root_password = generate_root_password();
        let server = self
            .cloud
            .create_server(&ServerCreateBody {
                hostname: hostname.clone(),
                label: hostname,
                initial_root_password: root_password.clone(),
                package: self.package_id.to_owned(),
                template: SERVER_TEMPLATE.to_owned(),
                location: SERVER_LOCATION.to_owned(),
            })
            .await?;

        let id = server.identifier.clone();

        let Some(ip) = server.primary_address().map(str::to_owned) else {
            self.destroy_after_failure(&id).await;
            return Err(CsiError::Internal(format!(
                "no network interfaces available (id: {id})",
            )));
        };

        if let Err(e) = self.provision(&id, &ip, &root_password, size_gib).await {
            self.destroy_after_failure(&id).await;
            return Err(e);
        }

        info!(id, ip, size_gib, "storage server ready");
        Ok(NetworkStorage { id, ip, size_gib })
    }

    /// Bootstrap a freshly created server and attach its data disk.
    async fn provision(
        &self,
        id: &str,
        ip: &str,
        root_password: &str,
        size_gib: u64,
    ) -> Result<(), CsiError> {
        self.wait_for_transactions(id).await?;

        info!(id, "waiting for server to accept SSH connections");
        let conn = self.wait_for_ssh(ip, root_password).await?;

        let result = async {
            let sftp = conn.open_sftp().await?;
            for (path, contents) in provision::artifacts(&self.public_key) {
                conn.upload(&sftp, path, &contents).await?;
            }

            info!(id, "bootstrapping server");
            conn.run(&format!("/bin/sh {}", provision::BOOTSTRAP_SCRIPT_PATH)).await?;
            Ok(())
        }
        .await;
        conn.disconnect().await;
        result?;

        self.ensure_disk(id, ip, size_gib).await
    }

    /// Load the volume backed by the given server identifier.
    ///
    /// A missing server surfaces as [`CsiError::NotFound`], letting callers
    /// treat an idempotent delete differently from a real failure.
    #[instrument(skip(self))]
    pub async fn load(&self, id: &str) -> Result<NetworkStorage, CsiError> {
        let server = self.cloud.get_server(id).await?;

        let Some(ip) = server.primary_address().map(str::to_owned) else {
            return Err(CsiError::Internal(format!(
                "the server has no network interfaces (id: {id})",
            )));
        };

        let size_gib = server
            .disks
            .iter()
            .find(|disk| disk.label == DISK_LABEL)
            .map(|disk| disk.size)
            .unwrap_or(0);

        Ok(NetworkStorage { id: server.identifier, ip, size_gib })
    }

    /// Delete the storage server.  Absence of the server counts as success.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), CsiError> {
        info!(id, "deleting storage server");
        self.cloud.delete_server(id).await
    }

    /// Ensure the data disk exists, is attached, and is mounted at
    /// `/mnt/data`.
    #[instrument(skip(self))]
    pub async fn ensure_disk(&self, id: &str, ip: &str, size_gib: u64) -> Result<(), CsiError> {
        self.wait_for_transactions(id).await?;

        let disks = self.cloud.list_disks(id).await?;
        let disk_found = disks.iter().any(|disk| disk.label == DISK_LABEL);

        if !disk_found {
            info!(id, size_gib, "creating data disk");
            self.cloud
                .create_disk(id, &DiskCreateBody { label: DISK_LABEL.to_owned(), size: size_gib })
                .await?;
            self.wait_for_transactions(id).await?;
        }

        info!(id, "mounting data disk");
        let conn = self.ssh.dial_key(ip).await?;
        let result = conn.run(&format!("/bin/sh {}", provision::MOUNT_SCRIPT_PATH)).await;
        conn.disconnect().await;
        result.map(|_| ())
    }

    /// Grant a node access to the volume: allowlist its address in the
    /// `nodes` ipset (persisted as an if-up script), export `/mnt/data` to
    /// it, and reload the NFS server.  The shell pipeline runs as one command
    /// so a partial failure is observable through the exit status.
    #[instrument(skip(self, ns), fields(id = %ns.id))]
    pub async fn add_node(&self, ns: &NetworkStorage, node_id: &str) -> Result<(), CsiError> {
        let node_address = self.resolve_node_address(node_id).await?;
        let script_path = provision::node_network_script_path(node_id);

        let conn = self.ssh.dial_key(&ns.ip).await?;
        let result = async {
            let sftp = conn.open_sftp().await?;
            conn.upload(&sftp, &script_path, &provision::node_network_script(&node_address))
                .await?;

            conn.run(&format!(
                "chmod +x {script_path} && {script_path} && echo '{}' >> /etc/exports && systemctl restart nfs-kernel-server",
                provision::exports_line(&node_address),
            ))
            .await?;
            Ok(())
        }
        .await;
        conn.disconnect().await;
        result?;

        info!(id = ns.id, node_id, node_address, "node granted access");
        Ok(())
    }

    /// Revoke a node's access: drop the if-up script, the ipset entry, and
    /// the exports line.  The NFS server is not restarted here; the kernel
    /// stops answering the address once the ipset entry is gone.
    #[instrument(skip(self, ns), fields(id = %ns.id))]
    pub async fn remove_node(&self, ns: &NetworkStorage, node_id: &str) -> Result<(), CsiError> {
        let node_address = self.resolve_node_address(node_id).await?;
        let script_path = provision::node_network_script_path(node_id);

        let conn = self.ssh.dial_key(&ns.ip).await?;
        let result = conn
            .run(&format!(
                "rm -f {script_path} && ipset del nodes {node_address} && sed -i '/{node_address}/d' /etc/exports",
            ))
            .await;
        conn.disconnect().await;
        result?;

        info!(id = ns.id, node_id, node_address, "node access revoked");
        Ok(())
    }

    /// Resolve a consumer node's address from its hostname (the Kubernetes
    /// node name equals the IaaS hostname of the node VM).
    async fn resolve_node_address(&self, node_id: &str) -> Result<String, CsiError> {
        let server = self.cloud.get_server_by_hostname(node_id).await?;

        server.primary_address().map(str::to_owned).ok_or_else(|| {
            CsiError::Internal(format!("node {node_id:?} has no network interfaces"))
        })
    }

    /// Poll the server's transaction log until no pending or running entries
    /// remain.  Invoked after every operation that enqueues server-side work
    /// and before any operation that needs the server quiescent.
    pub async fn wait_for_transactions(&self, id: &str) -> Result<(), CsiError> {
        debug!(id, "waiting for transactions to end");
        let deadline = Instant::now() + TRANSACTION_TIMEOUT;

        loop {
            let logs = self.cloud.list_logs(id).await?;
            let busy =
                logs.iter().any(|entry| entry.status == "pending" || entry.status == "running");

            if !busy {
                return Ok(());
            }

            if Instant::now() + TRANSACTION_POLL_INTERVAL > deadline {
                return Err(CsiError::Internal(format!(
                    "timeout while waiting for transactions to end (id: {id})",
                )));
            }

            sleep(TRANSACTION_POLL_INTERVAL).await;
        }
    }

    /// Dial the freshly created server with its root password until sshd
    /// answers, bounded by a deadline.
    async fn wait_for_ssh(&self, ip: &str, password: &str) -> Result<SshConnection, CsiError> {
        let deadline = Instant::now() + SSH_READY_TIMEOUT;

        loop {
            match self.ssh.dial_password(ip, password).await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    if Instant::now() + SSH_RETRY_INTERVAL > deadline {
                        return Err(CsiError::Internal(format!(
                            "timeout while waiting for SSH connectivity ({ip}): {e}",
                        )));
                    }
                    debug!(ip, error = %e, "server not accepting SSH connections yet");
                }
            }

            sleep(SSH_RETRY_INTERVAL).await;
        }
    }

    /// Best-effort compensation after a failed create.
    async fn destroy_after_failure(&self, id: &str) {
        warn!(id, "deleting server after a failed create");
        if let Err(e) = self.cloud.delete_server(id).await {
            warn!(id, error = %e, "failed to delete server after a failed create");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_derivation() {
        assert_eq!(storage_hostname("pvc-1"), "k8s-network-storage-pvc-1");
    }

    #[test]
    fn root_password_shape() {
        let password = generate_root_password();
        assert_eq!(password.len(), 64);
        assert!(password.starts_with('p'));
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn root_passwords_are_random() {
        assert_ne!(generate_root_password(), generate_root_password());
    }

    #[test]
    fn manager_rejects_unsupported_hardware() {
        let config = Configuration {
            api_endpoint: "https://api.cloud.dk/v1".into(),
            api_key: "key".into(),
            csi_endpoint: "unix:///tmp/csi.sock".into(),
            node_id: "node-a".into(),
            server_memory: 1_000_000,
            server_processors: 2,
            ssh_private_key: String::new(),
            ssh_public_key: String::new(),
        };
        assert!(matches!(
            NetworkStorageManager::new(&config),
            Err(CsiError::InvalidArgument(_)),
        ));
    }
}
