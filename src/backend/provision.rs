//! On-server provisioning artifacts.
//!
//! These files are versioned assets baked into the binary and written to
//! every storage server during bootstrap.  Changing any of them requires a
//! driver version bump: servers that already exist will not be
//! re-bootstrapped.  Content is UTF-8 with LF line endings and a trailing
//! newline; the upload path strips any stray carriage returns.

/// Remote path of the APT non-interactive defaults.
pub const APT_AUTO_CONF_PATH: &str = "/etc/apt/apt.conf.d/00auto-conf";

/// Remote path of the master bootstrap script.
pub const BOOTSTRAP_SCRIPT_PATH: &str = "/etc/clouddk_network_storage_bootstrap.sh";

/// Remote path of the NFS firewall script.
pub const FIREWALL_SCRIPT_PATH: &str = "/etc/network/if-up.d/00-nfs-firewall-rules";

/// Remote path of the resource limits configuration.
pub const LIMITS_CONF_PATH: &str = "/etc/security/limits.conf";

/// Remote path of the data disk format-and-mount script.
pub const MOUNT_SCRIPT_PATH: &str = "/etc/clouddk_network_storage_mount.sh";

/// Remote path of the driver's public key.
pub const PUBLIC_KEY_PATH: &str = "/root/.ssh/id_rsa_driver.pub";

/// Remote path of the performance sysctl configuration.
pub const SYSCTL_CONF_PATH: &str = "/etc/sysctl.d/20-maximum-performance.conf";

/// Remote path of the per-node allowlist script run on interface up.
pub fn node_network_script_path(node_id: &str) -> String {
    format!("/etc/network/if-up.d/10-nfs-{node_id}")
}

/// Content of the per-node allowlist script.
pub fn node_network_script(node_address: &str) -> String {
    format!("#!/bin/sh\nipset add nodes {node_address}\n")
}

/// The line appended to `/etc/exports` when a node is granted access.
pub fn exports_line(node_address: &str) -> String {
    format!("/mnt/data\t{node_address}(rw,sync,no_subtree_check)")
}

/// Forces non-interactive dpkg defaults during the bootstrap upgrade.
pub const APT_AUTO_CONF: &str = r##"Dpkg::Options {
	"--force-confdef";
	"--force-confold";
}
"##;

/// Master bootstrap script; run once over the password-authenticated
/// connection right after the artifacts have been uploaded.
pub const BOOTSTRAP_SCRIPT: &str = r##"#!/bin/sh
# Specify the required environment variables.
export DEBIAN_FRONTEND=noninteractive

# Change script permissions.
chmod +x /etc/clouddk_*
chmod +x /etc/network/if-up.d/*

# Authorize the SSH key and disable password authentication.
if [ ! -f /root/.ssh/authorized_keys ]; then
	touch /root/.ssh/authorized_keys
fi

cat /root/.ssh/id_rsa_driver.pub >> /root/.ssh/authorized_keys
sed -i 's/#\?PasswordAuthentication.*/PasswordAuthentication no/' /etc/ssh/sshd_config
systemctl restart ssh

# Turn off swap to improve performance.
swapoff -a
sed -i '/ swap / s/^/#/' /etc/fstab

# Load the optimized kernel configuration.
sysctl --system

# Configure APT to use a mirror located in Denmark instead of the default US mirror.
sed -i 's/us.archive.ubuntu.com/mirrors.dotsrc.org/' /etc/apt/sources.list

# Wait for APT processes to terminate before proceeding.
while ps aux | grep -q [a]pt || fuser /var/lib/apt/lists/lock >/dev/null 2>&1 || fuser /var/lib/dpkg/lock >/dev/null 2>&1; do
	sleep 2
done

# Upgrade the installed packages as the provided image is often quite old.
apt-get -qq update
apt-get -qq upgrade -y
apt-get -qq dist-upgrade -y

# Apply the firewall rules for the NFS service.
export IFACE="eth0"

/etc/network/if-up.d/00-nfs-firewall-rules

# Install some additional packages including the NFS kernel server.
apt-get -qq install -y \
	apt-transport-https \
	ca-certificates \
	ipset \
	nfs-kernel-server \
	software-properties-common

# Update the NFS configuration files.
(
	echo 'NEED_GSSD='
	echo 'NEED_IDMAPD='
	echo 'NEED_STATD='
	echo 'STATDOPTS="--port 2050"'
) > /etc/default/nfs-common
(
	PROCESSOR_COUNT="$(nproc)"

	echo 'NEED_SVCGSSD='
	echo 'RPCMOUNTDOPTS="--manage-gids -p 2052"'
	echo "RPCNFSDCOUNT=$((PROCESSOR_COUNT * 8))"
	echo 'RPCNFSDPRIORITY=0'
	echo 'RPCSVCGSSDOPTS='
) > /etc/default/nfs-kernel-server
(
	echo 'options lockd nlm_udpport=2051 nlm_tcpport=2051'
) > /etc/modprobe.d/nfs.conf

# Load some additional kernel modules.
modprobe lockd
echo 'lockd' >> /etc/modules

# Restart the NFS service.
systemctl restart nfs-kernel-server
"##;

/// Default-deny firewall for the NFS ports with an ipset allowlist; re-run on
/// every interface up and by the bootstrap script.
pub const FIREWALL_SCRIPT: &str = r##"#!/bin/sh
# Terminate the script if we are not dealing with the public interface.
if [ "$IFACE" != "eth0" ]; then
	exit 0
fi

# Create the ipset for the nodes.
if ! ipset list | grep -q -i 'Name: nodes'; then
	ipset create nodes hash:ip hashsize 1024
fi

ipset flush nodes

# Add the firewall rules to iptables.
iptables -I INPUT -i "$IFACE" -p udp --dport 2049:2052 -j DROP
iptables -I INPUT -i "$IFACE" -p tcp --dport 2049:2052 -j DROP

iptables -I INPUT -i "$IFACE" -p udp --dport 111 -j DROP
iptables -I INPUT -i "$IFACE" -p tcp --dport 111 -j DROP

iptables -I INPUT -i "$IFACE" -p udp --dport 2049:2052 -m set --match-set nodes src -j ACCEPT
iptables -I INPUT -i "$IFACE" -p tcp --dport 2049:2052 -m set --match-set nodes src -j ACCEPT

iptables -I INPUT -i "$IFACE" -p udp --dport 111 -m set --match-set nodes src -j ACCEPT
iptables -I INPUT -i "$IFACE" -p tcp --dport 111 -m set --match-set nodes src -j ACCEPT
"##;

/// Raised resource limits for the NFS workload.
pub const LIMITS_CONF: &str = r##"* soft nproc 1048576
* hard nproc 1048576
* soft nofile 1048576
* hard nofile 1048576
* soft stack 1048576
* hard stack 1048576
* soft memlock unlimited
* hard memlock unlimited
"##;

/// Formats the data disk (when blank) and mounts it at `/mnt/data`; run after
/// every disk attachment.
pub const MOUNT_SCRIPT: &str = r##"#!/bin/sh
# Specify the device and directory.
DATA_DEVICE="/dev/vdb"
DATA_DIRECTORY="/mnt/data"

# Ensure that the device is mounted.
if ! mountpoint -q "$DATA_DIRECTORY"; then
	if [ "$(blkid -s TYPE -o value "$DATA_DEVICE")" == "" ]; then
		mkfs -t ext4 "$DATA_DEVICE"
	fi

	if ! grep -q "$DATA_DIRECTORY" /etc/fstab; then
		data_device_uuid="$(blkid -s UUID -o value "$DATA_DEVICE")"

		sed --in-place "/${DATA_DEVICE//'/'/'\/'}/d" /etc/fstab
		echo "UUID=${data_device_uuid} ${DATA_DIRECTORY} ext4 defaults,noatime,nodiratime,nofail 0 2" >> /etc/fstab
	fi

	mkdir -p "$DATA_DIRECTORY"
	mount "$DATA_DEVICE" "$DATA_DIRECTORY"
	chown -R nobody:nogroup "$DATA_DIRECTORY"
fi
"##;

/// Kernel tuning for a dedicated network file server.
pub const SYSCTL_CONF: &str = r##"fs.file-max=1048576
fs.inotify.max_user_instances=1048576
fs.inotify.max_user_watches=1048576
fs.nr_open=1048576
net.core.netdev_max_backlog=1048576
net.core.rmem_max=16777216
net.core.somaxconn=65535
net.core.wmem_max=16777216
net.ipv4.tcp_congestion_control=htcp
net.ipv4.ip_local_port_range=32768 65535
net.ipv4.tcp_fin_timeout=5
net.ipv4.tcp_max_orphans=1048576
net.ipv4.tcp_max_syn_backlog=20480
net.ipv4.tcp_max_tw_buckets=400000
net.ipv4.tcp_no_metrics_save=1
net.ipv4.tcp_rmem=4096 87380 16777216
net.ipv4.tcp_synack_retries=2
net.ipv4.tcp_syn_retries=2
net.ipv4.tcp_tw_recycle=1
net.ipv4.tcp_tw_reuse=1
net.ipv4.tcp_wmem=4096 65535 16777216
vm.max_map_count=1048576
vm.min_free_kbytes=65535
vm.overcommit_memory=1
vm.swappiness=0
vm.vfs_cache_pressure=50
"##;

/// The seven artifacts uploaded during bootstrap, in upload order.  The
/// driver's public key is the only per-deployment piece.
pub fn artifacts(public_key: &str) -> [(&'static str, String); 7] {
    [
        (APT_AUTO_CONF_PATH, APT_AUTO_CONF.to_owned()),
        (BOOTSTRAP_SCRIPT_PATH, BOOTSTRAP_SCRIPT.to_owned()),
        (FIREWALL_SCRIPT_PATH, FIREWALL_SCRIPT.to_owned()),
        (LIMITS_CONF_PATH, LIMITS_CONF.to_owned()),
        (MOUNT_SCRIPT_PATH, MOUNT_SCRIPT.to_owned()),
        (PUBLIC_KEY_PATH, public_key.to_owned()),
        (SYSCTL_CONF_PATH, SYSCTL_CONF.to_owned()),
    ]
}
