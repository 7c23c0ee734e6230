//! # clouddk-csi — Cloud.dk network storage for Kubernetes
//!
//! This crate implements a [Container Storage Interface][csi] driver that
//! provisions shared `ReadWriteMany` volumes on Cloud.dk: each volume is a
//! dedicated virtual server exporting a single ext4 data disk over NFS.
//! Servers are created through the Cloud.dk REST API, bootstrapped over
//! SSH/SFTP, and torn down when the volume is deleted.  All volume state
//! lives on the remote side — the server record, the exports file, and the
//! `nodes` ipset are the source of truth; the driver keeps no local database.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: volume identifiers, capabilities, capacity parsing, requests. |
//! | [`error`] | [`CsiError`] enum covering all failure modes. |
//! | [`message`] | [`CsiMessage`] protocol envelope for the socket transport. |
//! | [`identity`] | [`CsiIdentity`] trait — plugin discovery & health. |
//! | [`controller`] | [`CsiController`] trait — volume lifecycle & node access. |
//! | [`node`] | [`CsiNode`] trait — stage, publish, unpublish, unstage. |
//! | [`transport`] | Unix-socket server/client exchanging JSON frames. |
//! | [`cloud`] | Cloud.dk REST client, wire entities, and the package ladder. |
//! | [`ssh`] | SSH/SFTP sessions to storage servers. |
//! | [`backend`] | The network storage engine and the Cloud.dk backend. |
//! | [`config`] | Driver configuration from environment and flags. |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod backend;
pub mod cloud;
pub mod config;
pub mod controller;
pub mod error;
pub mod identity;
pub mod message;
pub mod node;
pub mod ssh;
pub mod transport;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use backend::clouddk::{CloudDkBackend, DRIVER_NAME, DRIVER_VERSION};
pub use config::Configuration;
pub use controller::CsiController;
pub use error::CsiError;
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use node::CsiNode;
pub use types::*;
