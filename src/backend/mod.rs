//! Storage backends.
//!
//! The Cloud.dk backend is the only implementation: volumes are dedicated
//! virtual servers exporting a data disk over NFS.

pub mod clouddk;
pub mod network_storage;
pub mod provision;

pub use clouddk::CloudDkBackend;
pub use network_storage::{NetworkStorage, NetworkStorageManager};
