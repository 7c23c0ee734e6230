//! Cloud.dk IaaS integration: the typed REST client, the wire entities, and
//! the server package ladder.

pub mod client;
pub mod entities;
pub mod packages;

pub use client::CloudClient;
