//! Cluster client.
//!
//! The [`backend::Connector`] and [`backend::Connection`] traits abstract
//! over how commands reach a node; [`backend::ClusterClient`] adds typed
//! decoding on top.  Implementations: the HTTP administration gateway
//! and an in-memory simulated cluster.

pub mod backend;
pub mod http;
pub mod memory;
