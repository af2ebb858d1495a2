//! Replica-set bootstrap library.
//!
//! This crate inspects a database node's replication status and brings
//! it into a replica set: it initiates a brand-new set when the node is
//! the first member, joins an existing set through a seed list otherwise,
//! and polls until the node reports membership.

pub mod address;
pub mod bootstrap;
pub mod client;
pub mod config;
pub mod errors;
pub mod membership;
pub mod model;
pub mod status;

pub use address::{Endpoint, SeedList};
pub use bootstrap::{BootstrapFailure, BootstrapReport, BootstrapState, Bootstrapper, RetryPolicy};
pub use errors::ClusterError;
