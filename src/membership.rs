//! Adding a member to an existing replica set.
//!
//! [`MembershipMutator::add_member`] performs one read-modify-write of the
//! set's configuration document: read it through any reachable seed,
//! append the new member with a fresh id, bump the version and submit the
//! whole document back through the reconfiguration command.
//!
//! The read and the write are separate round trips and the write is not
//! conditional on the version that was read.  Two mutators racing against
//! the same set can both read version `V`, both assign the same id, and
//! the later write silently replaces the earlier one's member.  Clusters
//! that refuse a reconfiguration whose version is not above their own
//! turn the losing write into a rejected command instead.

use std::sync::Arc;

use tracing::{debug, error};

use crate::address::SeedList;
use crate::client::backend::{ClusterClient, Connector};
use crate::errors::ClusterError;
use crate::model::{Member, ReplicaSetConfig};

/// Id the next member added to `config` receives: one above the highest
/// id in use, or 0 for an empty member list.  Fails when the highest id
/// is already the largest representable one.
pub fn next_member_id(config: &ReplicaSetConfig) -> Result<u32, ClusterError> {
    match config.members.iter().map(|m| m.id).max() {
        None => Ok(0),
        Some(max) => max.checked_add(1).ok_or_else(|| ClusterError::InvalidConfig {
            reason: format!("no member id left above {max}"),
        }),
    }
}

/// Return `config` with `host` appended and the version bumped once.
pub fn with_added_member(
    config: &ReplicaSetConfig,
    host: &str,
) -> Result<ReplicaSetConfig, ClusterError> {
    let id = next_member_id(config)?;
    let version = config
        .version
        .checked_add(1)
        .ok_or_else(|| ClusterError::InvalidConfig {
            reason: format!("version {} cannot be incremented", config.version),
        })?;

    let mut next = config.clone();
    next.members.push(Member::new(id, host));
    next.version = version;
    Ok(next)
}

/// Appends members to a set's configuration.  Holds no state between
/// calls; every call opens and closes its own connection.
#[derive(Clone)]
pub struct MembershipMutator {
    connector: Arc<dyn Connector>,
}

impl MembershipMutator {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    /// Add `new_host` to the set reachable through `seeds`.
    ///
    /// Returns whether the cluster accepted the reconfiguration.  Connection
    /// failures and a missing configuration are returned as errors and not
    /// retried here.
    pub async fn add_member(&self, seeds: &SeedList, new_host: &str) -> Result<bool, ClusterError> {
        let client = ClusterClient::connect_multi(self.connector.as_ref(), seeds).await?;
        let result = Self::reconfigure_with(&client, new_host).await;
        client.close().await;
        result
    }

    async fn reconfigure_with(client: &ClusterClient, new_host: &str) -> Result<bool, ClusterError> {
        let current = client
            .read_replica_set_config()
            .await?
            .ok_or(ClusterError::ConfigMissing)?;

        let next = with_added_member(&current, new_host)?;
        debug!(
            "Adding replica set member: _id = {}, host = {}, version {} -> {}",
            next.members.last().map_or(0, |m| m.id),
            new_host,
            current.version,
            next.version
        );

        let reply = client.write_replica_set_config(&next).await?;
        if !reply.ok {
            error!(
                "Reconfiguration of set {} rejected: {} (code {})",
                current.id,
                reply.errmsg.as_deref().unwrap_or("no message"),
                reply.code.unwrap_or(0)
            );
        }
        Ok(reply.ok)
    }
}
