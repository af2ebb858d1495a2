//! Abstract cluster connection traits and the typed client built on them.
//!
//! A [`Connector`] opens a [`Connection`] to one node.  Connections speak
//! raw JSON documents; [`ClusterClient`] wraps one and decodes every reply
//! into the typed structs of [`crate::model`] exactly once.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde_json::{json, Value};
use tracing::debug;

use crate::address::{Endpoint, SeedList};
use crate::errors::ClusterError;
use crate::model::{ClusterStatus, CommandReply, InitiateConfig, ReplicaSetConfig};

/// Boxed future returned by every connection operation.
pub type ClientFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClusterError>> + Send + 'a>>;

/// Database that hosts administrative commands.
pub const ADMIN_DATABASE: &str = "admin";

/// Where the cluster persists its replica-set configuration document.
pub const REPLSET_CONFIG_NAMESPACE: Namespace<'static> = Namespace::new("local", "system.replset");

/// A `database.collection` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Namespace<'a> {
    pub database: &'a str,
    pub collection: &'a str,
}

impl<'a> Namespace<'a> {
    pub const fn new(database: &'a str, collection: &'a str) -> Self {
        Self {
            database,
            collection,
        }
    }
}

impl fmt::Display for Namespace<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Administrative commands this tool issues, by wire name.
#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    Ping,
    GetReplicaSetStatus,
    InitiateReplicaSet(InitiateConfig),
    ReconfigureReplicaSet(ReplicaSetConfig),
}

impl AdminCommand {
    pub fn name(&self) -> &'static str {
        match self {
            AdminCommand::Ping => "ping",
            AdminCommand::GetReplicaSetStatus => "getReplicaSetStatus",
            AdminCommand::InitiateReplicaSet(_) => "initiateReplicaSet",
            AdminCommand::ReconfigureReplicaSet(_) => "reconfigureReplicaSet",
        }
    }

    /// Argument document sent along with the command name.
    pub fn args(&self) -> Result<Value, ClusterError> {
        Ok(match self {
            AdminCommand::Ping | AdminCommand::GetReplicaSetStatus => json!({}),
            AdminCommand::InitiateReplicaSet(config) => serde_json::to_value(config)?,
            AdminCommand::ReconfigureReplicaSet(config) => serde_json::to_value(config)?,
        })
    }
}

/// An open connection to a single node.
///
/// Implementations only move documents; they do not interpret `ok`.
pub trait Connection: Send + Sync {
    /// The node this connection talks to.
    fn endpoint(&self) -> &Endpoint;

    /// Run `command` against the admin database and return the raw reply.
    fn command(&self, command: &str, args: Value) -> ClientFuture<'_, Value>;

    /// Fetch the single document stored in `namespace`, if any.
    fn read_document(&self, namespace: Namespace<'_>) -> ClientFuture<'_, Option<Value>>;

    /// Release the connection.
    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Opens connections to cluster nodes.
pub trait Connector: Send + Sync + 'static {
    /// Connect to `endpoint`, failing with [`ClusterError::Connection`]
    /// when the node does not answer.
    fn connect(&self, endpoint: &Endpoint) -> ClientFuture<'_, Box<dyn Connection>>;
}

/// Typed view over a [`Connection`].
pub struct ClusterClient {
    conn: Box<dyn Connection>,
}

impl ClusterClient {
    pub fn new(conn: Box<dyn Connection>) -> Self {
        Self { conn }
    }

    /// Connect to a single node.
    pub async fn connect(
        connector: &dyn Connector,
        endpoint: &Endpoint,
    ) -> Result<Self, ClusterError> {
        let conn = connector.connect(endpoint).await?;
        debug!("Connected to {}", endpoint);
        Ok(Self::new(conn))
    }

    /// Try each seed in order and keep the first node that answers.
    pub async fn connect_multi(
        connector: &dyn Connector,
        seeds: &SeedList,
    ) -> Result<Self, ClusterError> {
        for endpoint in seeds.endpoints() {
            match connector.connect(endpoint).await {
                Ok(conn) => {
                    debug!("Connected to seed {}", endpoint);
                    return Ok(Self::new(conn));
                }
                Err(e) => debug!("Seed {} unreachable: {}", endpoint, e),
            }
        }
        Err(ClusterError::Connection {
            endpoints: seeds.to_string(),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.conn.endpoint()
    }

    /// Run an admin command, failing with [`ClusterError::Command`] when
    /// the cluster answers with `ok` false.
    pub async fn run_admin_command(&self, command: AdminCommand) -> Result<Value, ClusterError> {
        let raw = self.conn.command(command.name(), command.args()?).await?;
        let reply: CommandReply = serde_json::from_value(raw.clone())?;
        if !reply.ok {
            return Err(command_error(&reply));
        }
        Ok(raw)
    }

    /// Query membership status.
    ///
    /// Not checked for `ok`: a node that is still bootstrapping answers
    /// with `ok` false together with the phase code that explains why.
    pub async fn replica_set_status(&self) -> Result<ClusterStatus, ClusterError> {
        let command = AdminCommand::GetReplicaSetStatus;
        let raw = self.conn.command(command.name(), command.args()?).await?;
        Ok(serde_json::from_value(raw)?)
    }

    /// Initiate a brand-new set.  The decoded reply is returned as is.
    pub async fn initiate(&self, config: &InitiateConfig) -> Result<CommandReply, ClusterError> {
        self.acknowledged(AdminCommand::InitiateReplicaSet(config.clone()))
            .await
    }

    /// Submit a full replacement configuration document.
    pub async fn reconfigure(
        &self,
        config: &ReplicaSetConfig,
    ) -> Result<CommandReply, ClusterError> {
        self.acknowledged(AdminCommand::ReconfigureReplicaSet(config.clone()))
            .await
    }

    /// Fetch the raw document stored in `namespace`.
    pub async fn read_document(
        &self,
        namespace: Namespace<'_>,
    ) -> Result<Option<Value>, ClusterError> {
        self.conn.read_document(namespace).await
    }

    /// Read the persisted replica-set configuration, if one exists.
    pub async fn read_replica_set_config(&self) -> Result<Option<ReplicaSetConfig>, ClusterError> {
        match self.read_document(REPLSET_CONFIG_NAMESPACE).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Persist `config`.  The cluster only accepts configuration changes
    /// through the reconfiguration command, so this is what gets sent.
    pub async fn write_replica_set_config(
        &self,
        config: &ReplicaSetConfig,
    ) -> Result<CommandReply, ClusterError> {
        self.reconfigure(config).await
    }

    pub async fn close(self) {
        self.conn.close().await;
        debug!("Closed connection to {}", self.conn.endpoint());
    }

    async fn acknowledged(&self, command: AdminCommand) -> Result<CommandReply, ClusterError> {
        let raw = self.conn.command(command.name(), command.args()?).await?;
        Ok(serde_json::from_value(raw)?)
    }
}

/// Build the error describing a rejected command.
pub fn command_error(reply: &CommandReply) -> ClusterError {
    ClusterError::Command {
        code: reply.code.unwrap_or(0),
        message: reply
            .errmsg
            .clone()
            .unwrap_or_else(|| "command failed".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::DEFAULT_PORT;
    use crate::client::memory::MemoryCluster;
    use crate::model::Member;

    fn ep(host: &str) -> Endpoint {
        Endpoint::new(host, DEFAULT_PORT)
    }

    #[test]
    fn test_command_names() {
        assert_eq!(AdminCommand::GetReplicaSetStatus.name(), "getReplicaSetStatus");
        let init = AdminCommand::InitiateReplicaSet(InitiateConfig::single_member(None, "a:1"));
        assert_eq!(init.name(), "initiateReplicaSet");
        assert_eq!(init.args().unwrap()["members"][0]["host"], "a:1");
        assert_eq!(REPLSET_CONFIG_NAMESPACE.to_string(), "local.system.replset");
    }

    #[tokio::test]
    async fn test_connect_multi_skips_unreachable_seeds() {
        let cluster = MemoryCluster::new();
        cluster.add_node(ep("a"));
        cluster.add_node(ep("b"));
        cluster.set_reachable(&ep("a"), false);

        let seeds = SeedList::from(vec![ep("a"), ep("b")]);
        let client = ClusterClient::connect_multi(&cluster, &seeds).await.unwrap();
        assert_eq!(client.endpoint(), &ep("b"));
    }

    #[tokio::test]
    async fn test_connect_multi_fails_when_no_seed_answers() {
        let cluster = MemoryCluster::new();
        let seeds = SeedList::from(vec![ep("a"), ep("b")]);
        let err = ClusterClient::connect_multi(&cluster, &seeds)
            .await
            .err()
            .unwrap();
        match err {
            ClusterError::Connection { endpoints } => {
                assert_eq!(endpoints, "a:27017,b:27017");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_run_admin_command_surfaces_rejection() {
        let cluster = MemoryCluster::new();
        cluster.add_node(ep("a"));
        cluster.fail_next("initiateReplicaSet", CommandReply::failure(23, "already initialized"));

        let client = ClusterClient::connect(&cluster, &ep("a")).await.unwrap();
        let err = client
            .run_admin_command(AdminCommand::InitiateReplicaSet(
                InitiateConfig::single_member(None, "a:27017"),
            ))
            .await
            .unwrap_err();
        match err {
            ClusterError::Command { code, message } => {
                assert_eq!(code, 23);
                assert_eq!(message, "already initialized");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_read_missing_config_is_none() {
        let cluster = MemoryCluster::new();
        cluster.add_node(ep("a"));
        let client = ClusterClient::connect(&cluster, &ep("a")).await.unwrap();
        assert!(client.read_replica_set_config().await.unwrap().is_none());

        cluster.set_config(ReplicaSetConfig {
            id: "rs0".to_string(),
            version: 1,
            members: vec![Member::new(0, "a:27017")],
            extra: Default::default(),
        });
        let config = client.read_replica_set_config().await.unwrap().unwrap();
        assert_eq!(config.id, "rs0");
        client.close().await;
        assert_eq!(cluster.closed(), vec![ep("a")]);
    }
}
