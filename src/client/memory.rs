//! In-memory simulated cluster.
//!
//! Every node registered with a [`MemoryCluster`] shares one replica-set
//! configuration document, the way real members share the replicated
//! `local.system.replset` collection.  Status replies are scripted per
//! node and every command is recorded, which makes the orchestrator and
//! mutator testable without a network.  Uses `Mutex<State>` shared via
//! `Arc`; the lock is never held across an await point.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::time::Instant;

use super::backend::{
    ClientFuture, Connection, Connector, Namespace, REPLSET_CONFIG_NAMESPACE,
};
use crate::address::Endpoint;
use crate::errors::ClusterError;
use crate::model::{ClusterStatus, CommandReply, InitiateConfig, ReplicaSetConfig};

/// Name used when an initiate request does not carry one.
const DEFAULT_SET_NAME: &str = "rs0";

/// One command as received by the simulated cluster.
#[derive(Debug, Clone)]
pub struct RecordedCommand {
    pub endpoint: Endpoint,
    pub name: String,
    pub args: Value,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct Node {
    reachable: bool,
    /// Replies handed out in order; the last one repeats forever.
    statuses: VecDeque<ClusterStatus>,
}

#[derive(Debug, Default)]
struct State {
    nodes: HashMap<Endpoint, Node>,
    config: Option<ReplicaSetConfig>,
    version_check: bool,
    injected_failures: HashMap<String, VecDeque<CommandReply>>,
    dropped: HashMap<String, u32>,
    connection_attempts: Vec<Endpoint>,
    commands: Vec<RecordedCommand>,
    closed: Vec<Endpoint>,
}

/// Handle to a simulated cluster.  Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    state: Arc<Mutex<State>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a reachable node that reports no replication status.
    pub fn add_node(&self, endpoint: Endpoint) {
        self.lock().nodes.entry(endpoint).or_default().reachable = true;
    }

    /// Register `endpoint` (if needed) and queue status replies for it.
    pub fn script_status(&self, endpoint: Endpoint, statuses: Vec<ClusterStatus>) {
        let mut state = self.lock();
        let node = state.nodes.entry(endpoint).or_default();
        node.reachable = true;
        node.statuses.extend(statuses);
    }

    pub fn set_reachable(&self, endpoint: &Endpoint, reachable: bool) {
        if let Some(node) = self.lock().nodes.get_mut(endpoint) {
            node.reachable = reachable;
        }
    }

    pub fn set_config(&self, config: ReplicaSetConfig) {
        self.lock().config = Some(config);
    }

    pub fn config(&self) -> Option<ReplicaSetConfig> {
        self.lock().config.clone()
    }

    /// Reject reconfigurations whose version is not above the stored one.
    pub fn enforce_version_check(&self, enabled: bool) {
        self.lock().version_check = enabled;
    }

    /// Answer the next `command` with `reply` instead of executing it.
    pub fn fail_next(&self, command: &str, reply: CommandReply) {
        self.lock()
            .injected_failures
            .entry(command.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Lose the next `count` requests for `command` in transit.
    pub fn drop_next(&self, command: &str, count: u32) {
        *self.lock().dropped.entry(command.to_string()).or_default() += count;
    }

    /// Every endpoint a connection was attempted to, in order.
    pub fn connection_attempts(&self) -> Vec<Endpoint> {
        self.lock().connection_attempts.clone()
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.lock().commands.clone()
    }

    pub fn commands_named(&self, name: &str) -> Vec<RecordedCommand> {
        self.lock()
            .commands
            .iter()
            .filter(|c| c.name == name)
            .cloned()
            .collect()
    }

    /// Endpoints whose connections were closed, in order.
    pub fn closed(&self) -> Vec<Endpoint> {
        self.lock().closed.clone()
    }

    fn execute(&self, endpoint: &Endpoint, name: &str, args: Value) -> Result<Value, ClusterError> {
        let mut state = self.lock();
        state.commands.push(RecordedCommand {
            endpoint: endpoint.clone(),
            name: name.to_string(),
            args: args.clone(),
            at: Instant::now(),
        });

        if let Some(remaining) = state.dropped.get_mut(name).filter(|n| **n > 0) {
            *remaining -= 1;
            return Err(ClusterError::Transport(format!(
                "connection to {endpoint} reset"
            )));
        }

        if let Some(reply) = state
            .injected_failures
            .get_mut(name)
            .and_then(VecDeque::pop_front)
        {
            return Ok(serde_json::to_value(reply)?);
        }

        let reply = match name {
            "ping" => serde_json::to_value(CommandReply::success())?,
            "getReplicaSetStatus" => {
                let node = state.nodes.entry(endpoint.clone()).or_default();
                let status = if node.statuses.len() > 1 {
                    node.statuses.pop_front().unwrap_or_default()
                } else {
                    node.statuses.front().cloned().unwrap_or_default()
                };
                serde_json::to_value(status)?
            }
            "initiateReplicaSet" => {
                let request: InitiateConfig = serde_json::from_value(args)?;
                let reply = if state.config.is_some() {
                    CommandReply::failure(23, "already initialized")
                } else {
                    state.config = Some(ReplicaSetConfig {
                        id: request.id.unwrap_or_else(|| DEFAULT_SET_NAME.to_string()),
                        version: 1,
                        members: request.members,
                        extra: Default::default(),
                    });
                    CommandReply::success()
                };
                serde_json::to_value(reply)?
            }
            "reconfigureReplicaSet" => {
                let proposed: ReplicaSetConfig = serde_json::from_value(args)?;
                let current_version = state.config.as_ref().map(|c| c.version);
                let reply = match current_version {
                    None => CommandReply::failure(94, "replica set not yet initialized"),
                    Some(current) if state.version_check && proposed.version <= current => {
                        CommandReply::failure(
                            103,
                            format!(
                                "version {} must be greater than current version {}",
                                proposed.version, current
                            ),
                        )
                    }
                    Some(_) => {
                        state.config = Some(proposed);
                        CommandReply::success()
                    }
                };
                serde_json::to_value(reply)?
            }
            other => serde_json::to_value(CommandReply::failure(
                59,
                format!("no such command: '{other}'"),
            ))?,
        };
        Ok(reply)
    }
}

impl Connector for MemoryCluster {
    fn connect(&self, endpoint: &Endpoint) -> ClientFuture<'_, Box<dyn Connection>> {
        let endpoint = endpoint.clone();
        Box::pin(async move {
            let reachable = {
                let mut state = self.lock();
                state.connection_attempts.push(endpoint.clone());
                state.nodes.get(&endpoint).is_some_and(|node| node.reachable)
            };
            if !reachable {
                return Err(ClusterError::Connection {
                    endpoints: endpoint.to_string(),
                });
            }
            let conn: Box<dyn Connection> = Box::new(MemoryConnection {
                cluster: self.clone(),
                endpoint,
            });
            Ok(conn)
        })
    }
}

/// Connection to one node of a [`MemoryCluster`].
pub struct MemoryConnection {
    cluster: MemoryCluster,
    endpoint: Endpoint,
}

impl Connection for MemoryConnection {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn command(&self, command: &str, args: Value) -> ClientFuture<'_, Value> {
        let command = command.to_string();
        Box::pin(async move { self.cluster.execute(&self.endpoint, &command, args) })
    }

    fn read_document(&self, namespace: Namespace<'_>) -> ClientFuture<'_, Option<Value>> {
        let is_config = namespace == REPLSET_CONFIG_NAMESPACE;
        Box::pin(async move {
            let snapshot = if is_config {
                match self.cluster.config() {
                    Some(config) => Some(serde_json::to_value(config)?),
                    None => None,
                }
            } else {
                None
            };
            // A read is a network round trip: let other tasks run between
            // taking the snapshot and handing it back.
            tokio::task::yield_now().await;
            Ok(snapshot)
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.cluster.lock().closed.push(self.endpoint.clone());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::DEFAULT_PORT;
    use crate::client::backend::ClusterClient;
    use crate::model::Member;

    fn ep(host: &str) -> Endpoint {
        Endpoint::new(host, DEFAULT_PORT)
    }

    #[tokio::test]
    async fn test_unknown_node_refuses_connection() {
        let cluster = MemoryCluster::new();
        assert!(cluster.connect(&ep("ghost")).await.is_err());
    }

    #[tokio::test]
    async fn test_status_script_repeats_last_reply() {
        let cluster = MemoryCluster::new();
        cluster.script_status(
            ep("a"),
            vec![ClusterStatus::starting(3), ClusterStatus::in_set("rs0")],
        );
        let client = ClusterClient::connect(&cluster, &ep("a")).await.unwrap();

        assert_eq!(client.replica_set_status().await.unwrap().startup_phase, Some(3));
        for _ in 0..3 {
            let status = client.replica_set_status().await.unwrap();
            assert_eq!(status.set_name.as_deref(), Some("rs0"));
        }
        assert_eq!(cluster.commands_named("getReplicaSetStatus").len(), 4);
    }

    #[tokio::test]
    async fn test_initiate_creates_version_one_config() {
        let cluster = MemoryCluster::new();
        cluster.add_node(ep("a"));
        let client = ClusterClient::connect(&cluster, &ep("a")).await.unwrap();

        let reply = client
            .initiate(&InitiateConfig::single_member(None, "a:27017"))
            .await
            .unwrap();
        assert!(reply.ok);

        let config = cluster.config().unwrap();
        assert_eq!(config.id, DEFAULT_SET_NAME);
        assert_eq!(config.version, 1);
        assert_eq!(config.members, vec![Member::new(0, "a:27017")]);

        let again = client
            .initiate(&InitiateConfig::single_member(None, "a:27017"))
            .await
            .unwrap();
        assert!(!again.ok);
        assert_eq!(again.code, Some(23));
    }

    #[tokio::test]
    async fn test_version_check_rejects_stale_write() {
        let cluster = MemoryCluster::new();
        cluster.add_node(ep("a"));
        cluster.enforce_version_check(true);
        let config = ReplicaSetConfig {
            id: "rs0".to_string(),
            version: 4,
            members: vec![Member::new(0, "a:27017")],
            extra: Default::default(),
        };
        cluster.set_config(config.clone());

        let client = ClusterClient::connect(&cluster, &ep("a")).await.unwrap();
        let reply = client.reconfigure(&config).await.unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.code, Some(103));
        assert_eq!(cluster.config().unwrap().version, 4);
    }

    #[tokio::test]
    async fn test_dropped_request_is_transport_error() {
        let cluster = MemoryCluster::new();
        cluster.script_status(ep("a"), vec![ClusterStatus::starting(6)]);
        cluster.drop_next("getReplicaSetStatus", 1);
        let client = ClusterClient::connect(&cluster, &ep("a")).await.unwrap();

        let err = client.replica_set_status().await.unwrap_err();
        assert_eq!(err.code(), "TransportError");
        assert!(client.replica_set_status().await.is_ok());
        assert_eq!(cluster.connection_attempts(), vec![ep("a")]);
    }

    #[tokio::test]
    async fn test_unknown_command_is_rejected() {
        let cluster = MemoryCluster::new();
        cluster.add_node(ep("a"));
        let conn = cluster.connect(&ep("a")).await.unwrap();
        let raw = conn.command("shutdown", Value::Null).await.unwrap();
        let reply: CommandReply = serde_json::from_value(raw).unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.code, Some(59));
    }
}
