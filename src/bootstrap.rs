//! Replica-set bootstrap orchestration.
//!
//! [`Bootstrapper::run`] connects to the target node and polls its
//! membership status a bounded number of times.  Each poll is classified
//! and acted on before the next one starts:
//!
//! - converged: done
//! - not configured: fatal, the node runs without replication
//! - awaiting a primary: join through the seed list
//! - first node without a set: initiate a set naming only this node
//! - anything else: wait for the next poll
//!
//! Failures of a single join or initiate attempt are logged and the next
//! poll decides again.  The connection to the target is closed on every
//! exit path.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::address::{Endpoint, SeedList};
use crate::client::backend::{command_error, ClusterClient, Connector};
use crate::errors::ClusterError;
use crate::membership::MembershipMutator;
use crate::model::InitiateConfig;
use crate::status::{classify, ClusterState};

/// Default number of status polls before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default pause before every poll but the first.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

/// How often to poll and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// Orchestrator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Polling,
    Initializing,
    Joining,
    Converged,
    Failed,
}

/// Summary of a successful bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Status polls performed, including the converging one.
    pub attempts: u32,
    /// Name of the set the node belongs to.
    pub set_name: String,
    /// Every state entered, in order, starting with `Polling`.
    pub transitions: Vec<BootstrapState>,
}

/// An unsuccessful bootstrap: the error that ended it and the states
/// entered on the way, ending in `Failed`.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct BootstrapFailure {
    pub error: ClusterError,
    pub transitions: Vec<BootstrapState>,
}

impl BootstrapFailure {
    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}

/// Drives one node to membership in a replica set.
pub struct Bootstrapper {
    connector: Arc<dyn Connector>,
    mutator: MembershipMutator,
    target: Endpoint,
    seeds: Option<SeedList>,
    set_name: Option<String>,
    policy: RetryPolicy,
}

impl Bootstrapper {
    pub fn new(connector: Arc<dyn Connector>, target: Endpoint) -> Self {
        Self {
            mutator: MembershipMutator::new(Arc::clone(&connector)),
            connector,
            target,
            seeds: None,
            set_name: None,
            policy: RetryPolicy::default(),
        }
    }

    /// Members of the existing set to join through.  Without seeds the
    /// node is expected to become the first member of a new set.
    pub fn with_seeds(mut self, seeds: Option<SeedList>) -> Self {
        self.seeds = seeds;
        self
    }

    /// Set name sent when initiating.  Left out, the node's own
    /// startup setting applies.
    pub fn with_set_name(mut self, set_name: Option<String>) -> Self {
        self.set_name = set_name;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Poll until the node converges, fails fast, or runs out of attempts.
    pub async fn run(&self) -> Result<BootstrapReport, BootstrapFailure> {
        let mut transitions = vec![BootstrapState::Polling];
        let result = match ClusterClient::connect(self.connector.as_ref(), &self.target).await {
            Ok(client) => {
                let result = self.poll(&client, &mut transitions).await;
                client.close().await;
                result
            }
            Err(e) => Err(e),
        };

        result.map_err(|error| {
            enter(&mut transitions, BootstrapState::Failed);
            BootstrapFailure { error, transitions }
        })
    }

    async fn poll(
        &self,
        client: &ClusterClient,
        transitions: &mut Vec<BootstrapState>,
    ) -> Result<BootstrapReport, ClusterError> {

        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.policy.backoff).await;
            }
            enter(transitions, BootstrapState::Polling);

            let status = match client.replica_set_status().await {
                Ok(status) => status,
                Err(e) => {
                    error!("Attempt {}. Not possible to get replica set status: {}", attempt, e);
                    continue;
                }
            };

            let state = classify(&status);
            debug!("Attempt {}. Node {} is {}", attempt, self.target, state);

            match state {
                ClusterState::Converged => {
                    let set_name = status.set_name.unwrap_or_default();
                    info!("Replica set node is configured (set '{}').", set_name);
                    enter(transitions, BootstrapState::Converged);
                    return Ok(BootstrapReport {
                        attempts: attempt,
                        set_name,
                        transitions: std::mem::take(transitions),
                    });
                }
                ClusterState::NotConfigured => return Err(ClusterError::FatalMisconfiguration),
                ClusterState::AwaitingPrimary => {
                    enter(transitions, BootstrapState::Joining);
                    self.join().await;
                }
                ClusterState::PrimaryUnreachable => {
                    debug!(
                        "Attempt {}. No host from specified seed hosts is reachable.",
                        attempt
                    );
                }
                ClusterState::UninitializedFirstNode => {
                    enter(transitions, BootstrapState::Initializing);
                    self.initiate(client).await;
                }
                ClusterState::ComingOnline => {
                    debug!("Attempt {}. Replica set initialized - coming online.", attempt);
                }
                ClusterState::Unknown(phase) => {
                    debug!("Attempt {}. Unrecognized startup phase {}.", attempt, phase);
                }
            }
        }

        Err(ClusterError::AttemptBudgetExhausted {
            attempts: self.policy.max_attempts,
        })
    }

    async fn join(&self) {
        let Some(seeds) = &self.seeds else {
            warn!("Node {} is waiting for a primary but no seed was given.", self.target);
            return;
        };

        info!("Adding this node as secondary replica-set node.");
        let host = self.target.to_string();
        match self.mutator.add_member(seeds, &host).await {
            Ok(true) => info!("Node {} added to the replica set configuration.", host),
            // The mutator has already logged the rejection.
            Ok(false) => debug!("Node {} not added; the next poll decides again.", host),
            Err(e) => error!("Adding node {} to the replica set failed: {}", host, e),
        }
    }

    async fn initiate(&self, client: &ClusterClient) {
        info!("Initializing this node as primary replica-set node.");
        let config = InitiateConfig::single_member(self.set_name.clone(), self.target.to_string());
        match client.initiate(&config).await {
            Ok(reply) if reply.ok => info!("Replica set initiated on {}.", self.target),
            Ok(reply) => error!("Replica set initiation failed: {}", command_error(&reply)),
            Err(e) => error!("Replica set initiation failed: {}", e),
        }
    }
}

fn enter(transitions: &mut Vec<BootstrapState>, state: BootstrapState) {
    if transitions.last() != Some(&state) {
        transitions.push(state);
    }
}
