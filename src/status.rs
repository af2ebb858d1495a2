//! Classification of membership status replies.
//!
//! [`classify`] maps a decoded [`ClusterStatus`] onto the small set of
//! states the orchestrator branches on.  It is pure and total.

use std::fmt;

use crate::model::ClusterStatus;

/// Seed given and a primary answered; configuration is being loaded.
pub const PHASE_LOADING_CONFIG: i64 = 1;

/// Replication enabled, no seed given and no configuration yet.
pub const PHASE_EMPTY_CONFIG: i64 = 3;

/// Seed given but none of the seed hosts answers.
pub const PHASE_SEEDS_UNREACHABLE: i64 = 4;

/// The set was just initiated and is electing a primary.
pub const PHASE_COMING_ONLINE: i64 = 6;

/// Where a node stands in the replica-set bootstrap sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterState {
    /// Replication is not enabled on the node at all.
    NotConfigured,
    /// The node belongs to a running set.
    Converged,
    /// A primary is reachable through the seed; join it.
    AwaitingPrimary,
    /// None of the seed hosts answers; wait.
    PrimaryUnreachable,
    /// No set exists and no seed was given; initiate one.
    UninitializedFirstNode,
    /// A freshly initiated set is stabilising; wait.
    ComingOnline,
    /// Any other phase code; wait.
    Unknown(i64),
}

impl ClusterState {
    /// Whether this state ends the polling loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClusterState::NotConfigured | ClusterState::Converged)
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterState::NotConfigured => f.write_str("not configured"),
            ClusterState::Converged => f.write_str("converged"),
            ClusterState::AwaitingPrimary => f.write_str("awaiting primary"),
            ClusterState::PrimaryUnreachable => f.write_str("primary unreachable"),
            ClusterState::UninitializedFirstNode => f.write_str("uninitialized first node"),
            ClusterState::ComingOnline => f.write_str("coming online"),
            ClusterState::Unknown(phase) => write!(f, "unknown startup phase {phase}"),
        }
    }
}

/// Classify a status reply.
///
/// A set name always wins over the phase code: a node that finished
/// joining may still report a stale phase.
pub fn classify(status: &ClusterStatus) -> ClusterState {
    if status.set_name.is_some() {
        return ClusterState::Converged;
    }
    match status.startup_phase {
        None => ClusterState::NotConfigured,
        Some(PHASE_LOADING_CONFIG) => ClusterState::AwaitingPrimary,
        Some(PHASE_EMPTY_CONFIG) => ClusterState::UninitializedFirstNode,
        Some(PHASE_SEEDS_UNREACHABLE) => ClusterState::PrimaryUnreachable,
        Some(PHASE_COMING_ONLINE) => ClusterState::ComingOnline,
        Some(other) => ClusterState::Unknown(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status(raw: serde_json::Value) -> ClusterStatus {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_phase_codes() {
        assert_eq!(classify(&ClusterStatus::starting(1)), ClusterState::AwaitingPrimary);
        assert_eq!(
            classify(&ClusterStatus::starting(3)),
            ClusterState::UninitializedFirstNode
        );
        assert_eq!(
            classify(&ClusterStatus::starting(4)),
            ClusterState::PrimaryUnreachable
        );
        assert_eq!(classify(&ClusterStatus::starting(6)), ClusterState::ComingOnline);
        assert_eq!(classify(&ClusterStatus::starting(5)), ClusterState::Unknown(5));
        assert_eq!(classify(&ClusterStatus::starting(0)), ClusterState::Unknown(0));
    }

    #[test]
    fn test_no_set_and_no_phase_is_not_configured() {
        assert_eq!(classify(&status(json!({"ok": 1}))), ClusterState::NotConfigured);
        assert_eq!(classify(&status(json!({"ok": 0}))), ClusterState::NotConfigured);
    }

    #[test]
    fn test_set_name_wins_over_phase() {
        for phase in [1, 3, 4, 6, 42] {
            let reply = status(json!({"ok": 1, "set": "rs0", "startupStatus": phase}));
            assert_eq!(classify(&reply), ClusterState::Converged);
        }
    }

    #[test]
    fn test_classify_is_deterministic() {
        let reply = status(json!({"ok": 1, "startupStatus": 4}));
        let first = classify(&reply);
        for _ in 0..10 {
            assert_eq!(classify(&reply.clone()), first);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(ClusterState::Converged.is_terminal());
        assert!(ClusterState::NotConfigured.is_terminal());
        assert!(!ClusterState::AwaitingPrimary.is_terminal());
        assert!(!ClusterState::Unknown(9).is_terminal());
    }
}
