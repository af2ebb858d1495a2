//! Replica-set bootstrap error types.
//!
//! Every variant maps to a process exit code.  The orchestrator decides
//! which of them end the polling loop; see [`ClusterError::is_fatal`].

use thiserror::Error;

/// Process exit code: converged, or nothing left to do.
pub const EXIT_OK: i32 = 0;

/// Process exit code: startup failure or convergence not reached.
pub const EXIT_START: i32 = 1;

/// Process exit code: invalid or missing parameters.
pub const EXIT_PARAMS: i32 = 2;

/// Errors raised while talking to the cluster or driving the bootstrap.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// None of the supplied endpoints accepted a connection.
    #[error("no reachable endpoint among: {endpoints}")]
    Connection { endpoints: String },

    /// The cluster rejected an administrative command.
    #[error("command failed with code {code}: {message}")]
    Command { code: i32, message: String },

    /// A member was to be added to a set that has no configuration yet.
    #[error("replica set configuration does not exist")]
    ConfigMissing,

    /// The stored configuration cannot be extended as requested.
    #[error("invalid replica set configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The node is not running with replication enabled at all.
    #[error(
        "this database is not configured to run as a replica set node; \
         start it with replication enabled"
    )]
    FatalMisconfiguration,

    /// The polling loop finished without the node converging.
    #[error("replica set node did not converge after {attempts} attempts")]
    AttemptBudgetExhausted { attempts: u32 },

    /// An address could not be parsed as `host[:port]`.
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The request never produced a reply (timeout, reset, bad status).
    #[error("transport error: {0}")]
    Transport(String),

    /// A reply arrived but did not have the expected shape.
    #[error("malformed reply: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClusterError {
    /// Short machine-readable name of the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            ClusterError::Connection { .. } => "ConnectionError",
            ClusterError::Command { .. } => "CommandError",
            ClusterError::ConfigMissing => "ConfigMissingError",
            ClusterError::InvalidConfig { .. } => "InvalidConfig",
            ClusterError::FatalMisconfiguration => "FatalMisconfiguration",
            ClusterError::AttemptBudgetExhausted { .. } => "AttemptBudgetExhausted",
            ClusterError::InvalidAddress { .. } => "InvalidAddress",
            ClusterError::Transport(_) => "TransportError",
            ClusterError::Decode(_) => "DecodeError",
        }
    }

    /// Return the process exit code this error should terminate with.
    pub fn exit_code(&self) -> i32 {
        match self {
            ClusterError::InvalidAddress { .. } => EXIT_PARAMS,
            _ => EXIT_START,
        }
    }

    /// Whether the error ends the polling loop instead of being retried
    /// on the next iteration.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClusterError::FatalMisconfiguration | ClusterError::InvalidAddress { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ClusterError::FatalMisconfiguration.exit_code(), EXIT_START);
        assert_eq!(
            ClusterError::AttemptBudgetExhausted { attempts: 5 }.exit_code(),
            EXIT_START
        );
        let bad = ClusterError::InvalidAddress {
            address: "a:b".to_string(),
            reason: "port is not a number".to_string(),
        };
        assert_eq!(bad.exit_code(), EXIT_PARAMS);
    }

    #[test]
    fn test_only_misconfiguration_is_fatal() {
        assert!(ClusterError::FatalMisconfiguration.is_fatal());
        assert!(!ClusterError::ConfigMissing.is_fatal());
        assert!(!ClusterError::InvalidConfig {
            reason: "member ids exhausted".to_string()
        }
        .is_fatal());
        assert!(!ClusterError::Transport("reset".to_string()).is_fatal());
        assert!(!ClusterError::Command {
            code: 93,
            message: "invalid config".to_string()
        }
        .is_fatal());
    }

    #[test]
    fn test_command_error_message() {
        let err = ClusterError::Command {
            code: 103,
            message: "version too low".to_string(),
        };
        assert_eq!(err.code(), "CommandError");
        assert_eq!(err.to_string(), "command failed with code 103: version too low");
    }
}
