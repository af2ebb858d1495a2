//! Typed documents exchanged with the cluster.
//!
//! Replies are decoded into these structs once, at the client boundary;
//! the interpreter, mutator and orchestrator never look at raw JSON.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Reply to the `getReplicaSetStatus` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatus {
    #[serde(default, deserialize_with = "deserialize_ok")]
    pub ok: bool,

    /// Name of the set; present once the node belongs to a running set.
    #[serde(rename = "set", default, skip_serializing_if = "Option::is_none")]
    pub set_name: Option<String>,

    /// Bootstrap phase code; absent once fully converged, and absent when
    /// replication is not enabled at all.
    #[serde(
        rename = "startupStatus",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub startup_phase: Option<i64>,
}

impl ClusterStatus {
    /// Status of a node that belongs to the running set `name`.
    pub fn in_set(name: impl Into<String>) -> Self {
        Self {
            ok: true,
            set_name: Some(name.into()),
            startup_phase: None,
        }
    }

    /// Status of a node still in bootstrap phase `phase`.
    pub fn starting(phase: i64) -> Self {
        Self {
            ok: true,
            set_name: None,
            startup_phase: Some(phase),
        }
    }
}

/// One entry of `ReplicaSetConfig::members`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    #[serde(rename = "_id")]
    pub id: u32,

    /// `host[:port]` the other members use to reach this one.
    pub host: String,

    /// Member options this tool does not interpret (priority, votes...).
    /// Kept so a read-modify-write round trip does not drop them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Member {
    pub fn new(id: u32, host: impl Into<String>) -> Self {
        Self {
            id,
            host: host.into(),
            extra: Map::new(),
        }
    }
}

/// The persisted replica-set configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSetConfig {
    /// The set's name; immutable once the set exists.
    #[serde(rename = "_id")]
    pub id: String,

    /// Bumped exactly once per successful reconfiguration.
    pub version: i64,

    #[serde(default)]
    pub members: Vec<Member>,

    /// Set-level settings this tool does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload of the `initiateReplicaSet` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitiateConfig {
    /// Omitted when not configured, so the node applies the set name it
    /// was started with.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub members: Vec<Member>,
}

impl InitiateConfig {
    /// Config naming `host` as the sole initial member.
    pub fn single_member(set_name: Option<String>, host: impl Into<String>) -> Self {
        Self {
            id: set_name,
            members: vec![Member::new(0, host)],
        }
    }
}

/// Generic acknowledgement returned by every admin command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    #[serde(default, deserialize_with = "deserialize_ok")]
    pub ok: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errmsg: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CommandReply {
    pub fn success() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            code: Some(code),
            errmsg: Some(message.into()),
            extra: Map::new(),
        }
    }
}

/// Clusters report `ok` either as a boolean or as the number 1/0.
fn deserialize_ok<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_decodes_numeric_ok() {
        let status: ClusterStatus =
            serde_json::from_value(json!({"ok": 1, "startupStatus": 3})).unwrap();
        assert!(status.ok);
        assert_eq!(status.startup_phase, Some(3));
        assert_eq!(status.set_name, None);

        let status: ClusterStatus = serde_json::from_value(json!({"ok": 0.0})).unwrap();
        assert!(!status.ok);
    }

    #[test]
    fn test_status_ignores_unrelated_fields() {
        let status: ClusterStatus = serde_json::from_value(json!({
            "ok": true,
            "set": "rs0",
            "myState": 1,
            "members": [{"name": "a:27017"}],
        }))
        .unwrap();
        assert_eq!(status.set_name.as_deref(), Some("rs0"));
    }

    #[test]
    fn test_config_preserves_unknown_fields() {
        let raw = json!({
            "_id": "rs0",
            "version": 3,
            "members": [{"_id": 0, "host": "a:27017", "priority": 2}],
            "settings": {"heartbeatTimeoutSecs": 10},
        });
        let config: ReplicaSetConfig = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(config.id, "rs0");
        assert_eq!(config.members[0].extra["priority"], json!(2));
        assert_eq!(serde_json::to_value(&config).unwrap(), raw);
    }

    #[test]
    fn test_initiate_config_omits_missing_name() {
        let config = InitiateConfig::single_member(None, "db1:27017");
        assert_eq!(
            serde_json::to_value(&config).unwrap(),
            json!({"members": [{"_id": 0, "host": "db1:27017"}]})
        );

        let named = InitiateConfig::single_member(Some("rs0".to_string()), "db1:27017");
        assert_eq!(serde_json::to_value(&named).unwrap()["_id"], json!("rs0"));
    }

    #[test]
    fn test_command_reply_failure_fields() {
        let reply: CommandReply = serde_json::from_value(json!({
            "ok": 0,
            "code": 103,
            "errmsg": "version must be greater",
        }))
        .unwrap();
        assert!(!reply.ok);
        assert_eq!(reply.code, Some(103));
        assert_eq!(reply.errmsg.as_deref(), Some("version must be greater"));
    }
}
