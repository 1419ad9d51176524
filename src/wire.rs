//! Wire format types and the record-to-wire-entry projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::discovery::Producer;
use crate::record::Record;

/// One normalized record within a payload. Entries are self-describing; the
/// shipper never interprets their contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEntry {
    pub uuid: String,
    pub role: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_thinking: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_tool_use: Option<bool>,
}

/// The unit of shipping, retry, and buffering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePayload {
    pub producer: Producer,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub entries: Vec<WireEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    Start,
    Active,
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub producer: Producer,
    pub session_id: String,
    pub event: LifecycleKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub instance_id: String,
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Total function over the `Record` variant set: every variant,
/// including the unrecognized-tag fallback, projects to an entry.
pub fn record_to_entry(record: &Record) -> WireEntry {
    match record {
        Record::User(u) => WireEntry {
            uuid: u.uuid.clone(),
            role: "user".to_string(),
            timestamp: u.timestamp,
            text: u.text.clone(),
            model: None,
            tool_name: None,
            agent_id: None,
            is_error: u.is_error.then_some(true),
            input_tokens: None,
            output_tokens: None,
            has_thinking: None,
            thinking_len: None,
            has_tool_use: None,
        },
        Record::Assistant(a) => WireEntry {
            uuid: a.uuid.clone(),
            role: "assistant".to_string(),
            timestamp: a.timestamp,
            text: a.text.clone(),
            model: a.model.clone(),
            tool_name: a.tool_name.clone(),
            agent_id: None,
            is_error: None,
            input_tokens: a.input_tokens,
            output_tokens: a.output_tokens,
            has_thinking: a.has_thinking.then_some(true),
            thinking_len: a.has_thinking.then_some(a.thinking_len),
            has_tool_use: a.has_tool_use.then_some(true),
        },
        Record::System(s) => WireEntry {
            uuid: s.uuid.clone(),
            role: "system".to_string(),
            timestamp: s.timestamp,
            text: None,
            model: None,
            tool_name: None,
            agent_id: None,
            is_error: None,
            input_tokens: None,
            output_tokens: None,
            has_thinking: None,
            thinking_len: None,
            has_tool_use: None,
        },
        Record::Unknown { uuid, timestamp } => WireEntry {
            uuid: uuid.clone(),
            role: "unknown".to_string(),
            timestamp: *timestamp,
            text: None,
            model: None,
            tool_name: None,
            agent_id: None,
            is_error: None,
            input_tokens: None,
            output_tokens: None,
            has_thinking: None,
            thinking_len: None,
            has_tool_use: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AssistantRecord, UserRecord};

    #[test]
    fn user_record_maps_error_flag_only_when_set() {
        let rec = Record::User(UserRecord {
            uuid: "u1".to_string(),
            timestamp: Utc::now(),
            text: Some("hi".to_string()),
            tool_result_for: None,
            is_error: false,
        });
        let entry = record_to_entry(&rec);
        assert_eq!(entry.role, "user");
        assert_eq!(entry.is_error, None);
    }

    #[test]
    fn assistant_record_carries_thinking_len_only_when_has_thinking() {
        let rec = Record::Assistant(AssistantRecord {
            uuid: "a1".to_string(),
            timestamp: Utc::now(),
            model: Some("claude-x".to_string()),
            text: Some("answer".to_string()),
            tool_name: None,
            has_thinking: true,
            thinking_len: 42,
            has_tool_use: false,
            input_tokens: Some(10),
            output_tokens: Some(20),
        });
        let entry = record_to_entry(&rec);
        assert_eq!(entry.has_thinking, Some(true));
        assert_eq!(entry.thinking_len, Some(42));
        assert_eq!(entry.has_tool_use, None);
    }

    #[test]
    fn payload_round_trips_through_json() {
        let payload = WirePayload {
            producer: Producer::Claude,
            session_id: "sess1".to_string(),
            project_path: None,
            instance_id: None,
            machine_id: None,
            metadata: None,
            entries: vec![],
        };
        let bytes = serde_json::to_vec(&payload).unwrap();
        let back: WirePayload = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.session_id, "sess1");
    }
}
