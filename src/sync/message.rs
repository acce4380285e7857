//! Sync wire frames
//!
//! Frames are JSON objects tagged by `"type"`. The server pushes `auth_ack`,
//! `pong` and permission updates; the client sends `auth` and `ping`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// == Sync Kind ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    PermissionChanged,
    RoleChanged,
    MenuChanged,
    Heartbeat,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::PermissionChanged => "permission_changed",
            SyncKind::RoleChanged => "role_changed",
            SyncKind::MenuChanged => "menu_changed",
            SyncKind::Heartbeat => "heartbeat",
        }
    }
}

// == Sync Message ==
/// A server-pushed change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    #[serde(rename = "type")]
    pub kind: SyncKind,
    #[serde(default)]
    pub actor_id: String,
    #[serde(default)]
    pub payload: Value,
    /// Server clock at the time of the change (Unix milliseconds)
    pub server_timestamp: u64,
}

impl SyncMessage {
    pub fn new(kind: SyncKind, actor_id: impl Into<String>, server_timestamp: u64) -> Self {
        Self {
            kind,
            actor_id: actor_id.into(),
            payload: Value::Null,
            server_timestamp,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Key under which last-write-wins ordering is tracked. Heartbeats have none.
    pub fn sync_key(&self) -> Option<String> {
        match self.kind {
            SyncKind::RoleChanged => Some(format!("role:{}", self.actor_id)),
            SyncKind::MenuChanged => Some(format!("menu:{}", self.actor_id)),
            SyncKind::PermissionChanged => Some(format!(
                "perm:{}:{}",
                self.actor_id,
                self.resource().unwrap_or("*")
            )),
            SyncKind::Heartbeat => None,
        }
    }

    /// Broader sync keys whose watermark also orders this message. A role
    /// change supersedes every older change for the actor; a permission
    /// change without a resource supersedes older single-resource ones.
    pub fn covering_keys(&self) -> Vec<String> {
        match self.kind {
            SyncKind::PermissionChanged if self.resource().is_some() => vec![
                format!("role:{}", self.actor_id),
                format!("perm:{}:*", self.actor_id),
            ],
            SyncKind::PermissionChanged | SyncKind::MenuChanged => {
                vec![format!("role:{}", self.actor_id)]
            }
            SyncKind::RoleChanged | SyncKind::Heartbeat => Vec::new(),
        }
    }

    pub fn resource(&self) -> Option<&str> {
        self.payload.get("resource").and_then(Value::as_str)
    }

    pub fn action(&self) -> Option<&str> {
        self.payload.get("action").and_then(Value::as_str)
    }

    pub fn allowed(&self) -> Option<bool> {
        self.payload.get("allowed").and_then(Value::as_bool)
    }

    /// Optional `context` object of string attributes.
    pub fn context(&self) -> BTreeMap<String, String> {
        self.payload
            .get("context")
            .and_then(Value::as_object)
            .map(|object| {
                object
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

// == Frames ==
/// Frames received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    AuthAck,
    Pong,
    Update(SyncMessage),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlFrame {
    AuthAck,
    Pong,
}

impl ServerFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        if let Ok(control) = serde_json::from_str::<ControlFrame>(text) {
            return Ok(match control {
                ControlFrame::AuthAck => ServerFrame::AuthAck,
                ControlFrame::Pong => ServerFrame::Pong,
            });
        }
        serde_json::from_str(text).map(ServerFrame::Update)
    }
}

/// Frames sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth { token: String },
    Ping { timestamp: u64 },
}

impl ClientFrame {
    pub fn to_text(&self) -> String {
        // Serializing a plain enum of strings and integers cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
