//! Message types handled by the reflex engine
//!
//! The engine sees two kinds of inbound traffic: raw protocol frames from
//! the device radios (Zigbee, Z-Wave) and structured platform messages from
//! the capability model. Device lifecycle transitions arrive as a third,
//! trivial kind of their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Context;

/// Protocol family of a raw device frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Zigbee,
    Zwave,
}

impl Protocol {
    /// Get the protocol family as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Zigbee => "zigbee",
            Protocol::Zwave => "zwave",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A raw protocol frame received from a device radio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    /// Protocol family the frame arrived on
    pub protocol: Protocol,

    /// Raw frame bytes
    pub payload: Vec<u8>,

    /// When the frame was received
    pub received_at: DateTime<Utc>,

    /// Context tracking origin and causality
    pub context: Context,
}

impl ProtocolMessage {
    /// Create a new protocol message with the current timestamp
    pub fn new(protocol: Protocol, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            protocol,
            payload: payload.into(),
            received_at: Utc::now(),
            context: Context::new(),
        }
    }
}

/// A structured platform message in the capability model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformMessage {
    /// Message name (e.g. "attribute_changed")
    pub name: String,

    /// Message arguments
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,

    /// Whether this message answers an earlier request
    #[serde(default)]
    pub response: bool,

    /// When the message was received or created
    pub received_at: DateTime<Utc>,

    /// Context tracking origin and causality
    pub context: Context,
}

impl PlatformMessage {
    /// Create a new platform message with the current timestamp
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: serde_json::Map::new(),
            response: false,
            received_at: Utc::now(),
            context: Context::new(),
        }
    }

    /// Add an argument
    pub fn with_arg(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    /// Mark the message as a response
    pub fn as_response(mut self) -> Self {
        self.response = true;
        self
    }

    /// Attach a causality context
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }
}

/// Device lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEvent {
    /// Device was added to the hub
    Added,
    /// Device came online
    Connected,
    /// Device went offline
    Disconnected,
    /// Device was removed from the hub
    Removed,
}

impl LifecycleEvent {
    /// Get the lifecycle event as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::Added => "added",
            LifecycleEvent::Connected => "connected",
            LifecycleEvent::Disconnected => "disconnected",
            LifecycleEvent::Removed => "removed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_message_builder() {
        let msg = PlatformMessage::new("attribute_changed")
            .with_arg("name", serde_json::json!("swit:state"))
            .with_arg("value", serde_json::json!("ON"));

        assert_eq!(msg.name, "attribute_changed");
        assert_eq!(msg.args.get("name"), Some(&serde_json::json!("swit:state")));
        assert!(!msg.response);
    }

    #[test]
    fn test_protocol_roundtrip() {
        let json = serde_json::to_string(&Protocol::Zigbee).unwrap();
        assert_eq!(json, r#""zigbee""#);

        let back: Protocol = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Protocol::Zigbee);
    }
}
