//! Test support for driver hosts
//!
//! A recording device context that captures every effect the engine
//! produces, used by this crate's own tests and by hosts exercising their
//! drivers against the executor.

use std::collections::HashMap;
use std::time::Duration;

use reflex_core::{DeviceContext, PlatformMessage, Protocol};
use serde_json::Value;

/// Device context that records every effect
#[derive(Debug, Default)]
pub struct RecordingDevice {
    /// Scratch variables
    pub variables: HashMap<String, Value>,

    /// Stored attributes
    pub attributes: HashMap<String, Value>,

    /// Emitted platform messages, in order
    pub platform: Vec<PlatformMessage>,

    /// Sent protocol frames, in order
    pub protocol: Vec<(Protocol, Vec<u8>)>,

    /// Registered polls, in order
    pub polls: Vec<(Duration, Vec<(Protocol, Vec<u8>)>)>,
}

impl DeviceContext for RecordingDevice {
    fn variable(&self, name: &str) -> Option<Value> {
        self.variables.get(name).cloned()
    }

    fn set_variable(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes.get(name).cloned()
    }

    fn store_attribute(&mut self, name: &str, value: Value) {
        self.attributes.insert(name.to_string(), value);
    }

    fn emit_platform(&mut self, message: PlatformMessage) {
        self.platform.push(message);
    }

    fn send_protocol(&mut self, protocol: Protocol, payload: Vec<u8>) {
        self.protocol.push((protocol, payload));
    }

    fn schedule_poll(&mut self, interval: Duration, payloads: Vec<(Protocol, Vec<u8>)>) {
        self.polls.push((interval, payloads));
    }
}
