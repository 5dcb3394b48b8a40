//! Device execution context collaborator
//!
//! The reflex engine never talks to radios, the device model, or the
//! scheduler directly. Everything flows through this trait, implemented by
//! the device runtime that hosts the engine.

use std::time::Duration;

use crate::{PlatformMessage, Protocol};

/// Execution context for one device
///
/// All operations are local, in-memory, and non-blocking; the engine stages
/// its effects against this trait during a handling pass and the host
/// applies them. Implementations are not shared between devices.
pub trait DeviceContext {
    /// Read a named scratch variable
    fn variable(&self, name: &str) -> Option<serde_json::Value>;

    /// Write a named scratch variable
    fn set_variable(&mut self, name: &str, value: serde_json::Value);

    /// Read a stored device attribute
    fn attribute(&self, name: &str) -> Option<serde_json::Value>;

    /// Store a device attribute in the device model
    fn store_attribute(&mut self, name: &str, value: serde_json::Value);

    /// Emit a platform message toward the capability model
    fn emit_platform(&mut self, message: PlatformMessage);

    /// Send a raw protocol frame to the device
    fn send_protocol(&mut self, protocol: Protocol, payload: Vec<u8>);

    /// Register a recurring poll with the hub scheduler
    ///
    /// The scheduler owns the timing; the engine never sleeps. Each payload
    /// is resent on its protocol family every `interval`.
    fn schedule_poll(&mut self, interval: Duration, payloads: Vec<(Protocol, Vec<u8>)>);
}
