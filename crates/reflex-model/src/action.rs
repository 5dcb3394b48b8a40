//! Action types
//!
//! Actions are the effects of a reflex. They execute against the device
//! execution context: sending frames, emitting platform messages, staging
//! attribute writes. Composite actions (Ordered, Delay) wrap sub-actions
//! that are repackaged into a single wire envelope per protocol family.

use std::time::Duration;

use reflex_core::Protocol;

/// Rule effect
///
/// Exactly one variant is active; equality is structural.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send a raw protocol frame
    SendProtocol(SendProtocolAction),

    /// Emit a platform message
    SendPlatform(SendPlatformAction),

    /// Stage an attribute write, stored to the device model
    SetAttribute(SetAttributeAction),

    /// Stage an attribute write that is emitted but never stored
    SetAttributeNoStore(SetAttributeAction),

    /// Sub-actions repackaged into one ordered-commands envelope
    Ordered(OrderedAction),

    /// Sub-actions repackaged into one delayed-commands envelope
    Delay(DelayAction),

    /// Calibrated sensor-value normalization with hysteresis
    AlertmeLifesign(AlertmeLifesignAction),

    /// Send the IAS zone enroll response
    ZigbeeIasZoneEnroll(IasZoneEnrollAction),

    /// Structured log line
    Log(LogAction),

    /// Mark the message not handled so the platform forwards it upstream
    Forward,

    /// Diagnostic marker
    Debug,

    /// Placeholder resolved by the cloud platform; not executable on-hub
    Builtin(BuiltinAction),

    /// Action kind this engine version does not recognize
    Unknown { kind: String },
}

impl Action {
    /// Whether this action may appear inside an Ordered or Delay wrapper
    pub fn is_orderable(&self) -> bool {
        matches!(
            self,
            Action::SendProtocol(_) | Action::Ordered(_) | Action::Delay(_)
        )
    }
}

/// Protocol send action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendProtocolAction {
    /// Protocol family to send on
    pub protocol: Protocol,

    /// Raw frame bytes
    pub payload: Vec<u8>,
}

/// Platform message send action
#[derive(Debug, Clone, PartialEq)]
pub struct SendPlatformAction {
    /// Message name
    pub name: String,

    /// Message arguments
    pub args: serde_json::Map<String, serde_json::Value>,

    /// Whether the message answers an earlier request
    pub response: bool,
}

/// Attribute write action, shared by the stored and emit-only variants
#[derive(Debug, Clone, PartialEq)]
pub struct SetAttributeAction {
    /// Attribute name
    pub name: String,

    /// New value
    pub value: serde_json::Value,
}

/// Ordered commands wrapper
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedAction {
    /// Sub-actions; must all be orderable
    pub actions: Vec<Action>,
}

/// Delayed commands wrapper
#[derive(Debug, Clone, PartialEq)]
pub struct DelayAction {
    /// Delay before the wrapped commands run
    pub duration: Duration,

    /// Sub-actions; must all be orderable
    pub actions: Vec<Action>,
}

/// Which AlertMe lifesign reading an action normalizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifesignKind {
    Battery,
    Signal,
    Temperature,
}

/// Battery calibration bounds, in millivolts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    /// Voltage reading as 0%
    pub minimum: i32,

    /// Voltage reading as 100%
    pub nominal: i32,
}

/// AlertMe lifesign normalization action
#[derive(Debug, Clone, PartialEq)]
pub struct AlertmeLifesignAction {
    /// Reading to normalize
    pub kind: LifesignKind,

    /// Battery calibration; required for Battery, ignored otherwise
    pub calibration: Option<Calibration>,
}

/// IAS zone enroll response action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IasZoneEnrollAction {
    /// Target endpoint
    pub endpoint: u8,

    /// Profile id
    pub profile: u16,

    /// Cluster id
    pub cluster: u16,
}

/// Log severity, mapped onto the tracing levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Source of one log template argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogArg {
    /// Hex dump of the triggering message payload
    MessageBytes,

    /// A context variable by name
    Variable(String),

    /// A stored attribute by name
    Attribute(String),
}

/// Log action
#[derive(Debug, Clone, PartialEq)]
pub struct LogAction {
    /// Severity
    pub level: LogLevel,

    /// Template with `{}` placeholders filled from `args` in order
    pub template: String,

    /// Template argument sources
    pub args: Vec<LogArg>,
}

/// Builtin placeholder action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinAction {
    /// Builtin name, resolved off-hub
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orderable() {
        let send = Action::SendProtocol(SendProtocolAction {
            protocol: Protocol::Zigbee,
            payload: vec![0x01],
        });
        assert!(send.is_orderable());

        let nested = Action::Delay(DelayAction {
            duration: Duration::from_secs(1),
            actions: vec![send],
        });
        assert!(nested.is_orderable());

        assert!(!Action::Forward.is_orderable());
        assert!(!Action::Debug.is_orderable());
    }
}
