//! Matcher types
//!
//! Matchers are the preconditions of a reflex. Each inbound message kind is
//! served by its own matcher family; the compiler buckets them so the
//! executor only evaluates the matchers that can possibly apply.

use std::time::Duration;

use reflex_core::LifecycleEvent;

/// Which side of a Zigbee attribute exchange a matcher applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZigbeeSource {
    /// Read attributes responses only
    Read,
    /// Attribute reports only
    Report,
    /// Either
    Both,
}

/// Which IAS zone status carrier a matcher applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IasSource {
    /// Zone status attribute reports/reads
    Attribute,
    /// Zone status change notifications
    Notification,
    /// Either
    Both,
}

/// Rule precondition
///
/// Exactly one variant is active; equality is structural. `BytePattern`
/// exists only before compilation; the compiler lowers every byte pattern
/// of a driver into one shared automaton and never evaluates the variant
/// directly.
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    /// Device lifecycle transition
    Lifecycle(LifecycleEvent),

    /// Attribute-changed platform message with an expected value
    Attribute(AttributeMatcher),

    /// Exact platform message body
    PlatformMessage(PlatformMessageMatcher),

    /// Scheduled poll interval; lowered at compile time, never evaluated
    PollRate(PollRateMatcher),

    /// Zigbee attribute report / read response
    ZigbeeAttribute(ZigbeeAttributeMatcher),

    /// IAS zone status bits, by attribute or notification
    ZigbeeIasZoneStatus(ZigbeeIasZoneMatcher),

    /// AlertMe lifesign status bits
    AlertmeLifesign(AlertmeLifesignMatcher),

    /// Byte pattern source; compile-time only
    BytePattern(String),

    /// Matcher kind this engine version does not recognize
    ///
    /// Retained through decoding so the compiler can account for it
    /// (degraded driver) instead of dropping it silently.
    Unknown { kind: String },
}

/// Attribute-changed matcher
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeMatcher {
    /// Attribute name (e.g. "swit:state")
    pub name: String,

    /// Expected value
    pub value: serde_json::Value,
}

/// Exact platform message matcher
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformMessageMatcher {
    /// Message name
    pub name: String,

    /// Expected arguments, compared exactly
    pub args: serde_json::Map<String, serde_json::Value>,
}

/// Poll rate matcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRateMatcher {
    /// Interval between polls
    pub interval: Duration,
}

/// Zigbee attribute matcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZigbeeAttributeMatcher {
    /// Profile id (e.g. 0x0104 for Home Automation)
    pub profile: u16,

    /// Source endpoint
    pub endpoint: u8,

    /// Cluster id
    pub cluster: u16,

    /// Attribute id
    pub attribute: u16,

    /// Manufacturer code for manufacturer-specific frames
    pub manufacturer: Option<u16>,

    /// Frame-control bits that must all be set, beyond the defaults
    pub flags: Option<u8>,

    /// Expected raw attribute value; any value matches when absent
    pub value: Option<Vec<u8>>,

    /// Which exchange side to match
    pub source: ZigbeeSource,
}

/// IAS zone status matcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZigbeeIasZoneMatcher {
    /// Profile id
    pub profile: u16,

    /// Source endpoint
    pub endpoint: u8,

    /// Cluster id (0x0500 for IAS Zone)
    pub cluster: u16,

    /// Status bits that must be set
    pub set_mask: u16,

    /// Status bits that must be clear
    pub clear_mask: u16,

    /// Maximum accepted notification delay; older notifications are stale
    pub max_delay: Duration,

    /// Which status carrier to match
    pub source: IasSource,
}

/// AlertMe lifesign matcher
///
/// Matching also stages the decoded sensor readings (battery millivolts,
/// temperature, LQI) as context variables for the lifesign actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertmeLifesignMatcher {
    /// Profile id
    pub profile: u16,

    /// Source endpoint
    pub endpoint: u8,

    /// Cluster id
    pub cluster: u16,

    /// Status bits that must be set
    pub set_mask: u8,

    /// Status bits that must be clear
    pub clear_mask: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        let a = Matcher::Attribute(AttributeMatcher {
            name: "swit:state".to_string(),
            value: serde_json::json!("ON"),
        });
        let b = Matcher::Attribute(AttributeMatcher {
            name: "swit:state".to_string(),
            value: serde_json::json!("ON"),
        });
        let c = Matcher::Attribute(AttributeMatcher {
            name: "swit:state".to_string(),
            value: serde_json::json!("OFF"),
        });

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
