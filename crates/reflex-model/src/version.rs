//! Reflex version gating
//!
//! Every matcher and action variant has a fixed minimum runtime version.
//! The hub advertises the maximum version it supports; a driver whose
//! artifact needs more than that runs partially and forwards the rest
//! upstream. The tables here are append-only: new variants take the next
//! version, existing entries never change.

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::matcher::Matcher;

/// Monotonic runtime capability level
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ReflexVersion(pub u32);

/// Highest version this engine implements
pub const CURRENT_VERSION: ReflexVersion = ReflexVersion(5);

impl ReflexVersion {
    /// Version zero: no reflex pass has run yet
    ///
    /// Every real variant requires at least version 1, so a dispatch with
    /// version zero evaluates everything.
    pub const BASE: ReflexVersion = ReflexVersion(0);
}

impl std::fmt::Display for ReflexVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Matcher {
    /// Minimum runtime version able to evaluate this matcher
    ///
    /// Unknown kinds report [`CURRENT_VERSION`]: the authoring side knew
    /// something this runtime does not, so the rule is treated as beyond
    /// local capability (and the compiler flags the driver degraded).
    pub fn required_version(&self) -> ReflexVersion {
        match self {
            Matcher::Lifecycle(_) | Matcher::Attribute(_) | Matcher::PlatformMessage(_) => {
                ReflexVersion(1)
            }
            Matcher::PollRate(_) => ReflexVersion(2),
            Matcher::ZigbeeAttribute(_) | Matcher::ZigbeeIasZoneStatus(_) => ReflexVersion(3),
            Matcher::AlertmeLifesign(_) => ReflexVersion(4),
            Matcher::BytePattern(_) => ReflexVersion(5),
            Matcher::Unknown { .. } => CURRENT_VERSION,
        }
    }
}

impl Action {
    /// Minimum runtime version able to execute this action
    ///
    /// Composite wrappers require the maximum of their own base version and
    /// every sub-action's.
    pub fn required_version(&self) -> ReflexVersion {
        match self {
            Action::SendProtocol(_)
            | Action::SendPlatform(_)
            | Action::SetAttribute(_)
            | Action::Forward
            | Action::Log(_)
            | Action::Debug => ReflexVersion(1),

            Action::SetAttributeNoStore(_) => ReflexVersion(2),

            Action::Ordered(ordered) => compound_version(ReflexVersion(2), &ordered.actions),
            Action::Delay(delay) => compound_version(ReflexVersion(2), &delay.actions),

            Action::ZigbeeIasZoneEnroll(_) => ReflexVersion(3),
            Action::AlertmeLifesign(_) => ReflexVersion(4),

            Action::Builtin(_) | Action::Unknown { .. } => CURRENT_VERSION,
        }
    }
}

fn compound_version(base: ReflexVersion, actions: &[Action]) -> ReflexVersion {
    actions
        .iter()
        .map(Action::required_version)
        .fold(base, std::cmp::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{DelayAction, OrderedAction, SendProtocolAction, SetAttributeAction};
    use reflex_core::Protocol;
    use std::time::Duration;

    fn send() -> Action {
        Action::SendProtocol(SendProtocolAction {
            protocol: Protocol::Zigbee,
            payload: vec![0x00],
        })
    }

    #[test]
    fn test_composite_takes_max_of_subactions() {
        let plain = Action::Ordered(OrderedAction {
            actions: vec![send(), send()],
        });
        assert_eq!(plain.required_version(), ReflexVersion(2));

        let nested = Action::Delay(DelayAction {
            duration: Duration::from_secs(2),
            actions: vec![Action::Unknown {
                kind: "XX".to_string(),
            }],
        });
        assert_eq!(nested.required_version(), CURRENT_VERSION);
    }

    #[test]
    fn test_no_store_above_store() {
        let stored = Action::SetAttribute(SetAttributeAction {
            name: "a".to_string(),
            value: serde_json::json!(1),
        });
        let transient = Action::SetAttributeNoStore(SetAttributeAction {
            name: "a".to_string(),
            value: serde_json::json!(1),
        });
        assert!(transient.required_version() > stored.required_version());
    }

    #[test]
    fn test_unknown_matcher_is_current() {
        let unknown = Matcher::Unknown {
            kind: "ZQ".to_string(),
        };
        assert_eq!(unknown.required_version(), CURRENT_VERSION);
    }
}
