//! Rule and driver definition model
//!
//! A reflex is a rule: a list of matchers (preconditions) and a list of
//! actions (effects). Rules group into a DriverDefinition, one per device
//! driver, versioned and content-hashed. Definitions are produced by the
//! driver toolchain, persisted through the [`codec`] module, compiled once
//! at load time, and replaced wholesale on driver upgrade.
//!
//! # Key Types
//!
//! - [`Matcher`] - Precondition evaluated against an inbound message
//! - [`Action`] - Effect executed when a rule matches
//! - [`Rule`] / [`DriverDefinition`] - The authored artifact
//! - [`ReflexVersion`] - Capability level gating what runs locally

pub mod action;
pub mod codec;
pub mod driver;
pub mod matcher;
pub mod version;

pub use action::{
    Action, AlertmeLifesignAction, BuiltinAction, Calibration, DelayAction, IasZoneEnrollAction,
    LifesignKind, LogAction, LogArg, LogLevel, OrderedAction, SendPlatformAction,
    SendProtocolAction, SetAttributeAction,
};
pub use codec::{CodecError, CodecResult};
pub use driver::{DriverDefinition, Rule, RunMode};
pub use matcher::{
    AlertmeLifesignMatcher, AttributeMatcher, IasSource, Matcher, PlatformMessageMatcher,
    PollRateMatcher, ZigbeeAttributeMatcher, ZigbeeIasZoneMatcher, ZigbeeSource,
};
pub use version::{ReflexVersion, CURRENT_VERSION};
