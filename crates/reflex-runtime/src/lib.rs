//! Reflex compiler and executor
//!
//! This crate turns authored driver definitions into their runtime form
//! and evaluates device traffic against them, entirely on-hub.
//!
//! # Architecture
//!
//! ```text
//! DriverDefinition → compile() → CompiledDriver → ReflexDriver
//! ```
//!
//! - **Compiler**: buckets matchers by trigger class and unions all byte
//!   patterns into one trailing automaton ([`compile`])
//! - **Executor**: evaluates protocol frames and platform messages with
//!   reflex-version gating ([`ReflexDriver`])
//! - **Registry**: atomic publish/lookup of compiled artifacts
//!   ([`DriverRegistry`])
//!
//! Compilation runs once per driver load; the compiled artifact is
//! immutable and shared read-only across every device of the driver type.
//! Message evaluation for one device is synchronous and never blocks.

pub mod actions;
pub mod compiler;
pub mod executor;
pub mod matchers;
pub mod registry;
pub mod testing;
pub mod zigbee;

pub use actions::{ExecutionScope, ATTR_BATTERY, ATTR_SIGNAL, ATTR_TEMPERATURE};
pub use compiler::{
    compile, CompiledDriver, DiscreteMatcher, LifecycleStep, PlatformMatcher, PlatformRule,
    PollSpec, ProtocolMatcher,
};
pub use executor::ReflexDriver;
pub use registry::DriverRegistry;
pub use zigbee::{ZclFrame, ZigbeeError, ZigbeeResult};
