//! Core types for the hub reflex engine
//!
//! This crate provides the fundamental types shared by the reflex compiler
//! and executor: protocol and platform messages, device lifecycle events,
//! the causality Context, and the DeviceContext collaborator trait through
//! which the engine reaches the rest of the hub.

mod context;
mod device;
mod message;

pub use context::Context;
pub use device::DeviceContext;
pub use message::{LifecycleEvent, PlatformMessage, Protocol, ProtocolMessage};

/// Well-known platform message names consumed and produced by the engine
pub mod messages {
    /// Fired by the platform when a device attribute changed
    pub const ATTRIBUTE_CHANGED: &str = "attribute_changed";

    /// Emitted by the executor with the batched attribute writes of one
    /// handling pass
    pub const SET_ATTRIBUTES: &str = "set_attributes";

    /// Argument key for an attribute name
    pub const ARG_NAME: &str = "name";

    /// Argument key for an attribute value
    pub const ARG_VALUE: &str = "value";

    /// Argument key for the attribute map of a SET_ATTRIBUTES message
    pub const ARG_ATTRIBUTES: &str = "attributes";

    /// Argument key marking attributes that are emitted but not stored
    pub const ARG_TRANSIENT: &str = "transient";
}
