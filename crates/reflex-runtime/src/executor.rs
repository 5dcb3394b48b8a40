//! Reflex executor
//!
//! Runs a compiled driver against inbound traffic for one device. All
//! evaluation is synchronous and in-memory: matchers never block, effects
//! stage into the execution scope and flush at commit. The compiled
//! artifact is shared read-only; per-message state lives entirely in the
//! scope created for that message.

use std::sync::Arc;

use tracing::{debug, warn};

use reflex_automaton::MatchTrace;
use reflex_core::{DeviceContext, LifecycleEvent, PlatformMessage, Protocol, ProtocolMessage};
use reflex_model::{ReflexVersion, RunMode};

use crate::actions::ExecutionScope;
use crate::compiler::{CompiledDriver, LifecycleStep, PlatformMatcher, ProtocolMatcher};
use crate::matchers;
use crate::zigbee::ZclFrame;

/// Executor for one driver type
///
/// Cheap to clone per device; the compiled artifact behind the `Arc` is
/// immutable and lock-free to share across devices and threads.
#[derive(Clone)]
pub struct ReflexDriver {
    compiled: Arc<CompiledDriver>,
    debug: bool,
}

impl ReflexDriver {
    /// Create an executor over a compiled driver
    pub fn new(compiled: Arc<CompiledDriver>) -> Self {
        Self {
            compiled,
            debug: false,
        }
    }

    /// Enable diagnostic walks on failed matches
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// The compiled artifact this executor runs
    pub fn compiled(&self) -> &CompiledDriver {
        &self.compiled
    }

    /// Handle a raw protocol frame
    ///
    /// `supported` is the reflex version baseline already applied upstream:
    /// matchers and actions at or below it are skipped, because an earlier
    /// pass has run them. Returns whether the message was handled locally;
    /// an unhandled message is forwarded to the platform.
    pub fn handle_protocol(
        &self,
        device: &mut dyn DeviceContext,
        message: &ProtocolMessage,
        supported: ReflexVersion,
    ) -> bool {
        if self.compiled.run_mode == RunMode::Disabled {
            return false;
        }

        // nothing in this driver goes beyond what already ran
        if supported >= self.compiled.max_reflex_version {
            return false;
        }

        let mut scope = ExecutionScope::new(device, message.context.clone())
            .with_message_bytes(message.payload.clone());
        if self.compiled.run_mode == RunMode::Shadow {
            scope = scope.suppress_effects();
        }

        // discrete matchers need a parsed Zigbee frame; the automaton runs
        // on the raw bytes of either protocol family
        let frame = match message.protocol {
            Protocol::Zigbee => match ZclFrame::parse(&message.payload) {
                Ok(frame) => Some(frame),
                Err(error) => {
                    debug!(%error, "frame does not parse as ZCL, discrete matchers skipped");
                    None
                }
            },
            Protocol::Zwave => None,
        };

        for (index, matcher) in self.compiled.protocol_matchers.iter().enumerate() {
            match matcher {
                ProtocolMatcher::Discrete {
                    matcher,
                    actions,
                    required_version,
                } => {
                    if *required_version <= supported {
                        continue;
                    }
                    let Some(frame) = frame.as_ref() else {
                        continue;
                    };
                    match matchers::evaluate(matcher, frame, &mut scope) {
                        Ok(true) => {
                            scope.mark_handled();
                            scope.execute_all(actions, Some(supported));
                        }
                        Ok(false) => {
                            if self.debug {
                                debug!(
                                    index,
                                    matcher = ?matcher,
                                    frame = ?frame,
                                    "discrete matcher did not match"
                                );
                            }
                        }
                        Err(error) => {
                            // evaluation errors never abort sibling matchers
                            warn!(index, %error, "matcher evaluation failed, treated as no match");
                        }
                    }
                }

                ProtocolMatcher::Automaton {
                    automaton,
                    required_version,
                } => {
                    if *required_version <= supported {
                        continue;
                    }
                    if self.debug {
                        let mut trace = MatchTrace::default();
                        match automaton.matches_traced(&message.payload, &mut trace) {
                            Some(actions) => {
                                scope.mark_handled();
                                let actions = actions.clone();
                                scope.execute_all(&actions, Some(supported));
                            }
                            None => debug!(
                                matched_prefix = trace.matched_prefix,
                                failed_offset = ?trace.failed_offset,
                                failed_byte = ?trace.failed_byte,
                                expected = ?trace.expected,
                                "automaton did not match"
                            ),
                        }
                    } else if let Some(actions) = automaton.matches(&message.payload) {
                        scope.mark_handled();
                        let actions = actions.clone();
                        scope.execute_all(&actions, Some(supported));
                    }
                }
            }
        }

        scope.commit();
        scope.result()
    }

    /// Handle a structured platform message
    ///
    /// Platform messages have no notion of a partially-handled upstream
    /// pass, so a matched rule always executes its entire action list.
    /// Evaluation short-circuits at the first matching rule of the
    /// message's bucket.
    pub fn handle_platform(
        &self,
        device: &mut dyn DeviceContext,
        message: &PlatformMessage,
    ) -> bool {
        if self.compiled.run_mode == RunMode::Disabled {
            return false;
        }

        let Some(bucket) = self.compiled.platform_rules.get(&message.name) else {
            return false;
        };

        let mut scope = ExecutionScope::new(device, message.context.clone());
        if self.compiled.run_mode == RunMode::Shadow {
            scope = scope.suppress_effects();
        }

        for rule in bucket {
            if platform_rule_matches(&rule.matcher, message) {
                scope.mark_handled();
                scope.execute_all(&rule.actions, None);
                break;
            }
        }

        scope.commit();
        scope.result()
    }

    /// Run the lifecycle bucket for a device transition
    pub fn handle_lifecycle(&self, device: &mut dyn DeviceContext, event: LifecycleEvent) {
        if self.compiled.run_mode == RunMode::Disabled {
            return;
        }

        let steps = match event {
            LifecycleEvent::Added => &self.compiled.on_added,
            LifecycleEvent::Connected => &self.compiled.on_connected,
            LifecycleEvent::Disconnected => &self.compiled.on_disconnected,
            LifecycleEvent::Removed => &self.compiled.on_removed,
        };

        let mut scope = ExecutionScope::new(device, reflex_core::Context::new());
        if self.compiled.run_mode == RunMode::Shadow {
            scope = scope.suppress_effects();
        }

        for step in steps {
            match step {
                LifecycleStep::Action(action) => scope.execute(action),
                LifecycleStep::SchedulePoll(spec) => {
                    debug!(event = event.as_str(), interval = ?spec.interval, "registering poll");
                    scope.schedule_poll(spec.interval, spec.payloads.clone());
                }
            }
        }

        scope.commit();
    }
}

fn platform_rule_matches(matcher: &PlatformMatcher, message: &PlatformMessage) -> bool {
    match matcher {
        PlatformMatcher::Attribute(m) => {
            let name_matches = message
                .args
                .get(reflex_core::messages::ARG_NAME)
                .and_then(|v| v.as_str())
                == Some(m.name.as_str());
            let value_matches = message.args.get(reflex_core::messages::ARG_VALUE) == Some(&m.value);
            name_matches && value_matches
        }
        PlatformMatcher::Message(m) => m.name == message.name && m.args == message.args,
    }
}
