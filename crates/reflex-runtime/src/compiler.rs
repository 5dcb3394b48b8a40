//! Rule compiler
//!
//! Lowers a driver definition into the runtime representation the executor
//! evaluates: lifecycle step lists, platform rules bucketed by message
//! name, discrete protocol matchers in rule order, and at most one byte
//! automaton appended as the trailing protocol matcher.
//!
//! Compilation runs once per driver load, single-threaded, and never
//! fails: anything that cannot be lowered drops out with a warning and the
//! driver is marked degraded instead.

use std::time::Duration;

use indexmap::IndexMap;
use tracing::warn;

use reflex_automaton::{AutomatonBuilder, ByteAutomaton};
use reflex_core::{LifecycleEvent, Protocol};
use reflex_model::{
    Action, AlertmeLifesignMatcher, AttributeMatcher, DriverDefinition, Matcher,
    PlatformMessageMatcher, ReflexVersion, RunMode, ZigbeeAttributeMatcher, ZigbeeIasZoneMatcher,
};

/// One step of a lifecycle bucket
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleStep {
    /// Execute an authored action
    Action(Action),

    /// Register a poll with the scheduler (lowered from a PollRate rule)
    SchedulePoll(PollSpec),
}

/// Lowered poll registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSpec {
    /// Interval between polls
    pub interval: Duration,

    /// Raw frames to resend, one per protocol send in the source rule
    pub payloads: Vec<(Protocol, Vec<u8>)>,
}

/// Matcher half of a platform-message rule
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformMatcher {
    /// Attribute-changed equality
    Attribute(AttributeMatcher),

    /// Exact message body equality
    Message(PlatformMessageMatcher),
}

/// One compiled platform rule within a message-name bucket
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformRule {
    pub matcher: PlatformMatcher,
    pub actions: Vec<Action>,
}

/// Discrete protocol matcher kinds
#[derive(Debug, Clone, PartialEq)]
pub enum DiscreteMatcher {
    ZigbeeAttribute(ZigbeeAttributeMatcher),
    ZigbeeIasZone(ZigbeeIasZoneMatcher),
    AlertmeLifesign(AlertmeLifesignMatcher),
}

/// One compiled protocol matcher, in rule order
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolMatcher {
    /// Discrete matcher with its rule's actions
    Discrete {
        matcher: DiscreteMatcher,
        actions: Vec<Action>,
        required_version: ReflexVersion,
    },

    /// The trailing byte automaton; accept values carry the actions
    Automaton {
        automaton: ByteAutomaton<Vec<Action>>,
        required_version: ReflexVersion,
    },
}

/// The published runtime artifact
///
/// Immutable once compiled; shared read-only across every device of the
/// driver type and replaced wholesale on upgrade.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledDriver {
    pub name: String,
    pub version: String,
    pub hash: String,
    pub offline_timeout: Duration,
    pub run_mode: RunMode,
    pub capabilities: Vec<String>,

    pub on_added: Vec<LifecycleStep>,
    pub on_connected: Vec<LifecycleStep>,
    pub on_disconnected: Vec<LifecycleStep>,
    pub on_removed: Vec<LifecycleStep>,

    /// Platform rules keyed by message name, rule order within a key
    pub platform_rules: IndexMap<String, Vec<PlatformRule>>,

    /// Discrete matchers in rule order, automaton last
    pub protocol_matchers: Vec<ProtocolMatcher>,

    /// Highest version any matcher or action of this driver requires
    pub max_reflex_version: ReflexVersion,

    /// Whether some authored behavior could not be lowered
    ///
    /// A degraded driver still loads and runs what it can; the flag is the
    /// only externally visible signal that something was dropped.
    pub degraded: bool,
}

/// Version and degradation accumulator threaded through the pass
#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    max_version: ReflexVersion,
    degraded: bool,
}

impl Accumulator {
    fn observe(&mut self, version: ReflexVersion) {
        self.max_version = self.max_version.max(version);
    }

    fn degrade(&mut self) {
        self.degraded = true;
    }
}

/// Compile a driver definition into its runtime representation
pub fn compile(definition: &DriverDefinition) -> CompiledDriver {
    let mut acc = Accumulator::default();

    let mut on_added = Vec::new();
    let mut on_connected = Vec::new();
    let mut on_disconnected = Vec::new();
    let mut on_removed = Vec::new();
    let mut platform_rules: IndexMap<String, Vec<PlatformRule>> = IndexMap::new();
    let mut protocol_matchers = Vec::new();
    let mut patterns: Vec<(String, Vec<Action>)> = Vec::new();
    let mut pattern_version = ReflexVersion::BASE;

    for rule in &definition.rules {
        // rules without effects are pruned outright
        if rule.actions.is_empty() {
            continue;
        }

        for action in &rule.actions {
            acc.observe(action.required_version());
            check_composite(action, definition, &mut acc);
            if matches!(action, Action::Unknown { .. }) {
                warn!(
                    driver = %definition.name,
                    "unrecognized action kind, driver degraded"
                );
                acc.degrade();
            }
        }

        for matcher in &rule.matchers {
            acc.observe(matcher.required_version());

            match matcher {
                Matcher::Lifecycle(event) => {
                    let bucket = match event {
                        LifecycleEvent::Added => &mut on_added,
                        LifecycleEvent::Connected => &mut on_connected,
                        LifecycleEvent::Disconnected => &mut on_disconnected,
                        LifecycleEvent::Removed => &mut on_removed,
                    };
                    bucket.extend(rule.actions.iter().cloned().map(LifecycleStep::Action));
                }

                Matcher::PollRate(poll) => {
                    let spec = lower_poll(poll.interval, &rule.actions, definition, &mut acc);
                    on_connected.push(LifecycleStep::SchedulePoll(spec));
                }

                Matcher::Attribute(m) => {
                    platform_rules
                        .entry(reflex_core::messages::ATTRIBUTE_CHANGED.to_string())
                        .or_default()
                        .push(PlatformRule {
                            matcher: PlatformMatcher::Attribute(m.clone()),
                            actions: rule.actions.clone(),
                        });
                }

                Matcher::PlatformMessage(m) => {
                    platform_rules
                        .entry(m.name.clone())
                        .or_default()
                        .push(PlatformRule {
                            matcher: PlatformMatcher::Message(m.clone()),
                            actions: rule.actions.clone(),
                        });
                }

                Matcher::ZigbeeAttribute(m) => protocol_matchers.push(ProtocolMatcher::Discrete {
                    matcher: DiscreteMatcher::ZigbeeAttribute(m.clone()),
                    actions: rule.actions.clone(),
                    required_version: matcher.required_version(),
                }),

                Matcher::ZigbeeIasZoneStatus(m) => {
                    protocol_matchers.push(ProtocolMatcher::Discrete {
                        matcher: DiscreteMatcher::ZigbeeIasZone(m.clone()),
                        actions: rule.actions.clone(),
                        required_version: matcher.required_version(),
                    })
                }

                Matcher::AlertmeLifesign(m) => protocol_matchers.push(ProtocolMatcher::Discrete {
                    matcher: DiscreteMatcher::AlertmeLifesign(m.clone()),
                    actions: rule.actions.clone(),
                    required_version: matcher.required_version(),
                }),

                Matcher::BytePattern(source) => {
                    pattern_version = pattern_version.max(matcher.required_version());
                    patterns.push((source.clone(), rule.actions.clone()));
                }

                Matcher::Unknown { kind } => {
                    warn!(
                        driver = %definition.name,
                        kind = %kind,
                        "unrecognized matcher kind, rule contributes no runtime matcher"
                    );
                    acc.degrade();
                }
            }
        }
    }

    // all byte patterns of the driver union into one trailing automaton
    let automaton = if patterns.is_empty() {
        definition.automaton.clone()
    } else {
        let mut builder = AutomatonBuilder::new();
        for (source, actions) in patterns {
            if let Err(error) = builder.add_pattern(&source, actions) {
                warn!(
                    driver = %definition.name,
                    pattern = %source,
                    %error,
                    "byte pattern rejected, rule dropped"
                );
                acc.degrade();
            }
        }
        (!builder.is_empty()).then(|| builder.build(merge_actions))
    };

    if let Some(automaton) = automaton {
        pattern_version = pattern_version
            .max(Matcher::BytePattern(String::new()).required_version());
        protocol_matchers.push(ProtocolMatcher::Automaton {
            automaton,
            required_version: pattern_version,
        });
        acc.observe(pattern_version);
    }

    CompiledDriver {
        name: definition.name.clone(),
        version: definition.version.clone(),
        hash: definition.hash.clone(),
        offline_timeout: definition.offline_timeout,
        run_mode: definition.run_mode,
        capabilities: definition.capabilities.clone(),
        on_added,
        on_connected,
        on_disconnected,
        on_removed,
        platform_rules,
        protocol_matchers,
        max_reflex_version: acc.max_version,
        degraded: acc.degraded,
    }
}

fn merge_actions(values: &[&Vec<Action>]) -> Vec<Action> {
    values.iter().flat_map(|v| v.iter().cloned()).collect()
}

/// Poll rules may only send protocol frames; anything else is a degraded
/// configuration, kept out of the schedule with a warning.
fn lower_poll(
    interval: Duration,
    actions: &[Action],
    definition: &DriverDefinition,
    acc: &mut Accumulator,
) -> PollSpec {
    let mut payloads = Vec::new();
    for action in actions {
        match action {
            Action::SendProtocol(send) => {
                payloads.push((send.protocol, send.payload.clone()));
            }
            other => {
                warn!(
                    driver = %definition.name,
                    action = ?action_kind(other),
                    "poll rule contains a non-protocol action, ignored"
                );
                acc.degrade();
            }
        }
    }
    PollSpec { interval, payloads }
}

/// Ordered and Delay wrappers may only carry orderable sub-actions.
fn check_composite(action: &Action, definition: &DriverDefinition, acc: &mut Accumulator) {
    let sub_actions = match action {
        Action::Ordered(ordered) => &ordered.actions,
        Action::Delay(delay) => &delay.actions,
        _ => return,
    };
    for sub in sub_actions {
        if !sub.is_orderable() {
            warn!(
                driver = %definition.name,
                action = ?action_kind(sub),
                "non-orderable action inside an ordered/delay wrapper"
            );
            acc.degrade();
        }
        check_composite(sub, definition, acc);
    }
}

fn action_kind(action: &Action) -> &'static str {
    match action {
        Action::SendProtocol(_) => "send_protocol",
        Action::SendPlatform(_) => "send_platform",
        Action::SetAttribute(_) => "set_attribute",
        Action::SetAttributeNoStore(_) => "set_attribute_no_store",
        Action::Ordered(_) => "ordered",
        Action::Delay(_) => "delay",
        Action::AlertmeLifesign(_) => "alertme_lifesign",
        Action::ZigbeeIasZoneEnroll(_) => "zigbee_ias_zone_enroll",
        Action::Log(_) => "log",
        Action::Forward => "forward",
        Action::Debug => "debug",
        Action::Builtin(_) => "builtin",
        Action::Unknown { .. } => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflex_model::{
        PollRateMatcher, Rule, SendProtocolAction, SetAttributeAction, ZigbeeSource,
    };
    use serde_json::json;

    fn set_attr(name: &str) -> Action {
        Action::SetAttribute(SetAttributeAction {
            name: name.to_string(),
            value: json!("ON"),
        })
    }

    fn send(payload: &[u8]) -> Action {
        Action::SendProtocol(SendProtocolAction {
            protocol: Protocol::Zigbee,
            payload: payload.to_vec(),
        })
    }

    fn definition(rules: Vec<Rule>) -> DriverDefinition {
        DriverDefinition {
            rules,
            ..DriverDefinition::new("test-driver", "1.0.0", "h")
        }
    }

    #[test]
    fn test_empty_action_rules_pruned() {
        let compiled = compile(&definition(vec![Rule {
            matchers: vec![Matcher::Lifecycle(LifecycleEvent::Connected)],
            actions: vec![],
        }]));

        assert!(compiled.on_connected.is_empty());
        assert!(!compiled.degraded);
        assert_eq!(compiled.max_reflex_version, ReflexVersion::BASE);
    }

    #[test]
    fn test_lifecycle_bucketing_preserves_rule_order() {
        let compiled = compile(&definition(vec![
            Rule {
                matchers: vec![Matcher::Lifecycle(LifecycleEvent::Connected)],
                actions: vec![set_attr("first")],
            },
            Rule {
                matchers: vec![Matcher::Lifecycle(LifecycleEvent::Connected)],
                actions: vec![set_attr("second")],
            },
        ]));

        assert_eq!(compiled.on_connected.len(), 2);
        assert!(
            matches!(&compiled.on_connected[0], LifecycleStep::Action(Action::SetAttribute(a)) if a.name == "first")
        );
    }

    #[test]
    fn test_poll_rule_lowered_to_connected() {
        let compiled = compile(&definition(vec![Rule {
            matchers: vec![Matcher::PollRate(PollRateMatcher {
                interval: Duration::from_secs(60),
            })],
            actions: vec![send(&[0x01, 0x02])],
        }]));

        assert_eq!(compiled.on_connected.len(), 1);
        match &compiled.on_connected[0] {
            LifecycleStep::SchedulePoll(spec) => {
                assert_eq!(spec.interval, Duration::from_secs(60));
                assert_eq!(spec.payloads, vec![(Protocol::Zigbee, vec![0x01, 0x02])]);
            }
            other => panic!("Expected SchedulePoll, got {other:?}"),
        }
        assert!(!compiled.degraded);
    }

    #[test]
    fn test_poll_rule_with_foreign_action_degrades() {
        let compiled = compile(&definition(vec![Rule {
            matchers: vec![Matcher::PollRate(PollRateMatcher {
                interval: Duration::from_secs(60),
            })],
            actions: vec![send(&[0x01]), set_attr("x")],
        }]));

        assert!(compiled.degraded);
        match &compiled.on_connected[0] {
            LifecycleStep::SchedulePoll(spec) => assert_eq!(spec.payloads.len(), 1),
            other => panic!("Expected SchedulePoll, got {other:?}"),
        }
    }

    #[test]
    fn test_patterns_union_into_trailing_automaton() {
        let compiled = compile(&definition(vec![
            Rule {
                matchers: vec![Matcher::ZigbeeAttribute(ZigbeeAttributeMatcher {
                    profile: 0x0104,
                    endpoint: 1,
                    cluster: 6,
                    attribute: 0,
                    manufacturer: None,
                    flags: None,
                    value: None,
                    source: ZigbeeSource::Report,
                })],
                actions: vec![set_attr("a")],
            },
            Rule {
                matchers: vec![Matcher::BytePattern("01 02 .*".to_string())],
                actions: vec![set_attr("b")],
            },
            Rule {
                matchers: vec![Matcher::BytePattern("01 03 .*".to_string())],
                actions: vec![set_attr("c")],
            },
        ]));

        assert_eq!(compiled.protocol_matchers.len(), 2);
        assert!(matches!(
            compiled.protocol_matchers[0],
            ProtocolMatcher::Discrete { .. }
        ));
        match &compiled.protocol_matchers[1] {
            ProtocolMatcher::Automaton { automaton, .. } => {
                assert!(automaton.matches(&[0x01, 0x02, 0xAA]).is_some());
                assert!(automaton.matches(&[0x01, 0x04]).is_none());
            }
            other => panic!("Expected Automaton, got {other:?}"),
        }
        assert_eq!(compiled.max_reflex_version, ReflexVersion(5));
    }

    #[test]
    fn test_malformed_pattern_drops_rule_and_degrades() {
        let compiled = compile(&definition(vec![
            Rule {
                matchers: vec![Matcher::BytePattern("01 02".to_string())],
                actions: vec![set_attr("good")],
            },
            Rule {
                matchers: vec![Matcher::BytePattern("((".to_string())],
                actions: vec![set_attr("bad")],
            },
        ]));

        assert!(compiled.degraded);
        match compiled.protocol_matchers.last() {
            Some(ProtocolMatcher::Automaton { automaton, .. }) => {
                assert!(automaton.matches(&[0x01, 0x02]).is_some());
            }
            other => panic!("Expected Automaton, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_matcher_degrades_without_runtime_effect() {
        let compiled = compile(&definition(vec![Rule {
            matchers: vec![Matcher::Unknown {
                kind: "QQ".to_string(),
            }],
            actions: vec![set_attr("x")],
        }]));

        assert!(compiled.degraded);
        assert!(compiled.protocol_matchers.is_empty());
        assert!(compiled.platform_rules.is_empty());
        assert_eq!(compiled.max_reflex_version, reflex_model::CURRENT_VERSION);
    }

    #[test]
    fn test_platform_rules_bucketed_by_message_name() {
        let compiled = compile(&definition(vec![
            Rule {
                matchers: vec![Matcher::Attribute(AttributeMatcher {
                    name: "swit:state".to_string(),
                    value: json!("ON"),
                })],
                actions: vec![send(&[0x01])],
            },
            Rule {
                matchers: vec![Matcher::PlatformMessage(PlatformMessageMatcher {
                    name: "refresh".to_string(),
                    args: serde_json::Map::new(),
                })],
                actions: vec![send(&[0x02])],
            },
        ]));

        assert_eq!(compiled.platform_rules.len(), 2);
        assert!(compiled
            .platform_rules
            .contains_key(reflex_core::messages::ATTRIBUTE_CHANGED));
        assert!(compiled.platform_rules.contains_key("refresh"));
    }
}
