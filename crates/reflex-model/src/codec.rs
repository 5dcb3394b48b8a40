//! Persistence codec
//!
//! Deterministic JSON encoding of driver definitions and their compiled
//! automata, versioned by a top-level `fmt` integer for forward
//! compatibility. Field names are compact one- and two-letter keys; binary
//! payloads travel base64-encoded; durations are nanoseconds.
//!
//! Unrecognized matcher and action discriminants decode into the model's
//! `Unknown` variants rather than failing, so an older hub loads a newer
//! definition degraded instead of rejecting it outright.

use std::collections::HashMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

use reflex_automaton::{
    AutomatonState, ByteAutomaton, StateKind, StructuralError, TransitionTable,
};
use reflex_core::{LifecycleEvent, Protocol};

use crate::action::{
    Action, AlertmeLifesignAction, BuiltinAction, Calibration, DelayAction, IasZoneEnrollAction,
    LifesignKind, LogAction, LogArg, LogLevel, OrderedAction, SendPlatformAction,
    SendProtocolAction, SetAttributeAction,
};
use crate::driver::{DriverDefinition, Rule, RunMode};
use crate::matcher::{
    AlertmeLifesignMatcher, AttributeMatcher, IasSource, Matcher, PlatformMessageMatcher,
    PollRateMatcher, ZigbeeAttributeMatcher, ZigbeeIasZoneMatcher, ZigbeeSource,
};

/// Current persisted format version
pub const FORMAT_VERSION: u64 = 1;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported format version {0}")]
    UnsupportedFormat(u64),

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("invalid base64 in field {field}: {source}")]
    Base64 {
        field: &'static str,
        source: base64::DecodeError,
    },

    #[error("byte-pattern matchers must be compiled into the automaton before encoding")]
    UncompiledPattern,

    #[error("unknown automaton state name {0:?}")]
    UnknownStateName(String),

    #[error(transparent)]
    Structural(#[from] StructuralError),
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Encode a driver definition to its persisted JSON text
pub fn encode(driver: &DriverDefinition) -> CodecResult<String> {
    Ok(serde_json::to_string(&encode_value(driver)?)?)
}

/// Encode a driver definition to a JSON value
pub fn encode_value(driver: &DriverDefinition) -> CodecResult<Value> {
    let mut root = Map::new();
    root.insert("fmt".into(), json!(FORMAT_VERSION));
    root.insert("n".into(), json!(driver.name));
    root.insert("v".into(), json!(driver.version));
    root.insert("h".into(), json!(driver.hash));
    root.insert(
        "o".into(),
        json!(duration_nanos(driver.offline_timeout, "o")?),
    );
    root.insert("m".into(), json!(driver.run_mode.as_str()));
    root.insert("c".into(), json!(driver.capabilities));

    let rules: Vec<Value> = driver
        .rules
        .iter()
        .map(encode_rule)
        .collect::<CodecResult<_>>()?;
    root.insert("r".into(), Value::Array(rules));

    if let Some(automaton) = &driver.automaton {
        root.insert("d".into(), encode_automaton(automaton)?);
    }

    Ok(Value::Object(root))
}

/// Decode a driver definition from its persisted JSON text
pub fn decode(text: &str) -> CodecResult<DriverDefinition> {
    decode_value(&serde_json::from_str(text)?)
}

/// Decode a driver definition from a JSON value
pub fn decode_value(value: &Value) -> CodecResult<DriverDefinition> {
    let root = as_object(value, "driver")?;

    let fmt = req_u64(root, "fmt")?;
    if fmt != FORMAT_VERSION {
        return Err(CodecError::UnsupportedFormat(fmt));
    }

    let rules = req(root, "r")?
        .as_array()
        .ok_or_else(|| invalid("r", "expected an array"))?
        .iter()
        .map(decode_rule)
        .collect::<CodecResult<Vec<Rule>>>()?;

    let automaton = match root.get("d") {
        Some(d) => Some(decode_automaton(d)?),
        None => None,
    };

    Ok(DriverDefinition {
        name: req_str(root, "n")?.to_string(),
        version: req_str(root, "v")?.to_string(),
        hash: req_str(root, "h")?.to_string(),
        offline_timeout: Duration::from_nanos(req_u64(root, "o")?),
        run_mode: decode_run_mode(req_str(root, "m")?)?,
        capabilities: req(root, "c")?
            .as_array()
            .ok_or_else(|| invalid("c", "expected an array"))?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid("c", "expected strings"))
            })
            .collect::<CodecResult<_>>()?,
        rules,
        automaton,
    })
}

// --- Rules ---

fn encode_rule(rule: &Rule) -> CodecResult<Value> {
    let matchers: Vec<Value> = rule
        .matchers
        .iter()
        .map(encode_matcher)
        .collect::<CodecResult<_>>()?;
    let actions: Vec<Value> = rule
        .actions
        .iter()
        .map(encode_action)
        .collect::<CodecResult<_>>()?;
    Ok(json!({ "m": matchers, "a": actions }))
}

fn decode_rule(value: &Value) -> CodecResult<Rule> {
    let rule = as_object(value, "rule")?;
    Ok(Rule {
        matchers: req(rule, "m")?
            .as_array()
            .ok_or_else(|| invalid("m", "expected an array"))?
            .iter()
            .map(decode_matcher)
            .collect::<CodecResult<_>>()?,
        actions: req(rule, "a")?
            .as_array()
            .ok_or_else(|| invalid("a", "expected an array"))?
            .iter()
            .map(decode_action)
            .collect::<CodecResult<_>>()?,
    })
}

// --- Matchers ---

fn encode_matcher(matcher: &Matcher) -> CodecResult<Value> {
    let value = match matcher {
        Matcher::Lifecycle(event) => json!({"t": "LC", "e": event.as_str()}),

        Matcher::Attribute(m) => json!({"t": "AT", "n": m.name, "v": m.value}),

        Matcher::PlatformMessage(m) => json!({"t": "MG", "n": m.name, "g": m.args}),

        Matcher::PollRate(m) => json!({"t": "PR", "i": duration_nanos(m.interval, "i")?}),

        Matcher::ZigbeeAttribute(m) => {
            let mut obj = Map::new();
            obj.insert("t".into(), json!("ZA"));
            obj.insert("p".into(), json!(m.profile));
            obj.insert("e".into(), json!(m.endpoint));
            obj.insert("c".into(), json!(m.cluster));
            obj.insert("a".into(), json!(m.attribute));
            if let Some(manufacturer) = m.manufacturer {
                obj.insert("m".into(), json!(manufacturer));
            }
            if let Some(flags) = m.flags {
                obj.insert("f".into(), json!(flags));
            }
            if let Some(value) = &m.value {
                obj.insert("v".into(), json!(BASE64.encode(value)));
            }
            obj.insert("s".into(), json!(zigbee_source_code(m.source)));
            Value::Object(obj)
        }

        Matcher::ZigbeeIasZoneStatus(m) => json!({
            "t": "ZZ",
            "p": m.profile,
            "e": m.endpoint,
            "c": m.cluster,
            "sm": m.set_mask,
            "cm": m.clear_mask,
            "d": duration_nanos(m.max_delay, "d")?,
            "s": ias_source_code(m.source),
        }),

        Matcher::AlertmeLifesign(m) => json!({
            "t": "AL",
            "p": m.profile,
            "e": m.endpoint,
            "c": m.cluster,
            "sm": m.set_mask,
            "cm": m.clear_mask,
        }),

        Matcher::BytePattern(_) => return Err(CodecError::UncompiledPattern),

        Matcher::Unknown { kind } => json!({"t": kind}),
    };
    Ok(value)
}

fn decode_matcher(value: &Value) -> CodecResult<Matcher> {
    let obj = as_object(value, "matcher")?;
    let tag = req_str(obj, "t")?;

    let matcher = match tag {
        "LC" => Matcher::Lifecycle(decode_lifecycle(req_str(obj, "e")?)?),

        "AT" => Matcher::Attribute(AttributeMatcher {
            name: req_str(obj, "n")?.to_string(),
            value: req(obj, "v")?.clone(),
        }),

        "MG" => Matcher::PlatformMessage(PlatformMessageMatcher {
            name: req_str(obj, "n")?.to_string(),
            args: req(obj, "g")?
                .as_object()
                .ok_or_else(|| invalid("g", "expected an object"))?
                .clone(),
        }),

        "PR" => Matcher::PollRate(PollRateMatcher {
            interval: Duration::from_nanos(req_u64(obj, "i")?),
        }),

        "ZA" => Matcher::ZigbeeAttribute(ZigbeeAttributeMatcher {
            profile: req_u16(obj, "p")?,
            endpoint: req_u8(obj, "e")?,
            cluster: req_u16(obj, "c")?,
            attribute: req_u16(obj, "a")?,
            manufacturer: opt_u16(obj, "m")?,
            flags: opt_u8(obj, "f")?,
            value: match obj.get("v") {
                Some(v) => Some(decode_base64(v, "v")?),
                None => None,
            },
            source: decode_zigbee_source(req_u64(obj, "s")?)?,
        }),

        "ZZ" => Matcher::ZigbeeIasZoneStatus(ZigbeeIasZoneMatcher {
            profile: req_u16(obj, "p")?,
            endpoint: req_u8(obj, "e")?,
            cluster: req_u16(obj, "c")?,
            set_mask: req_u16(obj, "sm")?,
            clear_mask: req_u16(obj, "cm")?,
            max_delay: Duration::from_nanos(req_u64(obj, "d")?),
            source: decode_ias_source(req_u64(obj, "s")?)?,
        }),

        "AL" => Matcher::AlertmeLifesign(AlertmeLifesignMatcher {
            profile: req_u16(obj, "p")?,
            endpoint: req_u8(obj, "e")?,
            cluster: req_u16(obj, "c")?,
            set_mask: req_u8(obj, "sm")?,
            clear_mask: req_u8(obj, "cm")?,
        }),

        other => {
            debug!(kind = other, "unrecognized matcher discriminant");
            Matcher::Unknown {
                kind: other.to_string(),
            }
        }
    };
    Ok(matcher)
}

// --- Actions ---

fn encode_action(action: &Action) -> CodecResult<Value> {
    let value = match action {
        Action::SendProtocol(a) => json!({
            "t": "PC",
            "p": a.protocol.as_str(),
            "b": BASE64.encode(&a.payload),
        }),

        Action::SendPlatform(a) => {
            let mut obj = Map::new();
            obj.insert("t".into(), json!("PL"));
            obj.insert("n".into(), json!(a.name));
            obj.insert("g".into(), json!(a.args));
            if a.response {
                obj.insert("r".into(), json!(true));
            }
            Value::Object(obj)
        }

        Action::SetAttribute(a) => json!({"t": "SA", "n": a.name, "v": a.value}),

        Action::SetAttributeNoStore(a) => {
            json!({"t": "SA", "n": a.name, "v": a.value, "st": false})
        }

        Action::Ordered(a) => {
            let actions: Vec<Value> = a
                .actions
                .iter()
                .map(encode_action)
                .collect::<CodecResult<_>>()?;
            json!({"t": "OR", "a": actions})
        }

        Action::Delay(a) => {
            let actions: Vec<Value> = a
                .actions
                .iter()
                .map(encode_action)
                .collect::<CodecResult<_>>()?;
            json!({"t": "DL", "d": duration_nanos(a.duration, "d")?, "a": actions})
        }

        Action::AlertmeLifesign(a) => {
            let mut obj = Map::new();
            obj.insert("t".into(), json!("AL"));
            obj.insert("k".into(), json!(lifesign_kind_str(a.kind)));
            if let Some(calibration) = a.calibration {
                obj.insert(
                    "c".into(),
                    json!({"m": calibration.minimum, "n": calibration.nominal}),
                );
            }
            Value::Object(obj)
        }

        Action::ZigbeeIasZoneEnroll(a) => json!({
            "t": "ZZ",
            "e": a.endpoint,
            "p": a.profile,
            "c": a.cluster,
        }),

        Action::Log(a) => {
            let args: Vec<Value> = a.args.iter().map(encode_log_arg).collect();
            json!({"t": "LG", "l": log_level_str(a.level), "m": a.template, "a": args})
        }

        Action::Forward => json!({"t": "FW"}),
        Action::Debug => json!({"t": "DB"}),
        Action::Builtin(a) => json!({"t": "BI", "n": a.name}),
        Action::Unknown { kind } => json!({"t": kind}),
    };
    Ok(value)
}

fn decode_action(value: &Value) -> CodecResult<Action> {
    let obj = as_object(value, "action")?;
    let tag = req_str(obj, "t")?;

    let action = match tag {
        "PC" => Action::SendProtocol(SendProtocolAction {
            protocol: decode_protocol(req_str(obj, "p")?)?,
            payload: decode_base64(req(obj, "b")?, "b")?,
        }),

        "PL" => Action::SendPlatform(SendPlatformAction {
            name: req_str(obj, "n")?.to_string(),
            args: req(obj, "g")?
                .as_object()
                .ok_or_else(|| invalid("g", "expected an object"))?
                .clone(),
            response: obj.get("r").and_then(Value::as_bool).unwrap_or(false),
        }),

        "SA" => {
            let inner = SetAttributeAction {
                name: req_str(obj, "n")?.to_string(),
                value: req(obj, "v")?.clone(),
            };
            if obj.get("st").and_then(Value::as_bool).unwrap_or(true) {
                Action::SetAttribute(inner)
            } else {
                Action::SetAttributeNoStore(inner)
            }
        }

        "OR" => Action::Ordered(OrderedAction {
            actions: decode_action_list(req(obj, "a")?)?,
        }),

        "DL" => Action::Delay(DelayAction {
            duration: Duration::from_nanos(req_u64(obj, "d")?),
            actions: decode_action_list(req(obj, "a")?)?,
        }),

        "AL" => Action::AlertmeLifesign(AlertmeLifesignAction {
            kind: decode_lifesign_kind(req_str(obj, "k")?)?,
            calibration: match obj.get("c") {
                Some(c) => {
                    let c = as_object(c, "c")?;
                    Some(Calibration {
                        minimum: req_i32(c, "m")?,
                        nominal: req_i32(c, "n")?,
                    })
                }
                None => None,
            },
        }),

        "ZZ" => Action::ZigbeeIasZoneEnroll(IasZoneEnrollAction {
            endpoint: req_u8(obj, "e")?,
            profile: req_u16(obj, "p")?,
            cluster: req_u16(obj, "c")?,
        }),

        "LG" => Action::Log(LogAction {
            level: decode_log_level(req_str(obj, "l")?)?,
            template: req_str(obj, "m")?.to_string(),
            args: req(obj, "a")?
                .as_array()
                .ok_or_else(|| invalid("a", "expected an array"))?
                .iter()
                .map(decode_log_arg)
                .collect::<CodecResult<_>>()?,
        }),

        "FW" => Action::Forward,
        "DB" => Action::Debug,
        "BI" => Action::Builtin(BuiltinAction {
            name: req_str(obj, "n")?.to_string(),
        }),

        other => {
            debug!(kind = other, "unrecognized action discriminant");
            Action::Unknown {
                kind: other.to_string(),
            }
        }
    };
    Ok(action)
}

fn decode_action_list(value: &Value) -> CodecResult<Vec<Action>> {
    value
        .as_array()
        .ok_or_else(|| invalid("a", "expected an array"))?
        .iter()
        .map(decode_action)
        .collect()
}

fn encode_log_arg(arg: &LogArg) -> Value {
    match arg {
        LogArg::MessageBytes => json!({"k": "msg"}),
        LogArg::Variable(name) => json!({"k": "var", "n": name}),
        LogArg::Attribute(name) => json!({"k": "attr", "n": name}),
    }
}

fn decode_log_arg(value: &Value) -> CodecResult<LogArg> {
    let obj = as_object(value, "log arg")?;
    match req_str(obj, "k")? {
        "msg" => Ok(LogArg::MessageBytes),
        "var" => Ok(LogArg::Variable(req_str(obj, "n")?.to_string())),
        "attr" => Ok(LogArg::Attribute(req_str(obj, "n")?.to_string())),
        other => Err(invalid("k", format!("unknown log arg kind {other:?}"))),
    }
}

// --- Automaton ---

fn state_name(kind: StateKind, index: usize) -> String {
    let prefix = match kind {
        StateKind::InitialFinal => "if",
        StateKind::Initial => "is",
        StateKind::Final => "fs",
        StateKind::Normal => "st",
    };
    format!("{prefix}{index}")
}

fn parse_state_name(name: &str) -> CodecResult<(StateKind, usize)> {
    let kind = match name.get(..2) {
        Some("if") => StateKind::InitialFinal,
        Some("is") => StateKind::Initial,
        Some("fs") => StateKind::Final,
        Some("st") => StateKind::Normal,
        _ => return Err(CodecError::UnknownStateName(name.to_string())),
    };
    let index = name[2..]
        .parse::<usize>()
        .map_err(|_| CodecError::UnknownStateName(name.to_string()))?;
    Ok((kind, index))
}

fn encode_automaton(automaton: &ByteAutomaton<Vec<Action>>) -> CodecResult<Value> {
    let names: Vec<String> = automaton
        .states()
        .iter()
        .enumerate()
        .map(|(index, state)| state_name(state.kind, index))
        .collect();

    let mut root = Map::new();
    for (index, state) in automaton.states().iter().enumerate() {
        let mut entry = Map::new();
        if !state.value.is_empty() {
            let actions: Vec<Value> = state
                .value
                .iter()
                .map(encode_action)
                .collect::<CodecResult<_>>()?;
            entry.insert("a".into(), Value::Array(actions));
        }
        if !state.table.is_empty() {
            entry.insert("t".into(), encode_table(&state.table, &names));
        }
        root.insert(names[index].clone(), Value::Object(entry));
    }
    Ok(Value::Object(root))
}

fn encode_table(table: &TransitionTable, names: &[String]) -> Value {
    match table {
        TransitionTable::Empty => Value::Null,
        TransitionTable::Singleton { byte, target } => {
            json!({"t": "SG", "b": byte, "s": names[*target]})
        }
        TransitionTable::Range { lo, hi, target } => {
            json!({"t": "RA", "l": lo, "h": hi, "s": names[*target]})
        }
        TransitionTable::All { target } => json!({"t": "AL", "s": names[*target]}),
        TransitionTable::Lookup { offset, targets } => {
            let slots: Vec<Value> = targets
                .iter()
                .map(|slot| match slot {
                    Some(target) => json!(names[*target]),
                    None => Value::Null,
                })
                .collect();
            json!({"t": "LU", "o": offset, "s": slots})
        }
        TransitionTable::Alternates { bounds, tables } => {
            let subs: Vec<Value> = tables.iter().map(|t| encode_table(t, names)).collect();
            json!({"t": "AT", "b": bounds, "x": subs})
        }
    }
}

fn decode_automaton(value: &Value) -> CodecResult<ByteAutomaton<Vec<Action>>> {
    let root = as_object(value, "d")?;

    let mut by_index: Vec<Option<(StateKind, &Map<String, Value>)>> = vec![None; root.len()];
    let mut names: HashMap<String, usize> = HashMap::new();

    for (name, entry) in root {
        let (kind, index) = parse_state_name(name)?;
        let slot = by_index
            .get_mut(index)
            .ok_or_else(|| invalid("d", format!("state index {index} out of range")))?;
        if slot.is_some() {
            return Err(invalid("d", format!("duplicate state index {index}")));
        }
        *slot = Some((kind, as_object(entry, "state")?));
        names.insert(name.clone(), index);
    }

    let mut states = Vec::with_capacity(by_index.len());
    for (index, slot) in by_index.into_iter().enumerate() {
        let (kind, entry) =
            slot.ok_or_else(|| invalid("d", format!("missing state index {index}")))?;

        let value = match entry.get("a") {
            Some(actions) => decode_action_list(actions)?,
            None => Vec::new(),
        };
        let table = match entry.get("t") {
            Some(t) if !t.is_null() => decode_table(t, &names)?,
            _ => TransitionTable::Empty,
        };
        states.push(AutomatonState { kind, value, table });
    }

    Ok(ByteAutomaton::from_states(states)?)
}

fn decode_table(value: &Value, names: &HashMap<String, usize>) -> CodecResult<TransitionTable> {
    let obj = as_object(value, "t")?;
    let table = match req_str(obj, "t")? {
        "SG" => TransitionTable::Singleton {
            byte: req_u8(obj, "b")?,
            target: resolve_state(obj, "s", names)?,
        },
        "RA" => TransitionTable::Range {
            lo: req_u8(obj, "l")?,
            hi: req_u8(obj, "h")?,
            target: resolve_state(obj, "s", names)?,
        },
        "AL" => TransitionTable::All {
            target: resolve_state(obj, "s", names)?,
        },
        "LU" => TransitionTable::Lookup {
            offset: req_u8(obj, "o")?,
            targets: req(obj, "s")?
                .as_array()
                .ok_or_else(|| invalid("s", "expected an array"))?
                .iter()
                .map(|slot| match slot {
                    Value::Null => Ok(None),
                    Value::String(name) => Ok(Some(lookup_state(name, names)?)),
                    _ => Err(invalid("s", "expected state names or nulls")),
                })
                .collect::<CodecResult<_>>()?,
        },
        "AT" => TransitionTable::Alternates {
            bounds: req(obj, "b")?
                .as_array()
                .ok_or_else(|| invalid("b", "expected an array"))?
                .iter()
                .map(|b| {
                    u8_from(b.as_u64().ok_or_else(|| invalid("b", "expected bytes"))?, "b")
                })
                .collect::<CodecResult<_>>()?,
            tables: req(obj, "x")?
                .as_array()
                .ok_or_else(|| invalid("x", "expected an array"))?
                .iter()
                .map(|sub| match sub {
                    Value::Null => Ok(TransitionTable::Empty),
                    other => decode_table(other, names),
                })
                .collect::<CodecResult<_>>()?,
        },
        other => return Err(invalid("t", format!("unknown table discriminant {other:?}"))),
    };
    Ok(table)
}

fn resolve_state(
    obj: &Map<String, Value>,
    key: &'static str,
    names: &HashMap<String, usize>,
) -> CodecResult<usize> {
    lookup_state(req_str(obj, key)?, names)
}

fn lookup_state(name: &str, names: &HashMap<String, usize>) -> CodecResult<usize> {
    names
        .get(name)
        .copied()
        .ok_or_else(|| CodecError::UnknownStateName(name.to_string()))
}

// --- Enums on the wire ---

fn decode_lifecycle(value: &str) -> CodecResult<LifecycleEvent> {
    match value {
        "added" => Ok(LifecycleEvent::Added),
        "connected" => Ok(LifecycleEvent::Connected),
        "disconnected" => Ok(LifecycleEvent::Disconnected),
        "removed" => Ok(LifecycleEvent::Removed),
        other => Err(invalid("e", format!("unknown lifecycle event {other:?}"))),
    }
}

fn decode_run_mode(value: &str) -> CodecResult<RunMode> {
    match value {
        "normal" => Ok(RunMode::Normal),
        "shadow" => Ok(RunMode::Shadow),
        "disabled" => Ok(RunMode::Disabled),
        other => Err(invalid("m", format!("unknown run mode {other:?}"))),
    }
}

fn decode_protocol(value: &str) -> CodecResult<Protocol> {
    match value {
        "zigbee" => Ok(Protocol::Zigbee),
        "zwave" => Ok(Protocol::Zwave),
        other => Err(invalid("p", format!("unknown protocol {other:?}"))),
    }
}

fn zigbee_source_code(source: ZigbeeSource) -> u8 {
    match source {
        ZigbeeSource::Read => 0,
        ZigbeeSource::Report => 1,
        ZigbeeSource::Both => 2,
    }
}

fn decode_zigbee_source(code: u64) -> CodecResult<ZigbeeSource> {
    match code {
        0 => Ok(ZigbeeSource::Read),
        1 => Ok(ZigbeeSource::Report),
        2 => Ok(ZigbeeSource::Both),
        other => Err(invalid("s", format!("unknown zigbee source {other}"))),
    }
}

fn ias_source_code(source: IasSource) -> u8 {
    match source {
        IasSource::Attribute => 0,
        IasSource::Notification => 1,
        IasSource::Both => 2,
    }
}

fn decode_ias_source(code: u64) -> CodecResult<IasSource> {
    match code {
        0 => Ok(IasSource::Attribute),
        1 => Ok(IasSource::Notification),
        2 => Ok(IasSource::Both),
        other => Err(invalid("s", format!("unknown ias source {other}"))),
    }
}

fn lifesign_kind_str(kind: LifesignKind) -> &'static str {
    match kind {
        LifesignKind::Battery => "battery",
        LifesignKind::Signal => "signal",
        LifesignKind::Temperature => "temperature",
    }
}

fn decode_lifesign_kind(value: &str) -> CodecResult<LifesignKind> {
    match value {
        "battery" => Ok(LifesignKind::Battery),
        "signal" => Ok(LifesignKind::Signal),
        "temperature" => Ok(LifesignKind::Temperature),
        other => Err(invalid("k", format!("unknown lifesign kind {other:?}"))),
    }
}

fn log_level_str(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn decode_log_level(value: &str) -> CodecResult<LogLevel> {
    match value {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        other => Err(invalid("l", format!("unknown log level {other:?}"))),
    }
}

// --- Field helpers ---

fn invalid(field: &'static str, reason: impl Into<String>) -> CodecError {
    CodecError::InvalidField {
        field,
        reason: reason.into(),
    }
}

fn as_object<'a>(value: &'a Value, field: &'static str) -> CodecResult<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| invalid(field, "expected an object"))
}

fn req<'a>(obj: &'a Map<String, Value>, key: &'static str) -> CodecResult<&'a Value> {
    obj.get(key).ok_or(CodecError::MissingField(key))
}

fn req_str<'a>(obj: &'a Map<String, Value>, key: &'static str) -> CodecResult<&'a str> {
    req(obj, key)?
        .as_str()
        .ok_or_else(|| invalid(key, "expected a string"))
}

fn req_u64(obj: &Map<String, Value>, key: &'static str) -> CodecResult<u64> {
    req(obj, key)?
        .as_u64()
        .ok_or_else(|| invalid(key, "expected an unsigned integer"))
}

fn req_u16(obj: &Map<String, Value>, key: &'static str) -> CodecResult<u16> {
    u16_from(req_u64(obj, key)?, key)
}

fn req_u8(obj: &Map<String, Value>, key: &'static str) -> CodecResult<u8> {
    u8_from(req_u64(obj, key)?, key)
}

fn req_i32(obj: &Map<String, Value>, key: &'static str) -> CodecResult<i32> {
    let raw = req(obj, key)?
        .as_i64()
        .ok_or_else(|| invalid(key, "expected an integer"))?;
    i32::try_from(raw).map_err(|_| invalid(key, "out of range for i32"))
}

fn opt_u16(obj: &Map<String, Value>, key: &'static str) -> CodecResult<Option<u16>> {
    match obj.get(key) {
        Some(v) => {
            let raw = v
                .as_u64()
                .ok_or_else(|| invalid(key, "expected an unsigned integer"))?;
            Ok(Some(u16_from(raw, key)?))
        }
        None => Ok(None),
    }
}

fn opt_u8(obj: &Map<String, Value>, key: &'static str) -> CodecResult<Option<u8>> {
    match obj.get(key) {
        Some(v) => {
            let raw = v
                .as_u64()
                .ok_or_else(|| invalid(key, "expected an unsigned integer"))?;
            Ok(Some(u8_from(raw, key)?))
        }
        None => Ok(None),
    }
}

fn u16_from(raw: u64, key: &'static str) -> CodecResult<u16> {
    u16::try_from(raw).map_err(|_| invalid(key, "out of range for u16"))
}

fn u8_from(raw: u64, key: &'static str) -> CodecResult<u8> {
    u8::try_from(raw).map_err(|_| invalid(key, "out of range for u8"))
}

fn decode_base64(value: &Value, field: &'static str) -> CodecResult<Vec<u8>> {
    let text = value
        .as_str()
        .ok_or_else(|| invalid(field, "expected a base64 string"))?;
    BASE64
        .decode(text)
        .map_err(|source| CodecError::Base64 { field, source })
}

fn duration_nanos(duration: Duration, field: &'static str) -> CodecResult<u64> {
    u64::try_from(duration.as_nanos()).map_err(|_| invalid(field, "duration too large"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflex_automaton::AutomatonBuilder;

    fn sample_driver() -> DriverDefinition {
        let mut builder = AutomatonBuilder::new();
        builder
            .add_pattern(
                "01 02 .*",
                vec![Action::SetAttribute(SetAttributeAction {
                    name: "mot:state".to_string(),
                    value: json!("ACTIVE"),
                })],
            )
            .unwrap();
        let automaton = builder.build(|values| {
            values
                .iter()
                .flat_map(|v| v.iter().cloned())
                .collect::<Vec<Action>>()
        });

        DriverDefinition {
            name: "contact-sensor".to_string(),
            version: "2.1.0".to_string(),
            hash: "b3:9d41".to_string(),
            offline_timeout: Duration::from_secs(3600),
            run_mode: RunMode::Normal,
            capabilities: vec!["mot".to_string(), "batt".to_string()],
            rules: vec![
                Rule {
                    matchers: vec![Matcher::ZigbeeAttribute(ZigbeeAttributeMatcher {
                        profile: 0x0104,
                        endpoint: 1,
                        cluster: 0x0006,
                        attribute: 0x0000,
                        manufacturer: None,
                        flags: None,
                        value: Some(vec![0x01]),
                        source: ZigbeeSource::Report,
                    })],
                    actions: vec![Action::SetAttribute(SetAttributeAction {
                        name: "swit:state".to_string(),
                        value: json!("ON"),
                    })],
                },
                Rule {
                    matchers: vec![Matcher::Lifecycle(LifecycleEvent::Connected)],
                    actions: vec![Action::Ordered(OrderedAction {
                        actions: vec![Action::SendProtocol(SendProtocolAction {
                            protocol: Protocol::Zigbee,
                            payload: vec![0x00, 0x11, 0x22],
                        })],
                    })],
                },
            ],
            automaton: Some(automaton),
        }
    }

    #[test]
    fn test_round_trip() {
        let driver = sample_driver();
        let encoded = encode(&driver).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, driver);
    }

    #[test]
    fn test_format_version_checked() {
        let driver = sample_driver();
        let mut value = encode_value(&driver).unwrap();
        value["fmt"] = json!(99);
        let text = serde_json::to_string(&value).unwrap();
        assert!(matches!(
            decode(&text),
            Err(CodecError::UnsupportedFormat(99))
        ));
    }

    #[test]
    fn test_unknown_discriminants_decode_to_unknown() {
        let text = r#"{
            "fmt": 1, "n": "x", "v": "1.0.0", "h": "h", "o": 0,
            "m": "normal", "c": [],
            "r": [{"m": [{"t": "QQ", "w": 1}], "a": [{"t": "YY"}]}]
        }"#;
        let driver = decode(text).unwrap();
        assert_eq!(
            driver.rules[0].matchers[0],
            Matcher::Unknown {
                kind: "QQ".to_string()
            }
        );
        assert_eq!(
            driver.rules[0].actions[0],
            Action::Unknown {
                kind: "YY".to_string()
            }
        );
    }

    #[test]
    fn test_byte_pattern_is_not_persistable() {
        let mut driver = sample_driver();
        driver.rules[0]
            .matchers
            .push(Matcher::BytePattern("01 .*".to_string()));
        assert!(matches!(encode(&driver), Err(CodecError::UncompiledPattern)));
    }

    #[test]
    fn test_set_attribute_store_flag() {
        let stored = Action::SetAttribute(SetAttributeAction {
            name: "a".to_string(),
            value: json!(1),
        });
        let transient = Action::SetAttributeNoStore(SetAttributeAction {
            name: "a".to_string(),
            value: json!(1),
        });

        let stored_wire = encode_action(&stored).unwrap();
        assert!(stored_wire.get("st").is_none());

        let transient_wire = encode_action(&transient).unwrap();
        assert_eq!(transient_wire["st"], json!(false));

        assert_eq!(decode_action(&stored_wire).unwrap(), stored);
        assert_eq!(decode_action(&transient_wire).unwrap(), transient);
    }

    #[test]
    fn test_automaton_decode_rejects_multiple_initials() {
        let text = r#"{
            "fmt": 1, "n": "x", "v": "1.0.0", "h": "h", "o": 0,
            "m": "normal", "c": [], "r": [],
            "d": {
                "is0": {"t": {"t": "SG", "b": 1, "s": "if1"}},
                "if1": {"a": [{"t": "FW"}]}
            }
        }"#;
        assert!(matches!(
            decode(text),
            Err(CodecError::Structural(
                StructuralError::MultipleInitialStates(2)
            ))
        ));
    }

    #[test]
    fn test_automaton_decode_rejects_dangling_name() {
        let text = r#"{
            "fmt": 1, "n": "x", "v": "1.0.0", "h": "h", "o": 0,
            "m": "normal", "c": [], "r": [],
            "d": {
                "is0": {"t": {"t": "SG", "b": 1, "s": "fs7"}}
            }
        }"#;
        assert!(matches!(
            decode(text),
            Err(CodecError::UnknownStateName(name)) if name == "fs7"
        ));
    }

    #[test]
    fn test_bad_base64_payload() {
        let value = json!({"t": "PC", "p": "zigbee", "b": "!!not-base64!!"});
        assert!(matches!(
            decode_action(&value),
            Err(CodecError::Base64 { field: "b", .. })
        ));
    }
}
