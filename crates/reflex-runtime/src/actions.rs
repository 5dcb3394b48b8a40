//! Action runtime
//!
//! Executes matched actions against an execution scope that stages every
//! effect. Attribute writes batch into one set_attributes platform message
//! at commit; protocol sends and platform emissions go out through the
//! device context as they execute. Shadow-mode drivers run the same path
//! with outward effects suppressed.

use std::time::Duration;

use indexmap::IndexMap;
use serde_json::{json, Value};
use tracing::{debug, error, info, trace, warn};

use reflex_core::{messages, Context, DeviceContext, PlatformMessage, Protocol};
use reflex_model::{
    Action, AlertmeLifesignAction, Calibration, LifesignKind, LogAction, LogArg, LogLevel,
    ReflexVersion,
};

use crate::zigbee;

/// Context variables staged by the AlertMe lifesign matcher and consumed by
/// the lifesign actions
pub mod vars {
    /// Battery voltage in millivolts
    pub const BATTERY_MV: &str = "alertme:battery_mv";
    /// Temperature in sixteenths of a degree Celsius, sign-extended
    pub const TEMPERATURE: &str = "alertme:temperature";
    /// Link quality indicator
    pub const LQI: &str = "alertme:lqi";
    /// Received signal strength
    pub const RSSI: &str = "alertme:rssi";

    /// Last emitted quantized battery percentage
    pub const LAST_BATTERY: &str = "reflex:last_battery";
    /// Last emitted quantized signal percentage
    pub const LAST_SIGNAL: &str = "reflex:last_signal";
    /// Last emitted rounded Fahrenheit temperature
    pub const LAST_TEMPERATURE: &str = "reflex:last_temperature";
}

/// Attribute written by the battery lifesign action
pub const ATTR_BATTERY: &str = "batt:percent";

/// Attribute written by the signal lifesign action
pub const ATTR_SIGNAL: &str = "sig:percent";

/// Attribute written by the temperature lifesign action
pub const ATTR_TEMPERATURE: &str = "temp:celsius";

/// Battery calibration used when the action carries none
const DEFAULT_CALIBRATION: Calibration = Calibration {
    minimum: 2700,
    nominal: 3000,
};

/// Ordered-commands envelope kind
const ENVELOPE_ORDERED: u8 = 0x01;

/// Delayed-commands envelope kind
const ENVELOPE_DELAYED: u8 = 0x02;

/// Per-message staging area over the device context
///
/// Created for one handling pass and discarded after [`commit`]; nothing
/// in it survives the message. `handled` and `forward` together decide the
/// pass result: a Forward action wins over any match.
///
/// [`commit`]: ExecutionScope::commit
pub struct ExecutionScope<'a> {
    device: &'a mut dyn DeviceContext,
    context: Context,
    message_bytes: Vec<u8>,
    pending_stored: IndexMap<String, Value>,
    pending_transient: IndexMap<String, Value>,
    handled: bool,
    forward: bool,
    suppress: bool,
}

impl<'a> ExecutionScope<'a> {
    /// Create a scope for one handling pass
    pub fn new(device: &'a mut dyn DeviceContext, context: Context) -> Self {
        Self {
            device,
            context,
            message_bytes: Vec::new(),
            pending_stored: IndexMap::new(),
            pending_transient: IndexMap::new(),
            handled: false,
            forward: false,
            suppress: false,
        }
    }

    /// Attach the triggering frame bytes for log rendering
    pub fn with_message_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.message_bytes = bytes.into();
        self
    }

    /// Suppress outward effects (shadow run mode)
    pub fn suppress_effects(mut self) -> Self {
        self.suppress = true;
        self
    }

    /// Record that a matcher handled the message
    pub fn mark_handled(&mut self) {
        self.handled = true;
    }

    /// Whether the pass result is "handled"
    pub fn result(&self) -> bool {
        self.handled && !self.forward
    }

    /// Read a context variable
    pub fn variable(&self, name: &str) -> Option<Value> {
        self.device.variable(name)
    }

    /// Write a context variable
    pub fn set_variable(&mut self, name: &str, value: Value) {
        self.device.set_variable(name, value);
    }

    /// Execute a list of actions, optionally version-filtered
    ///
    /// With `already_applied` set, actions whose required version is at or
    /// below it are skipped: an earlier pass with that baseline has already
    /// run them.
    pub fn execute_all(&mut self, actions: &[Action], already_applied: Option<ReflexVersion>) {
        for action in actions {
            if let Some(baseline) = already_applied {
                if action.required_version() <= baseline {
                    trace!(version = %action.required_version(), "action already applied upstream");
                    continue;
                }
            }
            self.execute(action);
        }
    }

    /// Execute a single action
    pub fn execute(&mut self, action: &Action) {
        match action {
            Action::SendProtocol(send) => {
                self.send_protocol(send.protocol, send.payload.clone());
            }

            Action::SendPlatform(send) => {
                let mut message = PlatformMessage::new(send.name.clone())
                    .with_context(self.context.child());
                message.args = send.args.clone();
                message.response = send.response;
                self.emit_platform(message);
            }

            Action::SetAttribute(set) => {
                self.pending_stored
                    .insert(set.name.clone(), set.value.clone());
            }

            Action::SetAttributeNoStore(set) => {
                self.pending_transient
                    .insert(set.name.clone(), set.value.clone());
            }

            Action::Ordered(ordered) => {
                self.send_envelopes(ENVELOPE_ORDERED, None, &ordered.actions);
            }

            Action::Delay(delay) => {
                self.send_envelopes(ENVELOPE_DELAYED, Some(delay.duration), &delay.actions);
            }

            Action::AlertmeLifesign(lifesign) => self.lifesign(lifesign),

            Action::ZigbeeIasZoneEnroll(enroll) => {
                let frame =
                    zigbee::enroll_response_frame(enroll.profile, enroll.endpoint, enroll.cluster);
                self.send_protocol(Protocol::Zigbee, frame);
            }

            Action::Log(log) => self.log(log),

            Action::Forward => {
                debug!("forward action: message intentionally left unhandled");
                self.forward = true;
            }

            Action::Debug => trace!("debug action marker"),

            Action::Builtin(builtin) => {
                warn!(name = %builtin.name, "builtin action is not executable on-hub");
            }

            Action::Unknown { kind } => {
                debug!(kind = %kind, "skipping unrecognized action");
            }
        }
    }

    /// Flush staged attribute writes as one set_attributes message
    pub fn commit(&mut self) {
        if self.pending_stored.is_empty() && self.pending_transient.is_empty() {
            return;
        }

        let mut attributes = serde_json::Map::new();
        for (name, value) in &self.pending_stored {
            attributes.insert(name.clone(), value.clone());
        }
        let mut transient = Vec::new();
        for (name, value) in &self.pending_transient {
            attributes.insert(name.clone(), value.clone());
            transient.push(Value::String(name.clone()));
        }

        if self.suppress {
            debug!(count = attributes.len(), "shadow mode: attribute flush suppressed");
        } else {
            for (name, value) in &self.pending_stored {
                self.device.store_attribute(name, value.clone());
            }

            let mut message = PlatformMessage::new(messages::SET_ATTRIBUTES)
                .with_context(self.context.child())
                .with_arg(messages::ARG_ATTRIBUTES, Value::Object(attributes));
            if !transient.is_empty() {
                message = message.with_arg(messages::ARG_TRANSIENT, Value::Array(transient));
            }
            self.device.emit_platform(message);
        }

        self.pending_stored.clear();
        self.pending_transient.clear();
    }

    /// Register a poll with the scheduler
    pub fn schedule_poll(&mut self, interval: Duration, payloads: Vec<(Protocol, Vec<u8>)>) {
        if self.suppress {
            debug!(?interval, "shadow mode: poll registration suppressed");
            return;
        }
        self.device.schedule_poll(interval, payloads);
    }

    // --- Effect funnels (shadow suppression point) ---

    fn send_protocol(&mut self, protocol: Protocol, payload: Vec<u8>) {
        if self.suppress {
            debug!(%protocol, len = payload.len(), "shadow mode: protocol send suppressed");
            return;
        }
        self.device.send_protocol(protocol, payload);
    }

    fn emit_platform(&mut self, message: PlatformMessage) {
        if self.suppress {
            debug!(name = %message.name, "shadow mode: platform send suppressed");
            return;
        }
        self.device.emit_platform(message);
    }

    // --- Ordered / delayed envelopes ---

    /// Collect the protocol halves of the sub-actions and emit one envelope
    /// per protocol family actually present.
    fn send_envelopes(&mut self, kind: u8, delay: Option<Duration>, actions: &[Action]) {
        let mut zigbee_payloads = Vec::new();
        let mut zwave_payloads = Vec::new();
        collect_payloads(actions, &mut zigbee_payloads, &mut zwave_payloads);

        if !zigbee_payloads.is_empty() {
            let envelope = pack_envelope(kind, delay, &zigbee_payloads);
            self.send_protocol(Protocol::Zigbee, envelope);
        }
        if !zwave_payloads.is_empty() {
            let envelope = pack_envelope(kind, delay, &zwave_payloads);
            self.send_protocol(Protocol::Zwave, envelope);
        }
    }

    // --- AlertMe lifesign normalization ---

    fn lifesign(&mut self, action: &AlertmeLifesignAction) {
        match action.kind {
            LifesignKind::Battery => {
                let Some(mv) = self.number_var(vars::BATTERY_MV) else {
                    warn!("battery lifesign action without a staged voltage");
                    return;
                };
                let calibration = action.calibration.unwrap_or(DEFAULT_CALIBRATION);
                let span = f64::from(calibration.nominal - calibration.minimum);
                if span <= 0.0 {
                    warn!(
                        minimum = calibration.minimum,
                        nominal = calibration.nominal,
                        "battery calibration bounds are not increasing"
                    );
                    return;
                }
                let percent =
                    (100.0 / span * (mv - f64::from(calibration.minimum))).round().clamp(0.0, 100.0);
                let quantized = quantize_to_5(percent);
                self.emit_deduped(vars::LAST_BATTERY, quantized, ATTR_BATTERY, json!(quantized));
            }

            LifesignKind::Signal => {
                let Some(lqi) = self.number_var(vars::LQI) else {
                    warn!("signal lifesign action without a staged LQI");
                    return;
                };
                let percent = (lqi * 100.0 / 255.0).round();
                let quantized = quantize_to_5(percent);
                self.emit_deduped(vars::LAST_SIGNAL, quantized, ATTR_SIGNAL, json!(quantized));
            }

            LifesignKind::Temperature => {
                let Some(native) = self.number_var(vars::TEMPERATURE) else {
                    warn!("temperature lifesign action without a staged reading");
                    return;
                };
                // native units are sixteenths of a degree Celsius, already
                // sign-extended from the 16-bit wire value
                let celsius = native / 16.0;
                let fahrenheit = (celsius * 9.0 / 5.0 + 32.0).round();
                let stored = ((fahrenheit - 32.0) * 5.0 / 9.0 * 10.0).round() / 10.0;
                self.emit_deduped(
                    vars::LAST_TEMPERATURE,
                    fahrenheit as i64,
                    ATTR_TEMPERATURE,
                    json!(stored),
                );
            }
        }
    }

    fn number_var(&self, name: &str) -> Option<f64> {
        self.variable(name).and_then(|v| v.as_f64())
    }

    /// Stage the attribute only when the quantized value moved
    fn emit_deduped(&mut self, last_var: &str, quantized: i64, attribute: &str, value: Value) {
        let last = self.variable(last_var).and_then(|v| v.as_i64());
        if last == Some(quantized) {
            trace!(attribute, quantized, "lifesign value unchanged, not emitted");
            return;
        }
        self.set_variable(last_var, json!(quantized));
        self.pending_stored.insert(attribute.to_string(), value);
    }

    // --- Logging ---

    fn log(&mut self, action: &LogAction) {
        let message = self.render_template(&action.template, &action.args);
        match action.level {
            LogLevel::Trace => trace!(target: "reflex::driver", "{message}"),
            LogLevel::Debug => debug!(target: "reflex::driver", "{message}"),
            LogLevel::Info => info!(target: "reflex::driver", "{message}"),
            LogLevel::Warn => warn!(target: "reflex::driver", "{message}"),
            LogLevel::Error => error!(target: "reflex::driver", "{message}"),
        }
    }

    fn render_template(&self, template: &str, args: &[LogArg]) -> String {
        let mut out = String::with_capacity(template.len());
        let mut pending = args.iter();
        let mut rest = template;
        while let Some(position) = rest.find("{}") {
            out.push_str(&rest[..position]);
            match pending.next() {
                Some(arg) => out.push_str(&self.render_arg(arg)),
                None => out.push_str("{}"),
            }
            rest = &rest[position + 2..];
        }
        out.push_str(rest);
        out
    }

    fn render_arg(&self, arg: &LogArg) -> String {
        match arg {
            LogArg::MessageBytes => {
                let hex: Vec<String> = self
                    .message_bytes
                    .iter()
                    .map(|byte| format!("{byte:02x}"))
                    .collect();
                hex.join(" ")
            }
            LogArg::Variable(name) => self
                .variable(name)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "null".to_string()),
            LogArg::Attribute(name) => self
                .device
                .attribute(name)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "null".to_string()),
        }
    }
}

fn quantize_to_5(percent: f64) -> i64 {
    ((percent / 5.0).round() * 5.0) as i64
}

/// Recursively gather protocol payloads from orderable sub-actions
fn collect_payloads(actions: &[Action], zigbee: &mut Vec<Vec<u8>>, zwave: &mut Vec<Vec<u8>>) {
    for action in actions {
        match action {
            Action::SendProtocol(send) => match send.protocol {
                Protocol::Zigbee => zigbee.push(send.payload.clone()),
                Protocol::Zwave => zwave.push(send.payload.clone()),
            },
            Action::Ordered(ordered) => collect_payloads(&ordered.actions, zigbee, zwave),
            Action::Delay(delay) => collect_payloads(&delay.actions, zigbee, zwave),
            other => {
                // compile already degraded the driver for these
                debug!(
                    "non-orderable action inside wrapper ignored: {:?}",
                    std::mem::discriminant(other)
                );
            }
        }
    }
}

/// Envelope layout: kind, delay nanos (delayed only, u64 LE), count, then
/// each payload length-prefixed (u16 LE).
fn pack_envelope(kind: u8, delay: Option<Duration>, payloads: &[Vec<u8>]) -> Vec<u8> {
    let mut envelope = Vec::new();
    envelope.push(kind);
    if let Some(delay) = delay {
        let nanos = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        envelope.extend_from_slice(&nanos.to_le_bytes());
    }
    envelope.push(payloads.len().min(u8::MAX as usize) as u8);
    for payload in payloads.iter().take(u8::MAX as usize) {
        if payload.len() > u16::MAX as usize {
            warn!(len = payload.len(), "oversized payload dropped from envelope");
            continue;
        }
        envelope.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        envelope.extend_from_slice(payload);
    }
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDevice;
    use reflex_model::{OrderedAction, SendProtocolAction, SetAttributeAction};

    fn scope(device: &mut RecordingDevice) -> ExecutionScope<'_> {
        ExecutionScope::new(device, Context::new())
    }

    #[test]
    fn test_attribute_writes_batch_into_one_message() {
        let mut device = RecordingDevice::default();
        let mut scope = scope(&mut device);

        scope.execute(&Action::SetAttribute(SetAttributeAction {
            name: "swit:state".to_string(),
            value: json!("ON"),
        }));
        scope.execute(&Action::SetAttributeNoStore(SetAttributeAction {
            name: "sig:raw".to_string(),
            value: json!(17),
        }));
        scope.commit();

        assert_eq!(device.platform.len(), 1);
        let message = &device.platform[0];
        assert_eq!(message.name, messages::SET_ATTRIBUTES);
        assert_eq!(
            message.args[messages::ARG_ATTRIBUTES]["swit:state"],
            json!("ON")
        );
        assert_eq!(message.args[messages::ARG_TRANSIENT], json!(["sig:raw"]));

        // only the stored attribute reached the device model
        assert_eq!(device.attributes.get("swit:state"), Some(&json!("ON")));
        assert!(!device.attributes.contains_key("sig:raw"));
    }

    #[test]
    fn test_ordered_packs_one_envelope_per_family() {
        let mut device = RecordingDevice::default();
        let mut scope = scope(&mut device);

        scope.execute(&Action::Ordered(OrderedAction {
            actions: vec![
                Action::SendProtocol(SendProtocolAction {
                    protocol: Protocol::Zigbee,
                    payload: vec![0xAA, 0xBB],
                }),
                Action::SendProtocol(SendProtocolAction {
                    protocol: Protocol::Zigbee,
                    payload: vec![0xCC],
                }),
            ],
        }));

        assert_eq!(device.protocol.len(), 1);
        let (protocol, envelope) = &device.protocol[0];
        assert_eq!(*protocol, Protocol::Zigbee);
        assert_eq!(
            envelope,
            &vec![
                ENVELOPE_ORDERED,
                2, // count
                2, 0, 0xAA, 0xBB, // first payload
                1, 0, 0xCC, // second payload
            ]
        );
    }

    #[test]
    fn test_delay_envelope_carries_nanos() {
        let mut device = RecordingDevice::default();
        let mut scope = scope(&mut device);

        scope.execute(&Action::Delay(reflex_model::DelayAction {
            duration: Duration::from_nanos(512),
            actions: vec![Action::SendProtocol(SendProtocolAction {
                protocol: Protocol::Zwave,
                payload: vec![0x01],
            })],
        }));

        let (protocol, envelope) = &device.protocol[0];
        assert_eq!(*protocol, Protocol::Zwave);
        assert_eq!(envelope[0], ENVELOPE_DELAYED);
        assert_eq!(u64::from_le_bytes(envelope[1..9].try_into().unwrap()), 512);
        assert_eq!(envelope[9], 1);
    }

    #[test]
    fn test_battery_hysteresis() {
        let mut device = RecordingDevice::default();
        let calibrated = Action::AlertmeLifesign(AlertmeLifesignAction {
            kind: LifesignKind::Battery,
            calibration: Some(Calibration {
                minimum: 2700,
                nominal: 3000,
            }),
        });

        // 2850 mV -> 50%, first emission
        device.variables.insert(vars::BATTERY_MV.to_string(), json!(2850));
        let mut pass = ExecutionScope::new(&mut device, Context::new());
        pass.execute(&calibrated);
        pass.commit();
        assert_eq!(device.platform.len(), 1);
        assert_eq!(
            device.platform[0].args[messages::ARG_ATTRIBUTES][ATTR_BATTERY],
            json!(50)
        );

        // 2860 mV -> 53% -> quantized 55, differs from 50: emitted
        device.variables.insert(vars::BATTERY_MV.to_string(), json!(2860));
        let mut pass = ExecutionScope::new(&mut device, Context::new());
        pass.execute(&calibrated);
        pass.commit();
        assert_eq!(device.platform.len(), 2);
        assert_eq!(
            device.platform[1].args[messages::ARG_ATTRIBUTES][ATTR_BATTERY],
            json!(55)
        );

        // same reading again: quantized unchanged, no emission
        let mut pass = ExecutionScope::new(&mut device, Context::new());
        pass.execute(&calibrated);
        pass.commit();
        assert_eq!(device.platform.len(), 2);
    }

    #[test]
    fn test_battery_clamped_to_bounds() {
        let mut device = RecordingDevice::default();
        device.variables.insert(vars::BATTERY_MV.to_string(), json!(3400));

        let mut pass = ExecutionScope::new(&mut device, Context::new());
        pass.execute(&Action::AlertmeLifesign(AlertmeLifesignAction {
            kind: LifesignKind::Battery,
            calibration: None,
        }));
        pass.commit();

        assert_eq!(
            device.platform[0].args[messages::ARG_ATTRIBUTES][ATTR_BATTERY],
            json!(100)
        );
    }

    #[test]
    fn test_temperature_converts_through_fahrenheit() {
        let mut device = RecordingDevice::default();
        // 320 sixteenths = 20.0 C = 68 F
        device.variables.insert(vars::TEMPERATURE.to_string(), json!(320));

        let mut pass = ExecutionScope::new(&mut device, Context::new());
        pass.execute(&Action::AlertmeLifesign(AlertmeLifesignAction {
            kind: LifesignKind::Temperature,
            calibration: None,
        }));
        pass.commit();

        assert_eq!(
            device.platform[0].args[messages::ARG_ATTRIBUTES][ATTR_TEMPERATURE],
            json!(20.0)
        );
    }

    #[test]
    fn test_forward_wins_over_handled() {
        let mut device = RecordingDevice::default();
        let mut scope = scope(&mut device);

        scope.mark_handled();
        assert!(scope.result());
        scope.execute(&Action::Forward);
        assert!(!scope.result());
    }

    #[test]
    fn test_shadow_mode_suppresses_effects() {
        let mut device = RecordingDevice::default();
        let mut scope = ExecutionScope::new(&mut device, Context::new()).suppress_effects();

        scope.execute(&Action::SendProtocol(SendProtocolAction {
            protocol: Protocol::Zigbee,
            payload: vec![0x01],
        }));
        scope.execute(&Action::SetAttribute(SetAttributeAction {
            name: "swit:state".to_string(),
            value: json!("ON"),
        }));
        scope.commit();

        assert!(device.protocol.is_empty());
        assert!(device.platform.is_empty());
        assert!(device.attributes.is_empty());
    }

    #[test]
    fn test_log_template_rendering() {
        let mut device = RecordingDevice::default();
        device.variables.insert("count".to_string(), json!(3));
        let scope = ExecutionScope::new(&mut device, Context::new())
            .with_message_bytes(vec![0x01, 0xFF]);

        let rendered = scope.render_template(
            "saw {} after {} frames",
            &[LogArg::MessageBytes, LogArg::Variable("count".to_string())],
        );
        assert_eq!(rendered, "saw 01 ff after 3 frames");
    }
}
