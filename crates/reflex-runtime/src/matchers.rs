//! Discrete protocol matcher evaluation
//!
//! Evaluates the non-automaton protocol matchers against a parsed Zigbee
//! frame. Evaluation never touches the device beyond staging the lifesign
//! context variables; a decode error inside one matcher is reported to the
//! caller, which treats it as "did not match" without affecting siblings.

use serde_json::json;

use reflex_model::{
    AlertmeLifesignMatcher, IasSource, ZigbeeAttributeMatcher, ZigbeeIasZoneMatcher, ZigbeeSource,
};

use crate::actions::{vars, ExecutionScope};
use crate::compiler::DiscreteMatcher;
use crate::zigbee::{
    ZclFrame, ZigbeeResult, ATTR_ZONE_STATUS, CMD_READ_ATTRIBUTES_RESPONSE, CMD_REPORT_ATTRIBUTES,
    CMD_ZONE_STATUS_CHANGE,
};

/// Evaluate one discrete matcher against a parsed frame
///
/// Returns whether it matched; a matched AlertMe lifesign also stages the
/// decoded readings as context variables for the lifesign actions.
pub fn evaluate(
    matcher: &DiscreteMatcher,
    frame: &ZclFrame<'_>,
    scope: &mut ExecutionScope<'_>,
) -> ZigbeeResult<bool> {
    match matcher {
        DiscreteMatcher::ZigbeeAttribute(m) => zigbee_attribute(m, frame),
        DiscreteMatcher::ZigbeeIasZone(m) => ias_zone(m, frame),
        DiscreteMatcher::AlertmeLifesign(m) => lifesign(m, frame, scope),
    }
}

fn addressed_to(profile: u16, endpoint: u8, cluster: u16, frame: &ZclFrame<'_>) -> bool {
    frame.profile == profile && frame.endpoint == endpoint && frame.cluster == cluster
}

fn zigbee_attribute(m: &ZigbeeAttributeMatcher, frame: &ZclFrame<'_>) -> ZigbeeResult<bool> {
    if !addressed_to(m.profile, m.endpoint, m.cluster, frame) {
        return Ok(false);
    }
    if frame.manufacturer != m.manufacturer {
        return Ok(false);
    }
    if let Some(flags) = m.flags {
        if frame.control.bits() & flags != flags {
            return Ok(false);
        }
    }
    if !frame.is_global() {
        return Ok(false);
    }

    let command_ok = match m.source {
        ZigbeeSource::Report => frame.command == CMD_REPORT_ATTRIBUTES,
        ZigbeeSource::Read => frame.command == CMD_READ_ATTRIBUTES_RESPONSE,
        ZigbeeSource::Both => matches!(
            frame.command,
            CMD_REPORT_ATTRIBUTES | CMD_READ_ATTRIBUTES_RESPONSE
        ),
    };
    if !command_ok {
        return Ok(false);
    }

    let records = frame.attribute_records()?;
    Ok(records.iter().any(|record| {
        record.attribute == m.attribute
            && m.value
                .as_deref()
                .map_or(true, |expected| expected == record.value.as_slice())
    }))
}

fn ias_zone(m: &ZigbeeIasZoneMatcher, frame: &ZclFrame<'_>) -> ZigbeeResult<bool> {
    if !addressed_to(m.profile, m.endpoint, m.cluster, frame) {
        return Ok(false);
    }

    let status = if frame.is_global() {
        if !matches!(m.source, IasSource::Attribute | IasSource::Both) {
            return Ok(false);
        }
        if !matches!(
            frame.command,
            CMD_REPORT_ATTRIBUTES | CMD_READ_ATTRIBUTES_RESPONSE
        ) {
            return Ok(false);
        }
        let records = frame.attribute_records()?;
        match records
            .iter()
            .find(|record| record.attribute == ATTR_ZONE_STATUS)
            .and_then(|record| u16_le(&record.value))
        {
            Some(status) => status,
            None => return Ok(false),
        }
    } else {
        if !matches!(m.source, IasSource::Notification | IasSource::Both) {
            return Ok(false);
        }
        if frame.command != CMD_ZONE_STATUS_CHANGE {
            return Ok(false);
        }
        let notification = frame.zone_status_notification()?;
        // stale notifications are ignored
        if notification.delay > m.max_delay {
            return Ok(false);
        }
        notification.status
    };

    Ok(mask_matches(
        u32::from(status),
        u32::from(m.set_mask),
        u32::from(m.clear_mask),
    ))
}

fn lifesign(
    m: &AlertmeLifesignMatcher,
    frame: &ZclFrame<'_>,
    scope: &mut ExecutionScope<'_>,
) -> ZigbeeResult<bool> {
    if !addressed_to(m.profile, m.endpoint, m.cluster, frame) {
        return Ok(false);
    }

    let lifesign = frame.lifesign()?;
    if !mask_matches(
        u32::from(lifesign.status),
        u32::from(m.set_mask),
        u32::from(m.clear_mask),
    ) {
        return Ok(false);
    }

    // stage the decoded readings for the lifesign actions
    scope.set_variable(vars::BATTERY_MV, json!(lifesign.battery_mv));
    scope.set_variable(vars::TEMPERATURE, json!(lifesign.temperature));
    scope.set_variable(vars::LQI, json!(lifesign.lqi));
    scope.set_variable(vars::RSSI, json!(lifesign.rssi));
    Ok(true)
}

fn mask_matches(status: u32, set_mask: u32, clear_mask: u32) -> bool {
    status & set_mask == set_mask && status & clear_mask == 0
}

fn u16_le(bytes: &[u8]) -> Option<u16> {
    match bytes {
        [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}
