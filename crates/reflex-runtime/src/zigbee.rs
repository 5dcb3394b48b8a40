//! Zigbee frame reading and writing
//!
//! Hub frame layout, as delivered by the radio firmware:
//!
//! ```text
//! - 02 Profile id (LE)
//! - 01 Source endpoint
//! - 02 Cluster id (LE)
//! - 01 Frame control
//! - 02 Manufacturer code (LE) [when FC manufacturer-specific]
//! - 01 Command id
//! - vr Command body
//! ```
//!
//! Only the command bodies the matchers consume are decoded here: attribute
//! records (reports and read responses), the IAS zone status change
//! notification, and the AlertMe lifesign body. All reads are
//! bounds-checked; a malformed frame surfaces as an error the executor
//! treats as "this matcher did not match".

use std::time::Duration;

use bitflags::bitflags;
use thiserror::Error;

/// Zigbee decode errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ZigbeeError {
    #[error("frame truncated at offset {offset}, needed {needed} more bytes")]
    Truncated { offset: usize, needed: usize },

    #[error("unsupported attribute data type {0:#04x}")]
    UnsupportedDataType(u8),

    #[error("command {command:#04x} does not carry {expected}")]
    WrongCommand {
        command: u8,
        expected: &'static str,
    },
}

/// Result type for Zigbee decoding
pub type ZigbeeResult<T> = Result<T, ZigbeeError>;

bitflags! {
    /// ZCL frame control bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameControl: u8 {
        const CLUSTER_SPECIFIC = 0x01;
        const MANUFACTURER_SPECIFIC = 0x04;
        const TO_CLIENT = 0x08;
        const DISABLE_DEFAULT_RESPONSE = 0x10;
    }
}

/// Read attributes response command id
pub const CMD_READ_ATTRIBUTES_RESPONSE: u8 = 0x01;

/// Report attributes command id
pub const CMD_REPORT_ATTRIBUTES: u8 = 0x0A;

/// IAS zone status change notification command id (cluster-specific)
pub const CMD_ZONE_STATUS_CHANGE: u8 = 0x00;

/// IAS zone enroll response command id (cluster-specific, to server)
pub const CMD_ZONE_ENROLL_RESPONSE: u8 = 0x00;

/// IAS Zone cluster id
pub const CLUSTER_IAS_ZONE: u16 = 0x0500;

/// IAS zone status attribute id
pub const ATTR_ZONE_STATUS: u16 = 0x0002;

/// Attribute record status for a successful read
const STATUS_SUCCESS: u8 = 0x00;

/// A parsed frame header with its undecoded command body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZclFrame<'a> {
    pub profile: u16,
    pub endpoint: u8,
    pub cluster: u16,
    pub control: FrameControl,
    pub manufacturer: Option<u16>,
    pub command: u8,
    pub body: &'a [u8],
}

impl<'a> ZclFrame<'a> {
    /// Parse the frame header, leaving the body raw
    pub fn parse(bytes: &'a [u8]) -> ZigbeeResult<Self> {
        let mut reader = Reader::new(bytes);
        let profile = reader.u16_le()?;
        let endpoint = reader.u8()?;
        let cluster = reader.u16_le()?;
        let control = FrameControl::from_bits_retain(reader.u8()?);
        let manufacturer = if control.contains(FrameControl::MANUFACTURER_SPECIFIC) {
            Some(reader.u16_le()?)
        } else {
            None
        };
        let command = reader.u8()?;
        Ok(Self {
            profile,
            endpoint,
            cluster,
            control,
            manufacturer,
            command,
            body: reader.rest(),
        })
    }

    /// Whether the frame is a global (non-cluster-specific) command
    pub fn is_global(&self) -> bool {
        !self.control.contains(FrameControl::CLUSTER_SPECIFIC)
    }

    /// Decode the attribute records of a report or read response body
    ///
    /// Read responses interleave a status byte per record; failed records
    /// carry no value and are skipped.
    pub fn attribute_records(&self) -> ZigbeeResult<Vec<AttributeRecord>> {
        let with_status = match self.command {
            CMD_REPORT_ATTRIBUTES => false,
            CMD_READ_ATTRIBUTES_RESPONSE => true,
            command => {
                return Err(ZigbeeError::WrongCommand {
                    command,
                    expected: "attribute records",
                })
            }
        };

        let mut reader = Reader::new(self.body);
        let mut records = Vec::new();
        while !reader.is_empty() {
            let attribute = reader.u16_le()?;
            if with_status {
                let status = reader.u8()?;
                if status != STATUS_SUCCESS {
                    continue;
                }
            }
            let data_type = reader.u8()?;
            let size = data_type_size(data_type)?;
            let value = reader.take(size)?.to_vec();
            records.push(AttributeRecord {
                attribute,
                data_type,
                value,
            });
        }
        Ok(records)
    }

    /// Decode an IAS zone status change notification body
    pub fn zone_status_notification(&self) -> ZigbeeResult<ZoneStatusNotification> {
        if self.is_global() || self.command != CMD_ZONE_STATUS_CHANGE {
            return Err(ZigbeeError::WrongCommand {
                command: self.command,
                expected: "zone status notification",
            });
        }
        let mut reader = Reader::new(self.body);
        let status = reader.u16_le()?;
        let extended = reader.u8()?;
        let zone_id = reader.u8()?;
        // delay in quarter seconds per ZCL
        let delay_quarters = reader.u16_le()?;
        Ok(ZoneStatusNotification {
            status,
            extended,
            zone_id,
            delay: Duration::from_millis(u64::from(delay_quarters) * 250),
        })
    }

    /// Decode an AlertMe lifesign body
    pub fn lifesign(&self) -> ZigbeeResult<Lifesign> {
        let mut reader = Reader::new(self.body);
        Ok(Lifesign {
            status: reader.u8()?,
            battery_mv: reader.u16_le()?,
            temperature: reader.i16_le()?,
            rssi: reader.u8()? as i8,
            lqi: reader.u8()?,
        })
    }
}

/// One attribute record from a report or read response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRecord {
    pub attribute: u16,
    pub data_type: u8,
    /// Raw little-endian value bytes, sized by the data type
    pub value: Vec<u8>,
}

/// IAS zone status change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneStatusNotification {
    pub status: u16,
    pub extended: u8,
    pub zone_id: u8,
    /// Time since the device observed the change
    pub delay: Duration,
}

/// AlertMe lifesign readings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifesign {
    /// Status flag bits
    pub status: u8,
    /// Battery voltage in millivolts
    pub battery_mv: u16,
    /// Temperature in sixteenths of a degree Celsius
    pub temperature: i16,
    /// Received signal strength
    pub rssi: i8,
    /// Link quality indicator
    pub lqi: u8,
}

/// Build an IAS zone enroll response frame
pub fn enroll_response_frame(profile: u16, endpoint: u8, cluster: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(9);
    frame.extend_from_slice(&profile.to_le_bytes());
    frame.push(endpoint);
    frame.extend_from_slice(&cluster.to_le_bytes());
    frame.push(FrameControl::CLUSTER_SPECIFIC.bits());
    frame.push(CMD_ZONE_ENROLL_RESPONSE);
    // enroll response code: success, zone id 0
    frame.push(0x00);
    frame.push(0x00);
    frame
}

fn data_type_size(data_type: u8) -> ZigbeeResult<usize> {
    let size = match data_type {
        0x10 => 1, // bool
        0x18 => 1, // bitmap8
        0x19 => 2, // bitmap16
        0x20 => 1, // u8
        0x21 => 2, // u16
        0x22 => 3, // u24
        0x23 => 4, // u32
        0x28 => 1, // s8
        0x29 => 2, // s16
        0x30 => 1, // enum8
        0x31 => 2, // enum16
        other => return Err(ZigbeeError::UnsupportedDataType(other)),
    };
    Ok(size)
}

/// Bounds-checked byte cursor
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    fn take(&mut self, count: usize) -> ZigbeeResult<&'a [u8]> {
        let available = self.bytes.len() - self.pos;
        if available < count {
            return Err(ZigbeeError::Truncated {
                offset: self.pos,
                needed: count - available,
            });
        }
        let slice = &self.bytes[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    fn u8(&mut self) -> ZigbeeResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16_le(&mut self) -> ZigbeeResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn i16_le(&mut self) -> ZigbeeResult<i16> {
        let bytes = self.take(2)?;
        Ok(i16::from_le_bytes([bytes[0], bytes[1]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // profile 0x0104, endpoint 1, cluster 0x0006, global report of
    // attribute 0x0000, bool, value 1
    const ON_OFF_REPORT: [u8; 11] = hex!("04 01 01 06 00 00 0a 00 00 10 01");

    #[test]
    fn test_parse_report_frame() {
        let frame = ZclFrame::parse(&ON_OFF_REPORT).unwrap();
        assert_eq!(frame.profile, 0x0104);
        assert_eq!(frame.endpoint, 1);
        assert_eq!(frame.cluster, 0x0006);
        assert!(frame.is_global());
        assert_eq!(frame.manufacturer, None);
        assert_eq!(frame.command, CMD_REPORT_ATTRIBUTES);

        let records = frame.attribute_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attribute, 0x0000);
        assert_eq!(records[0].data_type, 0x10);
        assert_eq!(records[0].value, vec![0x01]);
    }

    #[test]
    fn test_read_response_skips_failed_records() {
        // two records: attr 0x0000 failed (status 0x86), attr 0x0001 ok u8=42
        let frame_bytes = hex!("04 01 01 06 00 00 01 00 00 86 01 00 00 20 2a");
        let frame = ZclFrame::parse(&frame_bytes).unwrap();
        assert_eq!(frame.command, CMD_READ_ATTRIBUTES_RESPONSE);

        let records = frame.attribute_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attribute, 0x0001);
        assert_eq!(records[0].value, vec![0x2A]);
    }

    #[test]
    fn test_manufacturer_specific_header() {
        let frame_bytes = hex!("04 01 01 06 00 04 4d 10 0a 00 00 10 01");
        let frame = ZclFrame::parse(&frame_bytes).unwrap();
        assert_eq!(frame.manufacturer, Some(0x104D));
        assert_eq!(frame.command, CMD_REPORT_ATTRIBUTES);
    }

    #[test]
    fn test_zone_status_notification() {
        // cluster-specific command 0x00 on 0x0500: status 0x0021,
        // extended 0, zone 1, delay 4 quarter-seconds
        let frame_bytes = hex!("04 01 01 00 05 01 00 21 00 00 01 04 00");
        let frame = ZclFrame::parse(&frame_bytes).unwrap();
        let zone = frame.zone_status_notification().unwrap();
        assert_eq!(zone.status, 0x0021);
        assert_eq!(zone.zone_id, 1);
        assert_eq!(zone.delay, Duration::from_secs(1));
    }

    #[test]
    fn test_lifesign_body() {
        // status 0x01, battery 2850 mV, temp 320 (20 C), rssi -60, lqi 200
        let frame_bytes = hex!("16 c2 02 f0 00 01 00 01 22 0b 40 01 c4 c8");
        let frame = ZclFrame::parse(&frame_bytes).unwrap();
        let lifesign = frame.lifesign().unwrap();
        assert_eq!(lifesign.status, 0x01);
        assert_eq!(lifesign.battery_mv, 2850);
        assert_eq!(lifesign.temperature, 320);
        assert_eq!(lifesign.rssi, -60);
        assert_eq!(lifesign.lqi, 200);
    }

    #[test]
    fn test_truncated_frame() {
        assert!(matches!(
            ZclFrame::parse(&[0x04, 0x01, 0x01]),
            Err(ZigbeeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_enroll_response_round_trips() {
        let bytes = enroll_response_frame(0x0104, 1, CLUSTER_IAS_ZONE);
        let frame = ZclFrame::parse(&bytes).unwrap();
        assert_eq!(frame.cluster, CLUSTER_IAS_ZONE);
        assert!(!frame.is_global());
        assert_eq!(frame.command, CMD_ZONE_ENROLL_RESPONSE);
        assert_eq!(frame.body, &[0x00, 0x00]);
    }
}
