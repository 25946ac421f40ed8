//! Binary layout of the shared-memory sensor region
//!
//! All records are little-endian and byte-packed. Raw structs are read with
//! `bytemuck::pod_read_unaligned` because offsets inside the region carry no
//! alignment guarantee; every multi-byte field is converted from little-endian
//! afterwards.

use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

use crate::constants::telemetry::{STRING_LEN, UNIT_STRING_LEN};
use crate::data::{ReadingKind, SensorGroup, SensorReading};
use crate::error::{FramegovError, Result};

/// Signature written while the publisher is live ("HWiS")
pub const SIGNATURE_ACTIVE: u32 = 0x5369_5748;

/// Signature written by the publisher when it shuts down ("DEAD")
pub const SIGNATURE_DEAD: u32 = 0x4441_4544;

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct RawHeader {
    pub signature: u32,
    pub version: u32,
    pub revision: u32,
    pub poll_time: i64,
    pub sensor_section_offset: u32,
    pub sensor_element_size: u32,
    pub sensor_element_count: u32,
    pub reading_section_offset: u32,
    pub reading_element_size: u32,
    pub reading_element_count: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct RawSensor {
    pub sensor_id: u32,
    pub sensor_instance: u32,
    pub name_original: [u8; STRING_LEN],
    pub name_user: [u8; STRING_LEN],
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct RawReading {
    pub kind: u32,
    pub sensor_index: u32,
    pub sensor_id: u32,
    pub label_original: [u8; STRING_LEN],
    pub label_user: [u8; STRING_LEN],
    pub unit: [u8; UNIT_STRING_LEN],
    pub value: f64,
    pub value_min: f64,
    pub value_max: f64,
    pub value_avg: f64,
}

pub const HEADER_SIZE: usize = size_of::<RawHeader>();
pub const SENSOR_RECORD_SIZE: usize = size_of::<RawSensor>();
pub const READING_RECORD_SIZE: usize = size_of::<RawReading>();

/// Decoded region header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryHeader {
    pub signature: u32,
    pub version: u32,
    pub revision: u32,
    pub poll_time: i64,
    pub sensor_section_offset: u32,
    pub sensor_element_size: u32,
    pub sensor_element_count: u32,
    pub reading_section_offset: u32,
    pub reading_element_size: u32,
    pub reading_element_count: u32,
}

impl TelemetryHeader {
    /// Two headers describe the same record layout (poll time may differ)
    pub fn same_layout(&self, other: &TelemetryHeader) -> bool {
        self.sensor_section_offset == other.sensor_section_offset
            && self.sensor_element_size == other.sensor_element_size
            && self.sensor_element_count == other.sensor_element_count
            && self.reading_section_offset == other.reading_section_offset
            && self.reading_element_size == other.reading_element_size
            && self.reading_element_count == other.reading_element_count
    }

    /// Byte offset of the sensor record at `index`
    pub fn sensor_offset(&self, index: u32) -> usize {
        self.sensor_section_offset as usize + index as usize * self.sensor_element_size as usize
    }

    /// Byte offset of the reading record at `index`
    pub fn reading_offset(&self, index: u32) -> usize {
        self.reading_section_offset as usize + index as usize * self.reading_element_size as usize
    }

    /// Check that the declared sections fit the region and records are large enough
    ///
    /// Element sizes may exceed the known record size (newer publishers append
    /// fields); smaller sizes cannot be decoded.
    pub fn validate(&self, region_len: usize) -> Result<()> {
        if self.signature == SIGNATURE_DEAD {
            return Err(FramegovError::TelemetryUnavailable(
                "publisher marked the region as dead".to_string(),
            ));
        }
        if self.sensor_element_count > 0 && (self.sensor_element_size as usize) < SENSOR_RECORD_SIZE
        {
            return Err(FramegovError::TelemetryLayout(format!(
                "sensor element size {} below record size {}",
                self.sensor_element_size, SENSOR_RECORD_SIZE
            )));
        }
        if self.reading_element_count > 0
            && (self.reading_element_size as usize) < READING_RECORD_SIZE
        {
            return Err(FramegovError::TelemetryLayout(format!(
                "reading element size {} below record size {}",
                self.reading_element_size, READING_RECORD_SIZE
            )));
        }

        let sensor_end = self.sensor_section_offset as usize
            + self.sensor_element_count as usize * self.sensor_element_size as usize;
        let reading_end = self.reading_section_offset as usize
            + self.reading_element_count as usize * self.reading_element_size as usize;
        if sensor_end > region_len || reading_end > region_len {
            return Err(FramegovError::TelemetryLayout(format!(
                "sections end at {}/{} but region is {} bytes",
                sensor_end, reading_end, region_len
            )));
        }
        Ok(())
    }
}

/// Decode a NUL-terminated fixed-width string
fn fixed_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn short_record(what: &str, got: usize, need: usize) -> FramegovError {
    FramegovError::TelemetryLayout(format!("{} record is {} bytes, need {}", what, got, need))
}

/// Parse the region header from the first `HEADER_SIZE` bytes of `bytes`
pub fn parse_header(bytes: &[u8]) -> Result<TelemetryHeader> {
    let raw: RawHeader = bytemuck::pod_read_unaligned(
        bytes
            .get(..HEADER_SIZE)
            .ok_or_else(|| short_record("header", bytes.len(), HEADER_SIZE))?,
    );
    Ok(TelemetryHeader {
        signature: u32::from_le(raw.signature),
        version: u32::from_le(raw.version),
        revision: u32::from_le(raw.revision),
        poll_time: i64::from_le(raw.poll_time),
        sensor_section_offset: u32::from_le(raw.sensor_section_offset),
        sensor_element_size: u32::from_le(raw.sensor_element_size),
        sensor_element_count: u32::from_le(raw.sensor_element_count),
        reading_section_offset: u32::from_le(raw.reading_section_offset),
        reading_element_size: u32::from_le(raw.reading_element_size),
        reading_element_count: u32::from_le(raw.reading_element_count),
    })
}

/// Parse one sensor record into an empty group shell
pub fn parse_sensor(bytes: &[u8]) -> Result<SensorGroup> {
    let raw: RawSensor = bytemuck::pod_read_unaligned(
        bytes
            .get(..SENSOR_RECORD_SIZE)
            .ok_or_else(|| short_record("sensor", bytes.len(), SENSOR_RECORD_SIZE))?,
    );
    let name_original = raw.name_original;
    let name_user = raw.name_user;
    Ok(SensorGroup {
        sensor_id: u32::from_le(raw.sensor_id),
        sensor_instance: u32::from_le(raw.sensor_instance),
        name_original: fixed_str(&name_original),
        name_user: fixed_str(&name_user),
        readings: Vec::new(),
    })
}

/// Parse one reading record
pub fn parse_reading(bytes: &[u8]) -> Result<SensorReading> {
    let raw: RawReading = bytemuck::pod_read_unaligned(
        bytes
            .get(..READING_RECORD_SIZE)
            .ok_or_else(|| short_record("reading", bytes.len(), READING_RECORD_SIZE))?,
    );
    let label_original = raw.label_original;
    let label_user = raw.label_user;
    let unit = raw.unit;
    Ok(SensorReading {
        kind: ReadingKind::from_raw(u32::from_le(raw.kind)),
        sensor_index: u32::from_le(raw.sensor_index),
        sensor_id: u32::from_le(raw.sensor_id),
        label_original: fixed_str(&label_original),
        label_user: fixed_str(&label_user),
        unit: fixed_str(&unit),
        value: f64::from_bits(u64::from_le(raw.value.to_bits())),
        value_min: f64::from_bits(u64::from_le(raw.value_min.to_bits())),
        value_max: f64::from_bits(u64::from_le(raw.value_max.to_bits())),
        value_avg: f64::from_bits(u64::from_le(raw.value_avg.to_bits())),
    })
}

/// Builders for synthetic regions, used by tests and the in-memory opener
pub mod encode {
    use super::*;

    fn put_str(dst: &mut [u8], s: &str) {
        let n = s.len().min(dst.len().saturating_sub(1));
        dst[..n].copy_from_slice(&s.as_bytes()[..n]);
    }

    /// One sensor group with its readings, as the publisher would lay it out
    #[derive(Debug, Clone, Default)]
    pub struct GroupSpec {
        pub sensor_id: u32,
        pub name: String,
        pub readings: Vec<(String, f64)>,
    }

    impl GroupSpec {
        pub fn new(name: &str, readings: &[(&str, f64)]) -> Self {
            Self {
                sensor_id: 0,
                name: name.to_string(),
                readings: readings
                    .iter()
                    .map(|(label, value)| (label.to_string(), *value))
                    .collect(),
            }
        }
    }

    /// Encode a complete region: header, sensor section, reading section
    pub fn region(groups: &[GroupSpec]) -> Vec<u8> {
        let sensor_count = groups.len();
        let reading_count: usize = groups.iter().map(|g| g.readings.len()).sum();
        let sensor_offset = HEADER_SIZE;
        let reading_offset = sensor_offset + sensor_count * SENSOR_RECORD_SIZE;

        let header = RawHeader {
            signature: SIGNATURE_ACTIVE.to_le(),
            version: 2u32.to_le(),
            revision: 0,
            poll_time: 0,
            sensor_section_offset: (sensor_offset as u32).to_le(),
            sensor_element_size: (SENSOR_RECORD_SIZE as u32).to_le(),
            sensor_element_count: (sensor_count as u32).to_le(),
            reading_section_offset: (reading_offset as u32).to_le(),
            reading_element_size: (READING_RECORD_SIZE as u32).to_le(),
            reading_element_count: (reading_count as u32).to_le(),
        };

        let mut out = Vec::with_capacity(reading_offset + reading_count * READING_RECORD_SIZE);
        out.extend_from_slice(bytemuck::bytes_of(&header));

        for group in groups {
            let mut raw = RawSensor::zeroed();
            raw.sensor_id = group.sensor_id.to_le();
            put_str(&mut raw.name_original, &group.name);
            put_str(&mut raw.name_user, &group.name);
            out.extend_from_slice(bytemuck::bytes_of(&raw));
        }

        for (index, group) in groups.iter().enumerate() {
            for (label, value) in &group.readings {
                let mut raw = RawReading::zeroed();
                raw.kind = 8u32.to_le();
                raw.sensor_index = (index as u32).to_le();
                raw.sensor_id = group.sensor_id.to_le();
                put_str(&mut raw.label_original, label);
                put_str(&mut raw.label_user, label);
                raw.value = f64::from_bits(value.to_bits().to_le());
                raw.value_min = raw.value;
                raw.value_max = raw.value;
                raw.value_avg = raw.value;
                out.extend_from_slice(bytemuck::bytes_of(&raw));
            }
        }
        out
    }
}
