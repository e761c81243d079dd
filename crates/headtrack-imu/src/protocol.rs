use crate::types::ImuSample;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;
use thiserror::Error;

/// Sensor readings beyond this magnitude fail the structural sanity check.
/// Real gyro/accel values from the glasses stay orders of magnitude below it.
const MAX_PLAUSIBLE_MAGNITUDE: f32 = 1.0e4;

/// Wire description of one device revision's IMU frames.
///
/// The frame layout is device-specific and at least one sibling model is known
/// to differ, so everything the decoder needs (framing markers, strip lengths,
/// field offsets, endianness) lives here instead of in code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSchema {
    /// Frame start marker.
    #[serde(with = "hex_bytes")]
    pub header: Vec<u8>,
    /// Frame end marker.
    #[serde(with = "hex_bytes")]
    pub footer: Vec<u8>,
    /// Marker distinguishing sensor frames from other message types,
    /// expected at the end of the stripped payload.
    #[serde(with = "hex_bytes")]
    pub sensor_marker: Vec<u8>,
    /// Bytes to skip after the header (session id).
    pub session_id_len: usize,
    /// Bytes to strip before the footer (message tail).
    pub tail_len: usize,
    /// Bytes to skip at the start of the payload (timestamp + static fields).
    pub payload_lead: usize,
    /// Bytes to trim from the end of the payload (sensor marker + date info).
    pub payload_trail: usize,
    /// Byte offsets of the gyro x/y/z words within the sample region.
    pub gyro_offsets: [usize; 3],
    /// Byte offsets of the accel x/y/z words within the sample region.
    pub accel_offsets: [usize; 3],
    /// f32 byte order of the sensor words.
    pub big_endian: bool,
}

impl FrameSchema {
    /// Layout captured from XReal One Pro TCP traffic.
    ///
    /// The six sensor words sit in a 24-byte region: accelerometer x/y/z
    /// first, then gyro z/y/x (the gyro triplet is reversed on the wire).
    pub fn xreal_one_pro() -> Self {
        Self {
            header: vec![0x28, 0x36, 0x00, 0x00, 0x00, 0x80],
            footer: vec![
                0x00, 0x00, 0x00, 0xcf, 0xf7, 0x53, 0xe3, 0xa5, 0x9b, 0x00, 0x00, 0xdb, 0x34,
                0xb6, 0xd7, 0x82, 0xde, 0x1b, 0x43,
            ],
            sensor_marker: vec![0x00, 0x40, 0x1f, 0x00, 0x00, 0x40],
            session_id_len: 8,
            tail_len: 31,
            payload_lead: 20,
            payload_trail: 26,
            gyro_offsets: [20, 16, 12],
            accel_offsets: [0, 4, 8],
            big_endian: false,
        }
    }

    /// Length of the sensor word region required by the configured offsets.
    fn sample_region_len(&self) -> usize {
        self.gyro_offsets
            .iter()
            .chain(self.accel_offsets.iter())
            .map(|&o| o + 4)
            .max()
            .unwrap_or(0)
    }
}

impl Default for FrameSchema {
    fn default() -> Self {
        Self::xreal_one_pro()
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too short after stripping framing")]
    Truncated,
    #[error("not a sensor data frame (missing sensor marker)")]
    NotSensorData,
    #[error("sensor value outside plausible range")]
    ImplausibleMagnitude,
}

impl ProtocolError {
    /// Malformed frames are counted for diagnostics; non-sensor messages are
    /// a normal part of the stream and skipped silently.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, ProtocolError::NotSensorData)
    }
}

/// Streaming decoder for the glasses' IMU TCP protocol.
///
/// Feed raw TCP bytes via `push_bytes`, then drain decoded samples via
/// `next_sample`. Partial frames stay buffered across reads.
pub struct StreamDecoder {
    schema: FrameSchema,
    buffer: VecDeque<u8>,
}

impl StreamDecoder {
    pub fn new(schema: FrameSchema) -> Self {
        Self {
            schema,
            buffer: VecDeque::with_capacity(8192),
        }
    }

    /// Append received bytes to the internal buffer.
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend(data);
    }

    /// Try to extract the next complete frame from the buffer.
    /// Returns `None` until a full header..footer span is available.
    pub fn next_sample(&mut self) -> Option<Result<ImuSample, ProtocolError>> {
        let (frame, frame_end) = {
            let buf = self.buffer.make_contiguous();

            let header_pos = find_pattern(buf, &self.schema.header)?;
            let search_start = header_pos + self.schema.header.len();
            if search_start >= buf.len() {
                return None;
            }
            let footer_pos = find_pattern(&buf[search_start..], &self.schema.footer)?;
            let footer_abs = search_start + footer_pos;
            let end = footer_abs + self.schema.footer.len();

            (buf[header_pos..end].to_vec(), end)
        };

        self.buffer.drain(..frame_end);

        Some(self.parse_frame(&frame))
    }

    /// Parse a complete frame (header to footer inclusive) into a sample.
    fn parse_frame(&self, frame: &[u8]) -> Result<ImuSample, ProtocolError> {
        let schema = &self.schema;
        let front_strip = schema.header.len() + schema.session_id_len;
        let back_strip = schema.footer.len() + schema.tail_len;

        if frame.len() < front_strip + back_strip {
            return Err(ProtocolError::Truncated);
        }
        let payload = &frame[front_strip..frame.len() - back_strip];

        if payload.len() < schema.sensor_marker.len() || !payload.ends_with(&schema.sensor_marker) {
            return Err(ProtocolError::NotSensorData);
        }

        if payload.len() < schema.payload_lead + schema.payload_trail {
            return Err(ProtocolError::Truncated);
        }
        let region = &payload[schema.payload_lead..payload.len() - schema.payload_trail];

        if region.len() < schema.sample_region_len() {
            return Err(ProtocolError::Truncated);
        }

        let word = |offset: usize| -> f32 {
            let bytes: [u8; 4] = region[offset..offset + 4]
                .try_into()
                .unwrap_or([0u8; 4]);
            if schema.big_endian {
                f32::from_be_bytes(bytes)
            } else {
                f32::from_le_bytes(bytes)
            }
        };

        let gyro = Vec3::new(
            word(schema.gyro_offsets[0]),
            word(schema.gyro_offsets[1]),
            word(schema.gyro_offsets[2]),
        );
        let accel = Vec3::new(
            word(schema.accel_offsets[0]),
            word(schema.accel_offsets[1]),
            word(schema.accel_offsets[2]),
        );

        let plausible = |v: Vec3| {
            v.is_finite() && v.abs().max_element() <= MAX_PLAUSIBLE_MAGNITUDE
        };
        if !plausible(gyro) || !plausible(accel) {
            return Err(ProtocolError::ImplausibleMagnitude);
        }

        Ok(ImuSample {
            timestamp: Instant::now(),
            gyro,
            accel,
        })
    }
}

/// Find the first occurrence of `pattern` in `data`.
fn find_pattern(data: &[u8], pattern: &[u8]) -> Option<usize> {
    if pattern.is_empty() || data.len() < pattern.len() {
        return None;
    }
    data.windows(pattern.len()).position(|window| window == pattern)
}

/// Serde helper: byte markers as hex strings in config files.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        s.serialize_str(&hex)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let hex = String::deserialize(d)?;
        if hex.len() % 2 != 0 {
            return Err(serde::de::Error::custom("odd-length hex string"));
        }
        (0..hex.len())
            .step_by(2)
            .map(|i| {
                u8::from_str_radix(&hex[i..i + 2], 16)
                    .map_err(|_| serde::de::Error::custom("invalid hex digit"))
            })
            .collect()
    }
}

/// Build a synthetic frame carrying the given sensor words.
#[cfg(test)]
pub(crate) fn encode_frame(schema: &FrameSchema, gyro: [f32; 3], accel: [f32; 3]) -> Vec<u8> {
    let mut region = vec![0u8; schema.sample_region_len()];
    let mut put = |offset: usize, value: f32| {
        let bytes = if schema.big_endian {
            value.to_be_bytes()
        } else {
            value.to_le_bytes()
        };
        region[offset..offset + 4].copy_from_slice(&bytes);
    };
    for (i, &v) in gyro.iter().enumerate() {
        put(schema.gyro_offsets[i], v);
    }
    for (i, &v) in accel.iter().enumerate() {
        put(schema.accel_offsets[i], v);
    }

    let mut frame = Vec::new();
    frame.extend_from_slice(&schema.header);
    frame.extend_from_slice(&vec![0u8; schema.session_id_len]);
    frame.extend_from_slice(&vec![0u8; schema.payload_lead]);
    frame.extend_from_slice(&region);
    // Trailing payload bytes up to the trail length, ending in the marker.
    frame.extend_from_slice(&vec![
        0u8;
        schema.payload_trail - schema.sensor_marker.len()
    ]);
    frame.extend_from_slice(&schema.sensor_marker);
    frame.extend_from_slice(&vec![0u8; schema.tail_len]);
    frame.extend_from_slice(&schema.footer);
    frame
}
