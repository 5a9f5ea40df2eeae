//! Fixed-layout binary codec for broadcasts, status snapshots, points and
//! command frames.
//!
//! Wire formats (all multi-byte integers little-endian):
//! ```text
//! broadcast (36): [mac:6][hw_rev:2][sw_rev:2][buffer_capacity:2][max_point_rate:4][status:20]
//! status    (20): [proto:1][le_state:1][playback:1][source:1][le_flags:2][pb_flags:2]
//!                 [src_flags:2][fullness:2][point_rate:4][point_count:4]
//! response  (22): [ack:1][command:1][status:20]
//! point     (18): [flags:2][x:2][y:2][i:2][r:2][g:2][b:2][u1:2][u2:2]   (standard)
//!                 [flags:2][x:2][y:2][r:2][g:2][b:2][i:2][u1:2][u2:2]   (legacy)
//! begin/update (7): [tag:1][low_water_mark:2][point_rate:4]
//! queue rate   (5): [tag:1][point_rate:4]
//! write    (3+18n): [tag:1][count:2][point:18]*count
//! others       (1): [tag:1]
//! ```
//!
//! Every decoder checks the length before touching the buffer; no decoder
//! reads past the slice it is given.

use crate::protocol::messages::{
    Command, DeviceIdentity, MacAddress, Point, PointLayout, Response, StatusSnapshot,
    BEGIN_COMMAND_SIZE, BROADCAST_SIZE, IDENTITY_SIZE, POINT_SIZE, QUEUE_COMMAND_SIZE,
    RESPONSE_SIZE, STATUS_SIZE, WRITE_HEADER_SIZE,
};
use thiserror::Error;

/// Errors produced while encoding or decoding wire data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// A fixed-size packet arrived with the wrong length.
    #[error("malformed packet: expected {expected} bytes, got {actual}")]
    MalformedPacket { expected: usize, actual: usize },

    /// The byte slice ends before the structure does.
    #[error("insufficient data: need {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The bytes have the right length but describe an impossible state.
    #[error("invalid field {field}: {detail}")]
    InvalidField { field: &'static str, detail: String },

    /// A write batch cannot be described by the 16-bit point count.
    #[error("too many points in one write: {0} (max 65535)")]
    TooManyPoints(usize),
}

// ── Broadcasts ────────────────────────────────────────────────────────────────

/// Decodes a 36-byte discovery broadcast.
///
/// # Errors
///
/// Returns [`WireError::MalformedPacket`] if `bytes` is not exactly 36 bytes
/// long, and [`WireError::InvalidField`] if the reported buffer fullness
/// exceeds the advertised capacity.
///
/// # Examples
///
/// ```rust
/// use dac_core::protocol::codec::{decode_broadcast, encode_broadcast};
/// use dac_core::protocol::messages::{DeviceIdentity, MacAddress, StatusSnapshot};
///
/// let identity = DeviceIdentity {
///     mac: MacAddress([0, 4, 0xa3, 1, 2, 3]),
///     hw_revision: 1,
///     sw_revision: 2,
///     buffer_capacity: 1799,
///     max_point_rate: 100_000,
/// };
/// let bytes = encode_broadcast(&identity, &StatusSnapshot::default());
/// let (decoded, _status) = decode_broadcast(&bytes).unwrap();
/// assert_eq!(decoded, identity);
/// ```
pub fn decode_broadcast(bytes: &[u8]) -> Result<(DeviceIdentity, StatusSnapshot), WireError> {
    if bytes.len() != BROADCAST_SIZE {
        return Err(WireError::MalformedPacket {
            expected: BROADCAST_SIZE,
            actual: bytes.len(),
        });
    }

    let mut r = Reader::new(&bytes[..IDENTITY_SIZE]);
    let mut mac = [0u8; 6];
    mac.copy_from_slice(r.take(6)?);
    let identity = DeviceIdentity {
        mac: MacAddress(mac),
        hw_revision: r.u16()?,
        sw_revision: r.u16()?,
        buffer_capacity: r.u16()?,
        max_point_rate: r.u32()?,
    };
    let status = decode_status(&bytes[IDENTITY_SIZE..])?;

    if status.buffer_fullness > identity.buffer_capacity {
        return Err(WireError::InvalidField {
            field: "buffer_fullness",
            detail: format!(
                "{} exceeds advertised capacity {}",
                status.buffer_fullness, identity.buffer_capacity
            ),
        });
    }

    Ok((identity, status))
}

/// Encodes a discovery broadcast; the inverse of [`decode_broadcast`].
pub fn encode_broadcast(identity: &DeviceIdentity, status: &StatusSnapshot) -> [u8; BROADCAST_SIZE] {
    let mut buf = [0u8; BROADCAST_SIZE];
    buf[0..6].copy_from_slice(&identity.mac.0);
    buf[6..8].copy_from_slice(&identity.hw_revision.to_le_bytes());
    buf[8..10].copy_from_slice(&identity.sw_revision.to_le_bytes());
    buf[10..12].copy_from_slice(&identity.buffer_capacity.to_le_bytes());
    buf[12..16].copy_from_slice(&identity.max_point_rate.to_le_bytes());
    buf[IDENTITY_SIZE..].copy_from_slice(&encode_status(status));
    buf
}

// ── Status ────────────────────────────────────────────────────────────────────

/// Decodes a 20-byte status snapshot.
///
/// # Errors
///
/// Returns [`WireError::InsufficientData`] for short input and
/// [`WireError::MalformedPacket`] for trailing bytes.
pub fn decode_status(bytes: &[u8]) -> Result<StatusSnapshot, WireError> {
    if bytes.len() < STATUS_SIZE {
        return Err(WireError::InsufficientData {
            needed: STATUS_SIZE,
            available: bytes.len(),
        });
    }
    if bytes.len() > STATUS_SIZE {
        return Err(WireError::MalformedPacket {
            expected: STATUS_SIZE,
            actual: bytes.len(),
        });
    }

    let mut r = Reader::new(bytes);
    Ok(StatusSnapshot {
        protocol_version: r.u8()?,
        light_engine_state: r.u8()?.into(),
        playback_state: r.u8()?.into(),
        source: r.u8()?,
        light_engine_flags: r.u16()?,
        playback_flags: r.u16()?,
        source_flags: r.u16()?,
        buffer_fullness: r.u16()?,
        point_rate: r.u32()?,
        point_count: r.u32()?,
    })
}

/// Encodes a status snapshot; the inverse of [`decode_status`].
pub fn encode_status(status: &StatusSnapshot) -> [u8; STATUS_SIZE] {
    let mut buf = [0u8; STATUS_SIZE];
    buf[0] = status.protocol_version;
    buf[1] = status.light_engine_state.into();
    buf[2] = status.playback_state.into();
    buf[3] = status.source;
    buf[4..6].copy_from_slice(&status.light_engine_flags.to_le_bytes());
    buf[6..8].copy_from_slice(&status.playback_flags.to_le_bytes());
    buf[8..10].copy_from_slice(&status.source_flags.to_le_bytes());
    buf[10..12].copy_from_slice(&status.buffer_fullness.to_le_bytes());
    buf[12..16].copy_from_slice(&status.point_rate.to_le_bytes());
    buf[16..20].copy_from_slice(&status.point_count.to_le_bytes());
    buf
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// Decodes a 22-byte response frame.
///
/// This does not judge the ack byte; see [`Response::acknowledges`].
///
/// # Errors
///
/// Returns [`WireError::InsufficientData`] or [`WireError::MalformedPacket`]
/// when `bytes` is not exactly 22 bytes long.
pub fn decode_response(bytes: &[u8]) -> Result<Response, WireError> {
    if bytes.len() < RESPONSE_SIZE {
        return Err(WireError::InsufficientData {
            needed: RESPONSE_SIZE,
            available: bytes.len(),
        });
    }
    if bytes.len() > RESPONSE_SIZE {
        return Err(WireError::MalformedPacket {
            expected: RESPONSE_SIZE,
            actual: bytes.len(),
        });
    }
    Ok(Response {
        ack: bytes[0],
        command: bytes[1],
        status: decode_status(&bytes[2..])?,
    })
}

/// Encodes a response frame. Devices send these; the client only needs it to
/// build fixtures.
pub fn encode_response(response: &Response) -> [u8; RESPONSE_SIZE] {
    let mut buf = [0u8; RESPONSE_SIZE];
    buf[0] = response.ack;
    buf[1] = response.command;
    buf[2..].copy_from_slice(&encode_status(&response.status));
    buf
}

// ── Points ────────────────────────────────────────────────────────────────────

/// Encodes a point using [`PointLayout::Standard`].
pub fn encode_point(point: &Point) -> [u8; POINT_SIZE] {
    PointLayout::Standard.encode(point)
}

/// Decodes a point encoded with [`PointLayout::Standard`].
///
/// # Errors
///
/// Returns [`WireError::InsufficientData`] if fewer than 18 bytes are given.
pub fn decode_point(bytes: &[u8]) -> Result<Point, WireError> {
    PointLayout::Standard.decode(bytes)
}

impl PointLayout {
    /// Encodes `point` in this field order.
    pub fn encode(self, point: &Point) -> [u8; POINT_SIZE] {
        let colour = match self {
            PointLayout::Standard => [point.i, point.r, point.g, point.b],
            PointLayout::Legacy => [point.r, point.g, point.b, point.i],
        };

        let mut buf = [0u8; POINT_SIZE];
        buf[0..2].copy_from_slice(&point.flags.to_le_bytes());
        buf[2..4].copy_from_slice(&point.x.to_le_bytes());
        buf[4..6].copy_from_slice(&point.y.to_le_bytes());
        for (n, channel) in colour.iter().enumerate() {
            let off = 6 + n * 2;
            buf[off..off + 2].copy_from_slice(&channel.to_le_bytes());
        }
        buf[14..16].copy_from_slice(&point.u1.to_le_bytes());
        buf[16..18].copy_from_slice(&point.u2.to_le_bytes());
        buf
    }

    /// Decodes one point record from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InsufficientData`] if fewer than 18 bytes are given.
    pub fn decode(self, bytes: &[u8]) -> Result<Point, WireError> {
        let mut r = Reader::new(bytes);
        let flags = r.u16()?;
        let x = r.i16()?;
        let y = r.i16()?;
        let (i, red, g, b) = match self {
            PointLayout::Standard => {
                let i = r.u16()?;
                (i, r.u16()?, r.u16()?, r.u16()?)
            }
            PointLayout::Legacy => {
                let (red, g, b) = (r.u16()?, r.u16()?, r.u16()?);
                (r.u16()?, red, g, b)
            }
        };
        Ok(Point {
            x,
            y,
            r: red,
            g,
            b,
            i,
            u1: r.u16()?,
            u2: r.u16()?,
            flags,
        })
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Encodes a command frame; point records use `layout`.
///
/// # Errors
///
/// Returns [`WireError::TooManyPoints`] if a write batch holds more points
/// than the 16-bit count can express.
///
/// # Examples
///
/// ```rust
/// use dac_core::protocol::codec::encode_command;
/// use dac_core::protocol::messages::{Command, PointLayout};
///
/// let frame = encode_command(&Command::Begin { low_water_mark: 0, point_rate: 30_000 },
///     PointLayout::Standard).unwrap();
/// assert_eq!(frame, vec![b'b', 0, 0, 0x30, 0x75, 0, 0]);
/// ```
pub fn encode_command(command: &Command, layout: PointLayout) -> Result<Vec<u8>, WireError> {
    let tag = command.tag();
    let buf = match command {
        Command::Begin {
            low_water_mark,
            point_rate,
        }
        | Command::Update {
            low_water_mark,
            point_rate,
        } => {
            let mut buf = Vec::with_capacity(BEGIN_COMMAND_SIZE);
            buf.push(tag);
            buf.extend_from_slice(&low_water_mark.to_le_bytes());
            buf.extend_from_slice(&point_rate.to_le_bytes());
            buf
        }
        Command::QueueRate { point_rate } => {
            let mut buf = Vec::with_capacity(QUEUE_COMMAND_SIZE);
            buf.push(tag);
            buf.extend_from_slice(&point_rate.to_le_bytes());
            buf
        }
        Command::Write(points) => {
            let count =
                u16::try_from(points.len()).map_err(|_| WireError::TooManyPoints(points.len()))?;
            let mut buf = Vec::with_capacity(WRITE_HEADER_SIZE + points.len() * POINT_SIZE);
            buf.push(tag);
            buf.extend_from_slice(&count.to_le_bytes());
            for point in points {
                buf.extend_from_slice(&layout.encode(point));
            }
            buf
        }
        Command::Ping
        | Command::Prepare
        | Command::Stop
        | Command::EmergencyStop
        | Command::ClearEmergencyStop
        | Command::Version => vec![tag],
    };
    Ok(buf)
}

/// Turns the raw 32-byte version answer into a string, dropping NUL padding
/// and surrounding whitespace.
pub fn decode_version_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .replace('\0', " ")
        .trim()
        .to_string()
}

// ── Utility helpers ───────────────────────────────────────────────────────────

/// Little-endian cursor that fails instead of reading out of bounds.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(WireError::InsufficientData {
                needed: end,
                available: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn i16(&mut self) -> Result<i16, WireError> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{LightEngineState, PlaybackState, ACK};

    fn sample_identity() -> DeviceIdentity {
        DeviceIdentity {
            mac: MacAddress([0x00, 0x04, 0xA3, 0x3D, 0x7E, 0x01]),
            hw_revision: 3,
            sw_revision: 2,
            buffer_capacity: 1799,
            max_point_rate: 100_000,
        }
    }

    fn sample_status() -> StatusSnapshot {
        StatusSnapshot {
            protocol_version: 1,
            light_engine_state: LightEngineState::Ready,
            playback_state: PlaybackState::Playing,
            source: 0,
            light_engine_flags: 0x0010,
            playback_flags: 0x0002,
            source_flags: 0,
            buffer_fullness: 1234,
            point_rate: 30_000,
            point_count: 0xDEAD_BEEF,
        }
    }

    // ── Broadcast ─────────────────────────────────────────────────────────────

    #[test]
    fn test_broadcast_round_trip_reproduces_bytes() {
        let bytes = encode_broadcast(&sample_identity(), &sample_status());
        let (identity, status) = decode_broadcast(&bytes).expect("decode");
        assert_eq!(identity, sample_identity());
        assert_eq!(status, sample_status());
        assert_eq!(encode_broadcast(&identity, &status), bytes);
    }

    #[test]
    fn test_broadcast_field_offsets_are_little_endian() {
        let bytes = encode_broadcast(&sample_identity(), &sample_status());
        assert_eq!(&bytes[0..6], &[0x00, 0x04, 0xA3, 0x3D, 0x7E, 0x01]);
        assert_eq!(u16::from_le_bytes([bytes[10], bytes[11]]), 1799);
        assert_eq!(
            u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
            100_000
        );
        // playback_state sits at byte 2 of the embedded status
        assert_eq!(bytes[IDENTITY_SIZE + 2], 2);
    }

    #[test]
    fn test_decode_broadcast_rejects_short_packet() {
        let result = decode_broadcast(&[0u8; 35]);
        assert_eq!(
            result,
            Err(WireError::MalformedPacket {
                expected: 36,
                actual: 35
            })
        );
    }

    #[test]
    fn test_decode_broadcast_rejects_long_packet() {
        let result = decode_broadcast(&[0u8; 40]);
        assert!(matches!(result, Err(WireError::MalformedPacket { actual: 40, .. })));
    }

    #[test]
    fn test_decode_broadcast_rejects_fullness_above_capacity() {
        let mut status = sample_status();
        status.buffer_fullness = 1800;
        let bytes = encode_broadcast(&sample_identity(), &status);
        assert!(matches!(
            decode_broadcast(&bytes),
            Err(WireError::InvalidField { field: "buffer_fullness", .. })
        ));
    }

    // ── Status / response ─────────────────────────────────────────────────────

    #[test]
    fn test_decode_status_rejects_truncated_input() {
        let result = decode_status(&[0u8; 19]);
        assert_eq!(
            result,
            Err(WireError::InsufficientData {
                needed: 20,
                available: 19
            })
        );
    }

    #[test]
    fn test_decode_status_keeps_unknown_state_values() {
        let mut bytes = encode_status(&sample_status());
        bytes[1] = 0x42;
        bytes[2] = 0x07;
        let status = decode_status(&bytes).unwrap();
        assert_eq!(status.light_engine_state, LightEngineState::Unknown(0x42));
        assert_eq!(status.playback_state, PlaybackState::Unknown(0x07));
        assert_eq!(encode_status(&status), bytes);
    }

    #[test]
    fn test_decode_response_splits_ack_command_and_status() {
        let frame = encode_response(&Response {
            ack: ACK,
            command: b'd',
            status: sample_status(),
        });
        let resp = decode_response(&frame).unwrap();
        assert_eq!(resp.ack, b'a');
        assert_eq!(resp.command, b'd');
        assert_eq!(resp.status.buffer_fullness, 1234);
    }

    #[test]
    fn test_decode_response_rejects_truncated_frame() {
        assert!(matches!(
            decode_response(&[b'a', b'?', 0, 0]),
            Err(WireError::InsufficientData { needed: 22, .. })
        ));
    }

    // ── Points ────────────────────────────────────────────────────────────────

    #[test]
    fn test_encode_point_standard_field_order() {
        let p = Point {
            x: -2,
            y: 3,
            r: 0x0102,
            g: 0x0304,
            b: 0x0506,
            i: 0x0708,
            u1: 0x090A,
            u2: 0x0B0C,
            flags: 0x8000,
        };
        let bytes = encode_point(&p);
        assert_eq!(
            bytes,
            [
                0x00, 0x80, // flags
                0xFE, 0xFF, // x
                0x03, 0x00, // y
                0x08, 0x07, // i
                0x02, 0x01, // r
                0x04, 0x03, // g
                0x06, 0x05, // b
                0x0A, 0x09, // u1
                0x0C, 0x0B, // u2
            ]
        );
    }

    #[test]
    fn test_encode_point_legacy_puts_intensity_after_blue() {
        let p = Point::new(0, 0, 1, 2, 3).with_intensity(9);
        let bytes = PointLayout::Legacy.encode(&p);
        assert_eq!(&bytes[6..14], &[1, 0, 2, 0, 3, 0, 9, 0]);
    }

    #[test]
    fn test_point_round_trip_extremes_both_layouts() {
        let points = [
            Point::new(i16::MIN, i16::MAX, 0, 65535, 0),
            Point::new(-1, 0, 65535, 65535, 65535),
            Point::new(0, 0, 0, 0, 0).with_user_channels(1, 65535),
        ];
        for layout in [PointLayout::Standard, PointLayout::Legacy] {
            for p in points {
                assert_eq!(layout.decode(&layout.encode(&p)).unwrap(), p);
            }
        }
    }

    #[test]
    fn test_decode_point_rejects_truncated_record() {
        assert!(matches!(
            decode_point(&[0u8; 17]),
            Err(WireError::InsufficientData { needed: 18, .. })
        ));
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    #[test]
    fn test_single_byte_commands() {
        for (cmd, tag) in [
            (Command::Ping, b'?'),
            (Command::Prepare, b'p'),
            (Command::Stop, b's'),
            (Command::EmergencyStop, 0xFF),
            (Command::ClearEmergencyStop, b'c'),
            (Command::Version, b'v'),
        ] {
            assert_eq!(encode_command(&cmd, PointLayout::Standard).unwrap(), vec![tag]);
        }
    }

    #[test]
    fn test_update_command_is_seven_bytes() {
        let frame = encode_command(
            &Command::Update {
                low_water_mark: 0x0102,
                point_rate: 0x0A0B0C0D,
            },
            PointLayout::Standard,
        )
        .unwrap();
        assert_eq!(frame, vec![b'u', 0x02, 0x01, 0x0D, 0x0C, 0x0B, 0x0A]);
    }

    #[test]
    fn test_queue_rate_command_is_five_bytes() {
        let frame =
            encode_command(&Command::QueueRate { point_rate: 20_000 }, PointLayout::Standard)
                .unwrap();
        assert_eq!(frame.len(), QUEUE_COMMAND_SIZE);
        assert_eq!(frame[0], b'q');
        assert_eq!(u32::from_le_bytes([frame[1], frame[2], frame[3], frame[4]]), 20_000);
    }

    #[test]
    fn test_write_command_header_and_records() {
        let points = vec![Point::new(1, 2, 3, 4, 5), Point::new(-6, -7, 8, 9, 10)];
        let frame = encode_command(&Command::Write(points.clone()), PointLayout::Standard).unwrap();
        assert_eq!(frame.len(), WRITE_HEADER_SIZE + 2 * POINT_SIZE);
        assert_eq!(&frame[..3], &[b'd', 2, 0]);
        assert_eq!(decode_point(&frame[3..21]).unwrap(), points[0]);
        assert_eq!(decode_point(&frame[21..]).unwrap(), points[1]);
    }

    #[test]
    fn test_empty_write_command_is_header_only() {
        let frame = encode_command(&Command::Write(vec![]), PointLayout::Standard).unwrap();
        assert_eq!(frame, vec![b'd', 0, 0]);
    }

    #[test]
    fn test_write_command_rejects_oversized_batch() {
        let points = vec![Point::default(); 65_536];
        assert_eq!(
            encode_command(&Command::Write(points), PointLayout::Standard),
            Err(WireError::TooManyPoints(65_536))
        );
    }

    #[test]
    fn test_decode_version_string_trims_nul_padding() {
        let mut raw = [0u8; 32];
        raw[..9].copy_from_slice(b"v2.1-8f3a");
        assert_eq!(decode_version_string(&raw), "v2.1-8f3a");
    }
}
