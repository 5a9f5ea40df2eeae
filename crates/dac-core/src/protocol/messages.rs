//! Protocol data model: device identity, status snapshots, points and commands.
//!
//! Every type here is a plain value.  Byte layouts live in
//! [`crate::protocol::codec`]; this module only describes *what* travels on
//! the wire, not how it is packed.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────────────────────

/// UDP port on which devices broadcast their identity and status.
pub const BROADCAST_PORT: u16 = 7654;

/// TCP port of the device command channel.
pub const COMMAND_PORT: u16 = 7765;

/// Size of a discovery broadcast payload.
pub const BROADCAST_SIZE: usize = 36;

/// Size of the identity prefix of a broadcast (everything before the status).
pub const IDENTITY_SIZE: usize = 16;

/// Size of an encoded [`StatusSnapshot`].
pub const STATUS_SIZE: usize = 20;

/// Size of every command response frame: ack + echoed command + status.
pub const RESPONSE_SIZE: usize = 22;

/// Size of one encoded [`Point`] record.
pub const POINT_SIZE: usize = 18;

/// Size of a `begin` / `update` command frame.
pub const BEGIN_COMMAND_SIZE: usize = 7;

/// Size of a `queue rate` command frame.
pub const QUEUE_COMMAND_SIZE: usize = 5;

/// Size of the `write` command header (tag + point count).
pub const WRITE_HEADER_SIZE: usize = 3;

/// Length of the raw, NUL-padded firmware version string.
pub const VERSION_STRING_SIZE: usize = 32;

/// Lowest software revision that answers the `'v'` version query.
pub const VERSION_QUERY_MIN_SW_REVISION: u16 = 2;

/// Ack byte of a successful response.
pub const ACK: u8 = b'a';

/// Command tag bytes.
pub mod tag {
    pub const PING: u8 = b'?';
    pub const PREPARE: u8 = b'p';
    pub const STOP: u8 = b's';
    pub const EMERGENCY_STOP: u8 = 0xFF;
    pub const CLEAR_EMERGENCY_STOP: u8 = b'c';
    pub const BEGIN: u8 = b'b';
    pub const UPDATE: u8 = b'u';
    pub const QUEUE_RATE: u8 = b'q';
    pub const WRITE: u8 = b'd';
    pub const VERSION: u8 = b'v';
}

/// Bits of the [`Point::flags`] word.
pub mod point_flags {
    /// Apply the next queued point rate starting at this point.
    pub const RATE_CHANGE: u16 = 0x8000;
}

// ── Identity ──────────────────────────────────────────────────────────────────

/// Hardware MAC address; the stable identity of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Short numeric id built from the last three bytes, as printed on the
    /// device label.
    pub fn short_id(&self) -> u32 {
        u32::from(self.0[3]) << 16 | u32::from(self.0[4]) << 8 | u32::from(self.0[5])
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

/// Static description of a device, read from its broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub mac: MacAddress,
    pub hw_revision: u16,
    pub sw_revision: u16,
    /// Maximum number of points the device can hold un-played.
    pub buffer_capacity: u16,
    /// Maximum supported point rate in points per second.
    pub max_point_rate: u32,
}

impl DeviceIdentity {
    /// Whether this firmware answers the `'v'` version query.
    pub fn supports_version_query(&self) -> bool {
        self.sw_revision >= VERSION_QUERY_MIN_SW_REVISION
    }
}

// ── Status ────────────────────────────────────────────────────────────────────

/// State of the light engine (beam output safety chain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LightEngineState {
    #[default]
    Ready,
    Warmup,
    Cooldown,
    EmergencyStop,
    /// A value this library does not know; kept so it re-encodes unchanged.
    Unknown(u8),
}

impl From<u8> for LightEngineState {
    fn from(value: u8) -> Self {
        match value {
            0 => LightEngineState::Ready,
            1 => LightEngineState::Warmup,
            2 => LightEngineState::Cooldown,
            3 => LightEngineState::EmergencyStop,
            other => LightEngineState::Unknown(other),
        }
    }
}

impl From<LightEngineState> for u8 {
    fn from(state: LightEngineState) -> Self {
        match state {
            LightEngineState::Ready => 0,
            LightEngineState::Warmup => 1,
            LightEngineState::Cooldown => 2,
            LightEngineState::EmergencyStop => 3,
            LightEngineState::Unknown(other) => other,
        }
    }
}

/// Playback state machine of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackState {
    #[default]
    Idle,
    Prepared,
    Playing,
    Unknown(u8),
}

impl From<u8> for PlaybackState {
    fn from(value: u8) -> Self {
        match value {
            0 => PlaybackState::Idle,
            1 => PlaybackState::Prepared,
            2 => PlaybackState::Playing,
            other => PlaybackState::Unknown(other),
        }
    }
}

impl From<PlaybackState> for u8 {
    fn from(state: PlaybackState) -> Self {
        match state {
            PlaybackState::Idle => 0,
            PlaybackState::Prepared => 1,
            PlaybackState::Playing => 2,
            PlaybackState::Unknown(other) => other,
        }
    }
}

/// Live device status, carried by every broadcast and every command response.
///
/// A snapshot is always replaced as a whole; fields are never merged from two
/// different frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub protocol_version: u8,
    pub light_engine_state: LightEngineState,
    pub playback_state: PlaybackState,
    /// Point source selector (0 = network stream).
    pub source: u8,
    pub light_engine_flags: u16,
    pub playback_flags: u16,
    pub source_flags: u16,
    /// Points buffered on the device and not yet played.
    pub buffer_fullness: u16,
    /// Current output rate in points per second.
    pub point_rate: u32,
    /// Total points played since the stream began.
    pub point_count: u32,
}

impl StatusSnapshot {
    pub fn is_playing(&self) -> bool {
        self.playback_state == PlaybackState::Playing
    }
}

// ── Points ────────────────────────────────────────────────────────────────────

/// One output sample: position, colour and auxiliary channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i16,
    pub y: i16,
    pub r: u16,
    pub g: u16,
    pub b: u16,
    /// Intensity; [`Point::new`] derives it as `max(r, g, b)`.
    pub i: u16,
    pub u1: u16,
    pub u2: u16,
    pub flags: u16,
}

impl Point {
    /// Creates a point whose intensity is the brightest colour channel.
    pub fn new(x: i16, y: i16, r: u16, g: u16, b: u16) -> Self {
        Self {
            x,
            y,
            r,
            g,
            b,
            i: r.max(g).max(b),
            u1: 0,
            u2: 0,
            flags: 0,
        }
    }

    pub fn with_intensity(mut self, i: u16) -> Self {
        self.i = i;
        self
    }

    pub fn with_user_channels(mut self, u1: u16, u2: u16) -> Self {
        self.u1 = u1;
        self.u2 = u2;
        self
    }

    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    /// Returns `true` if this point triggers a queued rate change.
    pub fn changes_rate(&self) -> bool {
        self.flags & point_flags::RATE_CHANGE != 0
    }
}

/// Field order of an encoded point record.
///
/// Two orderings have been seen in the field; the choice is made once per
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointLayout {
    /// `flags, x, y, i, r, g, b, u1, u2`
    #[default]
    Standard,
    /// `flags, x, y, r, g, b, i, u1, u2`
    Legacy,
}

// ── Commands and responses ────────────────────────────────────────────────────

/// Every command the client can issue on the command channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Prepare,
    Stop,
    EmergencyStop,
    ClearEmergencyStop,
    /// Start playback once the buffer holds `low_water_mark` points.
    Begin { low_water_mark: u16, point_rate: u32 },
    /// Change rate / low-water mark while playing.
    Update { low_water_mark: u16, point_rate: u32 },
    /// Queue a rate change, applied at the next point flagged
    /// [`point_flags::RATE_CHANGE`].
    QueueRate { point_rate: u32 },
    Write(Vec<Point>),
    /// Firmware version query; answered with a raw 32-byte string.
    Version,
}

impl Command {
    /// The tag byte that starts the frame and is echoed back in the response.
    pub fn tag(&self) -> u8 {
        match self {
            Command::Ping => tag::PING,
            Command::Prepare => tag::PREPARE,
            Command::Stop => tag::STOP,
            Command::EmergencyStop => tag::EMERGENCY_STOP,
            Command::ClearEmergencyStop => tag::CLEAR_EMERGENCY_STOP,
            Command::Begin { .. } => tag::BEGIN,
            Command::Update { .. } => tag::UPDATE,
            Command::QueueRate { .. } => tag::QUEUE_RATE,
            Command::Write(_) => tag::WRITE,
            Command::Version => tag::VERSION,
        }
    }

    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::Prepare => "prepare",
            Command::Stop => "stop",
            Command::EmergencyStop => "estop",
            Command::ClearEmergencyStop => "clear_estop",
            Command::Begin { .. } => "begin",
            Command::Update { .. } => "update",
            Command::QueueRate { .. } => "queue_rate",
            Command::Write(_) => "write",
            Command::Version => "version",
        }
    }
}

/// Why the device refused a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NakReason {
    /// `'F'`: the point buffer cannot take the data.
    BufferFull,
    /// `'I'`: the command is invalid in the current state.
    Invalid,
    /// `'!'`: the light engine is emergency-stopped.
    EmergencyStop,
}

impl NakReason {
    pub fn from_ack_byte(ack: u8) -> Option<Self> {
        match ack {
            b'F' => Some(NakReason::BufferFull),
            b'I' => Some(NakReason::Invalid),
            b'!' => Some(NakReason::EmergencyStop),
            _ => None,
        }
    }
}

/// A decoded 22-byte response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub ack: u8,
    pub command: u8,
    pub status: StatusSnapshot,
}

impl Response {
    /// `true` when the device acknowledged `expected_command`.
    pub fn acknowledges(&self, expected_command: u8) -> bool {
        self.ack == ACK && self.command == expected_command
    }

    pub fn nak_reason(&self) -> Option<NakReason> {
        NakReason::from_ack_byte(self.ack)
    }
}
