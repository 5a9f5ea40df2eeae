//! Error type shared by the command engine and the stream writer.

use std::net::SocketAddr;
use std::time::Duration;

use dac_core::{NakReason, WireError};
use thiserror::Error;

/// Everything that can go wrong talking to a device.
///
/// After any variant other than [`DacError::AlreadyPlaying`] and
/// [`DacError::Malformed`] raised before sending, the connection that
/// produced it refuses further commands except emergency stop.
#[derive(Debug, Error)]
pub enum DacError {
    /// Bytes did not decode, or a command could not be encoded.
    #[error("malformed data: {0}")]
    Malformed(#[from] WireError),

    /// The TCP connection could not be established.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The peer did not answer within the deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The response did not acknowledge the command just sent.
    #[error("protocol violation on '{command}': ack=0x{ack:02x} echoed=0x{echoed:02x}")]
    Protocol {
        command: &'static str,
        ack: u8,
        echoed: u8,
    },

    /// Streaming was requested while the device is already playing.
    #[error("device is already playing")]
    AlreadyPlaying,

    /// An earlier failure left the connection in an unknown state.
    #[error("connection is unusable after an earlier error; reconnect")]
    ConnectionUnusable,

    /// The shared running flag was cleared.
    #[error("operation cancelled")]
    Cancelled,

    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DacError {
    /// The device's refusal reason, when this is a NAK with a known code.
    pub fn nak_reason(&self) -> Option<NakReason> {
        match self {
            DacError::Protocol { ack, .. } => NakReason::from_ack_byte(*ack),
            _ => None,
        }
    }

    /// `true` for the variants that mean the device refused a command.
    pub fn is_protocol(&self) -> bool {
        matches!(self, DacError::Protocol { .. })
    }
}
