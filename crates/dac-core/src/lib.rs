//! # dac-core
//!
//! Shared library for the laser DAC client containing the wire data model
//! and the fixed-layout binary codec.
//!
//! It has no dependencies on sockets, timers or an async runtime; everything
//! here is a pure function over byte slices and plain values.
//!
//! # Architecture overview
//!
//! A laser DAC announces itself once per second with a 36-byte UDP broadcast
//! (identity + status).  A client then opens a TCP command channel and
//! exchanges single command frames for 22-byte responses, each of which
//! carries a fresh status snapshot.  Streaming is a loop of `write` commands
//! that keeps the device's point buffer topped up.
//!
//! - **`protocol::messages`** – what travels on the wire: [`DeviceIdentity`],
//!   [`StatusSnapshot`], [`Point`], [`Command`] and [`Response`].
//!
//! - **`protocol::codec`** – how it is packed: little-endian, fixed offsets,
//!   strict length checks.

pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `dac_core::Point` instead of `dac_core::protocol::messages::Point`.
pub use protocol::codec::{
    decode_broadcast, decode_response, decode_status, encode_command, WireError,
};
pub use protocol::messages::{
    Command, DeviceIdentity, LightEngineState, MacAddress, NakReason, PlaybackState, Point,
    PointLayout, Response, StatusSnapshot,
};
