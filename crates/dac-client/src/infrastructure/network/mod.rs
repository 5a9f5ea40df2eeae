//! Network infrastructure for the DAC client.
//!
//! # Sub-modules
//!
//! - **`discovery`** – Listens for UDP broadcasts from devices on the local
//!   network and forwards decoded sightings over an async channel.
//!
//! - **`connection`** – One TCP command channel per device: handshake, the
//!   strict request/response exchange, and the last known status.

pub mod connection;
pub mod discovery;
