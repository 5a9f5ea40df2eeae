//! Infrastructure layer for the DAC client.
//!
//! Contains OS-facing adapters: the UDP discovery socket, the TCP command
//! channel and file-system config storage.
//!
//! **Dependency rule**: this layer may depend on `application` and `dac_core`,
//! but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
