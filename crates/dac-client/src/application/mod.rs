//! Application layer: device bookkeeping and streaming use cases.
//!
//! Nothing here opens a socket or touches the file system.  The stream writer
//! talks to a device through the [`stream::CommandChannel`] trait, which the
//! TCP connection in `infrastructure::network` implements; tests drive it
//! with in-memory fakes.
//!
//! # Sub-modules
//!
//! - **`registry`** – The live set of discovered devices, with expiry, plus
//!   the tasks that feed and prune it.
//!
//! - **`stream`** – The flow-controlled writer that keeps a device buffer
//!   topped up from a [`stream::PointSource`].
//!
//! - **`pattern`** – Built-in point sources.

pub mod pattern;
pub mod registry;
pub mod stream;
