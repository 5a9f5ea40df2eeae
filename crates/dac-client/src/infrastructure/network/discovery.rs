//! UDP broadcast listener for device discovery.
//!
//! Devices broadcast a 36-byte identity + status packet to UDP port 7654
//! roughly once per second.  The listener binds that port, decodes each
//! datagram and forwards a [`Sighting`] to the application layer, which
//! maintains the registry.
//!
//! Discovery is passive: nothing is ever sent on this socket.
//!
//! The listener runs on a dedicated thread with a blocking socket so that
//! synchronous socket I/O never stalls the Tokio runtime.
//!
//! # Read timeout
//!
//! The socket has a 500 ms read timeout.  `recv_from` therefore returns at
//! least twice a second, and on each timeout the loop re-checks the `running`
//! flag so shutdown is prompt.
//!
//! # Corrupt datagrams
//!
//! A datagram that fails to decode is logged at `debug` and dropped.  One bad
//! packet never stops discovery.

use std::net::{SocketAddr, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use dac_core::decode_broadcast;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::application::registry::Sighting;

/// How long each `recv_from` may block before the running flag is re-checked.
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Error type for discovery listener operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The socket could not be configured, or the thread could not start.
    #[error("failed to start discovery listener: {0}")]
    Setup(#[source] std::io::Error),
}

/// Binds a UDP socket on `bind_addr` and spawns a background thread that
/// decodes incoming broadcasts.
///
/// Returns a receiver from which the application layer reads [`Sighting`]s,
/// plus the address actually bound (useful when `bind_addr` has port 0).
///
/// # Errors
///
/// Returns [`DiscoveryError::BindFailed`] if the socket cannot be bound.
pub fn start_discovery_listener(
    bind_addr: SocketAddr,
    running: Arc<AtomicBool>,
) -> Result<(mpsc::Receiver<Sighting>, SocketAddr), DiscoveryError> {
    let socket = UdpSocket::bind(bind_addr).map_err(|source| DiscoveryError::BindFailed {
        addr: bind_addr,
        source,
    })?;
    socket
        .set_read_timeout(Some(RECV_TIMEOUT))
        .map_err(DiscoveryError::Setup)?;
    let local = socket.local_addr().map_err(DiscoveryError::Setup)?;

    let (tx, rx) = mpsc::channel(64);

    std::thread::Builder::new()
        .name("dac-discovery".to_string())
        .spawn(move || {
            discovery_loop(socket, tx, running);
        })
        .map_err(DiscoveryError::Setup)?;

    info!("discovery listener on UDP {local}");
    Ok((rx, local))
}

/// The main receive loop executed on the discovery thread.
fn discovery_loop(socket: UdpSocket, tx: mpsc::Sender<Sighting>, running: Arc<AtomicBool>) {
    // Larger than a broadcast so oversized datagrams are seen as such.
    let mut buf = [0u8; 512];

    while running.load(Ordering::Relaxed) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(pair) => pair,
            Err(e) if is_timeout_error(&e) => continue,
            Err(e) => {
                error!("discovery recv error: {e}");
                continue;
            }
        };

        let Some(sighting) = parse_datagram(&buf[..len], src, Instant::now()) else {
            continue;
        };

        if tx.blocking_send(sighting).is_err() {
            // Receiver dropped – application is shutting down.
            break;
        }
    }

    info!("discovery listener stopped");
}

/// Decodes one datagram, logging and discarding it if malformed.
fn parse_datagram(datagram: &[u8], src: SocketAddr, now: Instant) -> Option<Sighting> {
    match decode_broadcast(datagram) {
        Ok((identity, status)) => {
            debug!(
                "broadcast from {src}: {} fullness={} state={:?}",
                identity.mac, status.buffer_fullness, status.playback_state
            );
            Some(Sighting {
                identity,
                status,
                address: src.ip(),
                received_at: now,
            })
        }
        Err(e) => {
            debug!("dropping datagram from {src}: {e}");
            None
        }
    }
}

/// Returns `true` for OS timeout / would-block errors that should be retried.
fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
