//! TCP command channel to a single device.
//!
//! The protocol is strictly synchronous: every command frame is answered by
//! exactly one 22-byte response before the next command may be sent.
//!
//! ```text
//! client                                  device
//!   │  (connect)                            │
//!   │ ◄──────────── 'a' '?' status ──────── │   hello, unsolicited
//!   │ ───────────── 'v' ──────────────────► │   only if sw_revision >= 2
//!   │ ◄──────────── 32 raw bytes ────────── │
//!   │ ───────────── command frame ────────► │
//!   │ ◄──────────── ack echo status ─────── │   repeat
//! ```
//!
//! A [`Connection`] owns its stream exclusively; taking `&mut self` for every
//! command is what keeps two commands from interleaving on the socket.
//!
//! # Failure model
//!
//! Any I/O error, timeout, cancellation mid-read or protocol violation marks
//! the connection unusable.  The stored status keeps the last good snapshot,
//! and every later command fails with [`DacError::ConnectionUnusable`] without
//! touching the socket.  Emergency stop is the one exception: it is always
//! sent, whatever state the connection is in.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use dac_core::protocol::codec::{decode_response, decode_version_string, encode_command};
use dac_core::protocol::messages::{tag, RESPONSE_SIZE, VERSION_STRING_SIZE};
use dac_core::{Command, DeviceIdentity, Point, PointLayout, StatusSnapshot};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::application::stream::CommandChannel;
use crate::error::DacError;

/// Size of the scratch buffer used for each socket read.
const READ_CHUNK: usize = 512;

/// Late replies an emergency stop may skip on a failed connection.
const MAX_STALE_REPLIES: usize = 4;

/// Per-connection knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub connect_timeout: Duration,
    /// Deadline for each individual socket read or write.
    pub read_timeout: Duration,
    /// Field order for point records sent by `write`.
    pub layout: PointLayout,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(200),
            read_timeout: Duration::from_millis(1000),
            layout: PointLayout::Standard,
        }
    }
}

/// An open, handshaken command channel.
pub struct Connection<S = TcpStream> {
    stream: S,
    peer: String,
    /// Bytes received but not yet consumed by a frame.
    rx: Vec<u8>,
    status: StatusSnapshot,
    status_tx: watch::Sender<StatusSnapshot>,
    identity: Option<DeviceIdentity>,
    firmware_version: Option<String>,
    settings: ConnectionSettings,
    usable: bool,
    running: Arc<AtomicBool>,
}

impl Connection<TcpStream> {
    /// Opens a TCP connection to `addr` and performs the handshake.
    ///
    /// `identity`, usually copied from a registry entry, decides whether the
    /// firmware version is queried.
    ///
    /// # Errors
    ///
    /// - [`DacError::Connect`] / [`DacError::Timeout`] if the socket cannot be
    ///   opened within `settings.connect_timeout`.
    /// - Any error from [`Connection::handshake`].
    pub async fn connect(
        addr: SocketAddr,
        identity: Option<DeviceIdentity>,
        settings: &ConnectionSettings,
        running: Arc<AtomicBool>,
    ) -> Result<Self, DacError> {
        debug!("connecting to {addr}");
        let stream = match timeout(settings.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(DacError::Connect { addr, source }),
            Err(_) => {
                return Err(DacError::Timeout {
                    operation: "connect",
                    after: settings.connect_timeout,
                })
            }
        };
        stream.set_nodelay(true)?;

        Connection::handshake(stream, addr.to_string(), identity, settings, running).await
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Runs the handshake over an already-open stream.
    ///
    /// Reads the unsolicited hello frame (`'a'`, `'?'`), then queries the
    /// firmware version when the identity says the device supports it.
    ///
    /// # Errors
    ///
    /// Returns [`DacError::Protocol`] if the hello frame is not an ack of
    /// `'?'`; I/O, timeout and cancellation errors are passed through.
    pub async fn handshake(
        stream: S,
        peer: String,
        identity: Option<DeviceIdentity>,
        settings: &ConnectionSettings,
        running: Arc<AtomicBool>,
    ) -> Result<Self, DacError> {
        let (status_tx, _) = watch::channel(StatusSnapshot::default());
        let mut conn = Connection {
            stream,
            peer,
            rx: Vec::with_capacity(READ_CHUNK),
            status: StatusSnapshot::default(),
            status_tx,
            identity,
            firmware_version: None,
            settings: *settings,
            usable: true,
            running,
        };

        let hello = decode_response(&conn.read_exact(RESPONSE_SIZE, true).await?)?;
        if !hello.acknowledges(tag::PING) {
            warn!(
                "{}: bad hello ack=0x{:02x} echoed=0x{:02x}",
                conn.peer, hello.ack, hello.command
            );
            return Err(DacError::Protocol {
                command: "hello",
                ack: hello.ack,
                echoed: hello.command,
            });
        }
        conn.store_status(hello.status);

        if identity.is_some_and(|id| id.supports_version_query()) {
            let frame = encode_command(&Command::Version, conn.settings.layout)?;
            conn.send(&frame).await?;
            let raw = conn.read_exact(VERSION_STRING_SIZE, true).await?;
            conn.firmware_version = Some(decode_version_string(&raw));
        }

        info!(
            "connected to {} (firmware {})",
            conn.peer,
            conn.firmware_version.as_deref().unwrap_or("unknown")
        );
        Ok(conn)
    }

    /// Last status received from the device.
    pub fn status(&self) -> StatusSnapshot {
        self.status
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.identity
    }

    pub fn firmware_version(&self) -> Option<&str> {
        self.firmware_version.as_deref()
    }

    pub fn layout(&self) -> PointLayout {
        self.settings.layout
    }

    /// `false` once any command has failed; the caller must reconnect.
    pub fn is_usable(&self) -> bool {
        self.usable
    }

    /// A receiver that sees every status snapshot this connection stores.
    pub fn subscribe_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    pub async fn ping(&mut self) -> Result<StatusSnapshot, DacError> {
        self.execute(Command::Ping).await
    }

    /// Moves an idle device to the prepared state.
    pub async fn prepare(&mut self) -> Result<StatusSnapshot, DacError> {
        self.execute(Command::Prepare).await
    }

    pub async fn stop(&mut self) -> Result<StatusSnapshot, DacError> {
        self.execute(Command::Stop).await
    }

    /// Emergency stop.  Sent regardless of playback state, cancellation or an
    /// earlier failure on this connection.
    ///
    /// After a failure the device may still answer the failed command, so
    /// replies echoing another command are skipped until the estop reply.
    pub async fn estop(&mut self) -> Result<StatusSnapshot, DacError> {
        self.execute(Command::EmergencyStop).await
    }

    pub async fn clear_estop(&mut self) -> Result<StatusSnapshot, DacError> {
        self.execute(Command::ClearEmergencyStop).await
    }

    /// Starts playback at `point_rate` once `low_water_mark` points are buffered.
    pub async fn begin(
        &mut self,
        low_water_mark: u16,
        point_rate: u32,
    ) -> Result<StatusSnapshot, DacError> {
        self.execute(Command::Begin {
            low_water_mark,
            point_rate,
        })
        .await
    }

    pub async fn update(
        &mut self,
        low_water_mark: u16,
        point_rate: u32,
    ) -> Result<StatusSnapshot, DacError> {
        self.execute(Command::Update {
            low_water_mark,
            point_rate,
        })
        .await
    }

    /// Queues `point_rate`; the device switches at the next point flagged
    /// with `point_flags::RATE_CHANGE`.
    pub async fn queue_rate(&mut self, point_rate: u32) -> Result<StatusSnapshot, DacError> {
        self.execute(Command::QueueRate { point_rate }).await
    }

    /// Appends `points` to the device buffer.
    pub async fn write(&mut self, points: &[Point]) -> Result<StatusSnapshot, DacError> {
        self.execute(Command::Write(points.to_vec())).await
    }

    /// Sends one command and waits for its response.
    async fn execute(&mut self, command: Command) -> Result<StatusSnapshot, DacError> {
        let is_estop = command == Command::EmergencyStop;
        if !is_estop {
            if !self.usable {
                return Err(DacError::ConnectionUnusable);
            }
            if !self.running.load(Ordering::Relaxed) {
                return Err(DacError::Cancelled);
            }
        }

        let skip_stale = is_estop && !self.usable;
        let frame = encode_command(&command, self.settings.layout)?;
        match self
            .exchange(&frame, command.tag(), command.name(), !is_estop, skip_stale)
            .await
        {
            Ok(status) => {
                self.store_status(status);
                Ok(status)
            }
            Err(e) => {
                self.usable = false;
                warn!("{}: '{}' failed: {e}", self.peer, command.name());
                Err(e)
            }
        }
    }

    async fn exchange(
        &mut self,
        frame: &[u8],
        expected: u8,
        name: &'static str,
        cancellable: bool,
        skip_stale: bool,
    ) -> Result<StatusSnapshot, DacError> {
        self.send(frame).await?;
        let mut skipped = 0;
        let response = loop {
            let response = decode_response(&self.read_exact(RESPONSE_SIZE, cancellable).await?)?;
            if skip_stale && response.command != expected && skipped < MAX_STALE_REPLIES {
                debug!(
                    "{}: skipping late reply to 0x{:02x}",
                    self.peer, response.command
                );
                skipped += 1;
                continue;
            }
            break response;
        };
        if !response.acknowledges(expected) {
            return Err(DacError::Protocol {
                command: name,
                ack: response.ack,
                echoed: response.command,
            });
        }
        Ok(response.status)
    }

    fn store_status(&mut self, status: StatusSnapshot) {
        self.status = status;
        self.status_tx.send_replace(status);
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), DacError> {
        let after = self.settings.read_timeout;
        let write = async {
            self.stream.write_all(frame).await?;
            self.stream.flush().await
        };
        match timeout(after, write).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DacError::Timeout {
                operation: "write",
                after,
            }),
        }
    }

    /// Returns exactly `n` bytes, keeping any surplus for the next call.
    async fn read_exact(&mut self, n: usize, cancellable: bool) -> Result<Vec<u8>, DacError> {
        let mut chunk = [0u8; READ_CHUNK];
        while self.rx.len() < n {
            if cancellable && !self.running.load(Ordering::Relaxed) {
                return Err(DacError::Cancelled);
            }
            let read = match timeout(self.settings.read_timeout, self.stream.read(&mut chunk)).await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(DacError::Timeout {
                        operation: "read",
                        after: self.settings.read_timeout,
                    })
                }
            };
            if read == 0 {
                return Err(DacError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("peer closed with {} of {n} bytes received", self.rx.len()),
                )));
            }
            self.rx.extend_from_slice(&chunk[..read]);
        }

        let rest = self.rx.split_off(n);
        Ok(std::mem::replace(&mut self.rx, rest))
    }
}

#[async_trait]
impl<S> CommandChannel for Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn status(&self) -> StatusSnapshot {
        Connection::status(self)
    }

    fn identity(&self) -> Option<DeviceIdentity> {
        Connection::identity(self)
    }

    async fn ping(&mut self) -> Result<StatusSnapshot, DacError> {
        Connection::ping(self).await
    }

    async fn prepare(&mut self) -> Result<StatusSnapshot, DacError> {
        Connection::prepare(self).await
    }

    async fn begin(
        &mut self,
        low_water_mark: u16,
        point_rate: u32,
    ) -> Result<StatusSnapshot, DacError> {
        Connection::begin(self, low_water_mark, point_rate).await
    }

    async fn queue_rate(&mut self, point_rate: u32) -> Result<StatusSnapshot, DacError> {
        Connection::queue_rate(self, point_rate).await
    }

    async fn write(&mut self, points: &[Point]) -> Result<StatusSnapshot, DacError> {
        Connection::write(self, points).await
    }

    async fn estop(&mut self) -> Result<StatusSnapshot, DacError> {
        Connection::estop(self).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
