//! StreamWriter: keeps a device's point buffer topped up without overflowing it.
//!
//! Every `write` response carries the device's buffer fullness, so each
//! round trip closes the feedback loop:
//!
//! ```text
//!            ┌──────────── fullness ◄───────────┐
//!            ▼                                  │
//!   window = budget - fullness ──► pull ──► write ──► device
//! ```
//!
//! # States
//!
//! ```text
//! NotStarted ──► Preparing ──► Streaming ──► Done
//!      │              │            │
//!      └──────────────┴────────────┴──────► Failed
//! ```
//!
//! Playback is started with `begin` right after the first successful write,
//! exactly once per stream.  Errors are never retried; the writer moves to
//! `Failed` and hands the error back.
//!
//! # Back-off near a full buffer
//!
//! When the free window drops below `low_threshold` the writer sleeps for
//! `pacing_delay` before writing.  The next batch is then held back until the
//! device has room for at least `point_rate * pacing_delay` points (capped at
//! `backoff_window`); until then the writer pings to refresh the fullness.
//! A window never exceeds the room left under the ceiling, so the device
//! buffer cannot be overfilled.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use dac_core::protocol::messages::point_flags;
use dac_core::{DeviceIdentity, PlaybackState, Point, StatusSnapshot};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::DacError;

/// The device commands the stream writer needs.
///
/// Implemented by the TCP connection; tests use an in-memory fake.
#[async_trait]
pub trait CommandChannel: Send {
    /// Last status received from the device.
    fn status(&self) -> StatusSnapshot;

    /// Static description of the device, when known.
    fn identity(&self) -> Option<DeviceIdentity>;

    async fn ping(&mut self) -> Result<StatusSnapshot, DacError>;

    async fn prepare(&mut self) -> Result<StatusSnapshot, DacError>;

    async fn begin(
        &mut self,
        low_water_mark: u16,
        point_rate: u32,
    ) -> Result<StatusSnapshot, DacError>;

    async fn queue_rate(&mut self, point_rate: u32) -> Result<StatusSnapshot, DacError>;

    async fn write(&mut self, points: &[Point]) -> Result<StatusSnapshot, DacError>;

    async fn estop(&mut self) -> Result<StatusSnapshot, DacError>;
}

/// Supplies points on demand.
#[cfg_attr(test, mockall::automock)]
pub trait PointSource: Send {
    /// Returns at most `max` points.  An empty batch ends the stream.
    fn next_points(&mut self, max: usize) -> Vec<Point>;
}

/// Flow-control parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// Rate passed to `begin`, in points per second.
    pub point_rate: u32,
    /// Maximum points kept outstanding on the device.
    pub budget: u16,
    pub low_threshold: u16,
    pub pacing_delay: Duration,
    pub backoff_window: u16,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            point_rate: 30_000,
            budget: 1799,
            low_threshold: 100,
            pacing_delay: Duration::from_millis(5),
            backoff_window: 150,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    NotStarted,
    Preparing,
    Streaming,
    Done,
    Failed,
}

/// Result of a single [`StreamWriter::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A batch of this many points was written.
    Wrote(usize),
    /// The buffer was full; the writer slept and refreshed the status.
    Waited,
    /// The source returned no points; the stream is done.
    Exhausted,
}

/// Counters reported when a stream ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub batches: u64,
    pub points: u64,
    pub backoffs: u64,
}

/// Number of points to request next; never more than the room left under
/// the ceiling.
///
/// The ceiling is `budget`, lowered to the device's own capacity when that is
/// known.  `min_batch` is the batch size earned by a previous back-off: while
/// the room is smaller than that the window is 0 and the writer waits.
pub fn request_window(
    settings: &StreamSettings,
    fullness: u16,
    capacity: Option<u16>,
    min_batch: usize,
) -> usize {
    let ceiling = capacity.map_or(settings.budget, |cap| cap.min(settings.budget));
    let room = usize::from(ceiling.saturating_sub(fullness));
    if room < min_batch.min(usize::from(ceiling)) {
        0
    } else {
        room
    }
}

/// Points the device plays during one pacing delay, capped at `backoff_window`.
pub fn backoff_bonus(settings: &StreamSettings) -> usize {
    let millis = u64::try_from(settings.pacing_delay.as_millis()).unwrap_or(u64::MAX);
    let drained = u64::from(settings.point_rate).saturating_mul(millis) / 1000;
    drained.min(u64::from(settings.backoff_window)) as usize
}

/// Drives one stream over a borrowed command channel.
pub struct StreamWriter<'a, C: CommandChannel + ?Sized> {
    channel: &'a mut C,
    settings: StreamSettings,
    running: Arc<AtomicBool>,
    state: StreamState,
    begun: bool,
    /// Smallest batch worth sending after a back-off.
    min_batch: usize,
    rate_change_pending: bool,
    summary: StreamSummary,
}

impl<'a, C: CommandChannel + ?Sized> StreamWriter<'a, C> {
    /// Creates a writer; nothing is sent until [`start`](Self::start),
    /// [`step`](Self::step) or [`run`](Self::run).
    ///
    /// Clearing `running` makes the next step fail with
    /// [`DacError::Cancelled`].
    pub fn new(channel: &'a mut C, settings: StreamSettings, running: Arc<AtomicBool>) -> Self {
        Self {
            channel,
            settings,
            running,
            state: StreamState::NotStarted,
            begun: false,
            min_batch: 0,
            rate_change_pending: false,
            summary: StreamSummary::default(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn summary(&self) -> StreamSummary {
        self.summary
    }

    /// Checks the device is not already playing and prepares it if idle.
    ///
    /// # Errors
    ///
    /// Returns [`DacError::AlreadyPlaying`] without sending anything when the
    /// last known status says the device is playing.
    pub async fn start(&mut self) -> Result<(), DacError> {
        if self.state != StreamState::NotStarted {
            return Ok(());
        }
        let result = self.start_inner().await;
        if result.is_err() {
            self.state = StreamState::Failed;
        }
        result
    }

    async fn start_inner(&mut self) -> Result<(), DacError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(DacError::Cancelled);
        }
        let status = self.channel.status();
        if status.is_playing() {
            return Err(DacError::AlreadyPlaying);
        }

        self.state = StreamState::Preparing;
        if status.playback_state == PlaybackState::Idle {
            self.channel.prepare().await?;
        }
        self.state = StreamState::Streaming;
        debug!("stream prepared");
        Ok(())
    }

    /// Performs one pull-and-write iteration, starting the stream first if
    /// needed.
    ///
    /// # Errors
    ///
    /// Any channel error; the writer is then `Failed`.  Stepping a failed
    /// writer returns [`DacError::ConnectionUnusable`].
    pub async fn step<P: PointSource + ?Sized>(
        &mut self,
        source: &mut P,
    ) -> Result<StepOutcome, DacError> {
        match self.state {
            StreamState::NotStarted => self.start().await?,
            StreamState::Streaming => {}
            StreamState::Done => return Ok(StepOutcome::Exhausted),
            StreamState::Preparing | StreamState::Failed => {
                return Err(DacError::ConnectionUnusable)
            }
        }

        let result = self.step_inner(source).await;
        match result {
            Ok(StepOutcome::Exhausted) => {
                self.state = StreamState::Done;
                info!(
                    "stream done: {} points in {} batches",
                    self.summary.points, self.summary.batches
                );
            }
            Err(_) => self.state = StreamState::Failed,
            Ok(_) => {}
        }
        result
    }

    async fn step_inner<P: PointSource + ?Sized>(
        &mut self,
        source: &mut P,
    ) -> Result<StepOutcome, DacError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(DacError::Cancelled);
        }

        let fullness = self.channel.status().buffer_fullness;
        let capacity = self.channel.identity().map(|id| id.buffer_capacity);
        let window = request_window(&self.settings, fullness, capacity, self.min_batch);

        if window == 0 {
            sleep(self.settings.pacing_delay).await;
            self.channel.ping().await?;
            self.summary.backoffs += 1;
            return Ok(StepOutcome::Waited);
        }

        let mut points = source.next_points(window);
        if points.is_empty() {
            return Ok(StepOutcome::Exhausted);
        }
        points.truncate(window);

        self.min_batch = 0;
        if window < usize::from(self.settings.low_threshold) {
            debug!("buffer nearly full ({fullness}), backing off");
            sleep(self.settings.pacing_delay).await;
            self.min_batch = backoff_bonus(&self.settings);
            self.summary.backoffs += 1;
        }

        if self.rate_change_pending {
            points[0].flags |= point_flags::RATE_CHANGE;
            self.rate_change_pending = false;
        }

        self.channel.write(&points).await?;
        self.summary.batches += 1;
        self.summary.points += points.len() as u64;

        if !self.begun {
            self.channel.begin(0, self.settings.point_rate).await?;
            self.begun = true;
            info!("playback started at {} pps", self.settings.point_rate);
        }

        Ok(StepOutcome::Wrote(points.len()))
    }

    /// Streams until the source is exhausted.
    ///
    /// # Errors
    ///
    /// The first error from [`start`](Self::start) or [`step`](Self::step).
    pub async fn run<P: PointSource + ?Sized>(
        &mut self,
        source: &mut P,
    ) -> Result<StreamSummary, DacError> {
        self.start().await?;
        while self.step(source).await? != StepOutcome::Exhausted {}
        Ok(self.summary)
    }

    /// Switches the output rate.
    ///
    /// Before playback has begun this only changes the rate passed to
    /// `begin`.  Afterwards it queues the rate on the device and flags the
    /// first point of the next batch so the switch lands there.
    pub async fn request_rate_change(&mut self, point_rate: u32) -> Result<(), DacError> {
        if self.begun {
            if let Err(e) = self.channel.queue_rate(point_rate).await {
                self.state = StreamState::Failed;
                return Err(e);
            }
            self.rate_change_pending = true;
        }
        self.settings.point_rate = point_rate;
        Ok(())
    }

    /// Emergency stop, allowed in every state.  Ends the stream.
    pub async fn estop(&mut self) -> Result<StatusSnapshot, DacError> {
        let result = self.channel.estop().await;
        self.state = if result.is_ok() {
            StreamState::Done
        } else {
            StreamState::Failed
        };
        result
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
