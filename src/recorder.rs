//! Timed recording loop
//!
//! A [`Recorder`] drives a [`ContentProvider`] on a fixed-rate schedule and
//! appends one segment per tick through a [`SnapshotWriter`].
//!
//! ## Lifecycle
//!
//! ```text
//! Idle --start()--> Recording --(duration elapsed | stop())--> Stopping --close()--> Closed
//! ```
//!
//! A stop request does not change [`Recorder::state`] by itself: the loop
//! owns the recorder while it runs, so the request is recorded on the
//! [`RecorderHandle`] and observed by the loop after its current tick. The
//! recorder reports [`RecorderState::Stopping`] from the moment the loop has
//! acted on the request (or on the elapsed duration) until `close`.
//!
//! [`start`](Recorder::start) runs the loop on the calling thread and only
//! returns once it has finished. Other threads talk to the loop through a
//! [`RecorderHandle`]:
//!
//! - [`tag_current_state`](RecorderHandle::tag_current_state) queues a label
//!   for the next segment and wakes the loop, so a tagged snapshot is taken
//!   right away instead of at the next scheduled tick
//! - [`stop`](RecorderHandle::stop) asks the loop to exit; at most one more
//!   segment is written after the call
//!
//! ## Scheduling
//!
//! Ticks are fixed-rate: tick `k` is scheduled at `start + k * interval`
//! regardless of how long snapshots take, so latency does not accumulate.
//! The loop checks its exit conditions after each sleep, which gives
//! `ceil(duration / interval)` regular ticks (never fewer than one). A wake
//! from a tag adds at most one out-of-schedule tick before the next regular one.
//!
//! ## Example
//!
//! ```rust,no_run
//! use srcreel::provider::{DirectoryProvider, ProviderConfig};
//! use srcreel::RecorderBuilder;
//! use std::path::Path;
//! use std::thread;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = DirectoryProvider::new(Path::new("./project"), ProviderConfig::default())?;
//! let mut recorder = RecorderBuilder::new()
//!     .snapshot_interval(Duration::from_secs(60))
//!     .key_snapshot_spacing(10)
//!     .build(provider, "session.srcreel")?;
//!
//! let handle = recorder.handle();
//! thread::spawn(move || {
//!     thread::sleep(Duration::from_secs(300));
//!     handle.tag_current_state("lunch");
//!     handle.stop();
//! });
//!
//! let summary = recorder.start(Duration::from_secs(3600))?;
//! recorder.close()?;
//! println!("wrote {} segments", summary.segments_written);
//! # Ok(())
//! # }
//! ```

use crate::error::{ReelError, Result};
use crate::lock::RecordingLock;
use crate::provider::ContentProvider;
use crate::time::{SystemMonotonicTimeSource, TimeSource};
use crate::types::RecordingSummary;
use crate::writer::SnapshotWriter;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default time between scheduled snapshots
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Default number of segments per key segment
pub const DEFAULT_KEY_SNAPSHOT_SPACING: usize = 5;

/// Recorder settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Time between scheduled snapshots (default 5 minutes)
    pub snapshot_interval: Duration,
    /// Every n-th segment is a key segment (default 5)
    pub key_snapshot_spacing: usize,
    /// Unix seconds stored in the file header (default: when the config is created)
    pub recording_start_timestamp: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            key_snapshot_spacing: DEFAULT_KEY_SNAPSHOT_SPACING,
            recording_start_timestamp: Utc::now().timestamp().max(0) as u64,
        }
    }
}

impl RecorderConfig {
    /// Check that the settings describe a runnable recording
    pub fn validate(&self) -> Result<()> {
        if self.snapshot_interval.is_zero() {
            return Err(ReelError::invalid_configuration("snapshot interval must be positive"));
        }
        if self.key_snapshot_spacing == 0 {
            return Err(ReelError::invalid_configuration("key snapshot spacing must be at least 1"));
        }
        Ok(())
    }
}

/// Builder for [`Recorder`]
pub struct RecorderBuilder {
    config: RecorderConfig,
    time_source: Option<Arc<dyn TimeSource>>,
}

impl Default for RecorderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecorderBuilder {
    /// Create a builder with default settings and the system monotonic clock
    pub fn new() -> Self {
        Self {
            config: RecorderConfig::default(),
            time_source: None,
        }
    }

    /// Replace all settings at once
    pub fn config(mut self, config: RecorderConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the time between scheduled snapshots
    pub fn snapshot_interval(mut self, interval: Duration) -> Self {
        self.config.snapshot_interval = interval;
        self
    }

    /// Set how many segments share one key segment
    ///
    /// Larger values save space; smaller values shorten replay chains.
    pub fn key_snapshot_spacing(mut self, spacing: usize) -> Self {
        self.config.key_snapshot_spacing = spacing;
        self
    }

    /// Set the recording start written to the file header (unix seconds)
    pub fn recording_start_timestamp(mut self, timestamp: u64) -> Self {
        self.config.recording_start_timestamp = timestamp;
        self
    }

    /// Use a custom time source, e.g. [`FakeTimeSource`](crate::time::FakeTimeSource) in tests
    pub fn time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = Some(time_source);
        self
    }

    /// Build a recorder writing `provider`'s content to `output`
    ///
    /// # Errors
    ///
    /// - [`ReelError::InvalidConfiguration`] if the settings fail validation
    pub fn build<P: ContentProvider>(self, provider: P, output: impl Into<PathBuf>) -> Result<Recorder<P>> {
        self.config.validate()?;
        let time_source = self
            .time_source
            .unwrap_or_else(|| Arc::new(SystemMonotonicTimeSource::new()));

        Ok(Recorder {
            provider,
            output: output.into(),
            config: self.config,
            time_source,
            signals: Arc::new(Signals::default()),
            state: RecorderState::Idle,
            lock: None,
        })
    }
}

/// Lifecycle state of a [`Recorder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// Built, not started
    Idle,
    /// Loop running
    ///
    /// A `stop()` issued during this state is pending until the loop finishes
    /// its current tick; [`RecorderHandle::is_stop_requested`] reports it.
    Recording,
    /// Stop requested or duration elapsed, and the loop has exited
    ///
    /// No further segments are written. The lock is held until `close`.
    Stopping,
    /// Lock released; terminal
    Closed,
}

#[derive(Debug, Default)]
struct Signals {
    tags: Mutex<VecDeque<String>>,
    stop: AtomicBool,
}

/// Cloneable, thread-safe control surface of a running recorder
#[derive(Clone)]
pub struct RecorderHandle {
    signals: Arc<Signals>,
    time_source: Arc<dyn TimeSource>,
}

impl std::fmt::Debug for RecorderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecorderHandle")
            .field("pending_tags", &self.signals.tags.lock().len())
            .field("stop_requested", &self.is_stop_requested())
            .finish()
    }
}

impl RecorderHandle {
    /// Attach `tag` to the next segment and wake the loop to write it now
    ///
    /// Tags queued before the recording starts are consumed by its first ticks.
    pub fn tag_current_state(&self, tag: impl Into<String>) {
        let tag = tag.into();
        info!("Tag state with: {}", tag);
        self.signals.tags.lock().push_back(tag);
        self.time_source.wake_now();
    }

    /// Ask the loop to exit; idempotent
    pub fn stop(&self) {
        if self.signals.stop.swap(true, Ordering::SeqCst) {
            info!("Recording already stopping");
        } else {
            info!("Stopping recording");
            self.time_source.wake_now();
        }
    }

    /// Whether `stop` has been called
    pub fn is_stop_requested(&self) -> bool {
        self.signals.stop.load(Ordering::SeqCst)
    }

    /// Number of tags waiting for a segment
    pub fn pending_tags(&self) -> usize {
        self.signals.tags.lock().len()
    }
}

/// Periodic recorder of a content provider into a recording file
pub struct Recorder<P> {
    provider: P,
    output: PathBuf,
    config: RecorderConfig,
    time_source: Arc<dyn TimeSource>,
    signals: Arc<Signals>,
    state: RecorderState,
    lock: Option<RecordingLock>,
}

impl<P> std::fmt::Debug for Recorder<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("output", &self.output)
            .field("config", &self.config)
            .field("state", &self.state)
            .finish()
    }
}

impl<P: ContentProvider> Recorder<P> {
    /// Handle for tagging and stopping from other threads
    pub fn handle(&self) -> RecorderHandle {
        RecorderHandle {
            signals: Arc::clone(&self.signals),
            time_source: Arc::clone(&self.time_source),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Recording file path
    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Settings in use
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Shorthand for `self.handle().tag_current_state(tag)`
    pub fn tag_current_state(&self, tag: impl Into<String>) {
        self.handle().tag_current_state(tag);
    }

    /// Shorthand for `self.handle().stop()`
    pub fn stop(&self) {
        self.handle().stop();
    }

    /// Record for `duration`, or until stopped
    ///
    /// Claims the output's lock file, creates the recording and runs the tick
    /// loop on the calling thread. Failures inside a tick are logged and the
    /// loop carries on; only setup failures are returned.
    ///
    /// # Errors
    ///
    /// - [`ReelError::RecorderClosed`] if the recorder was closed
    /// - [`ReelError::InvalidState`] if the recorder already ran
    /// - [`ReelError::RecordingLocked`] if another recorder holds the output
    /// - [`ReelError::Io`] if the recording file cannot be created
    pub fn start(&mut self, duration: Duration) -> Result<RecordingSummary> {
        match self.state {
            RecorderState::Idle => {}
            RecorderState::Closed => return Err(ReelError::RecorderClosed),
            other => {
                return Err(ReelError::InvalidState(format!(
                    "cannot start a recorder that is {:?}",
                    other
                )))
            }
        }

        let lock = RecordingLock::acquire(&self.output)?;
        // On failure the lock is dropped, which removes it
        let mut writer = SnapshotWriter::create(
            &self.output,
            self.config.recording_start_timestamp,
            self.config.key_snapshot_spacing,
        )?;
        self.lock = Some(lock);

        info!(
            "Recording to {:?} every {:?} for {:?}",
            self.output, self.config.snapshot_interval, duration
        );
        self.state = RecorderState::Recording;
        let summary = self.run_loop(&mut writer, duration);
        self.state = RecorderState::Stopping;

        if let Err(e) = writer.sync() {
            warn!("Failed to sync recording {:?}: {}", self.output, e);
        }
        info!(
            "Recording finished: {} segments in {} ticks ({} failed)",
            summary.segments_written, summary.ticks, summary.failed_ticks
        );
        Ok(summary)
    }

    /// Release the lock file; further `start` calls fail
    ///
    /// Calling `close` on a closed recorder does nothing.
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            RecorderState::Closed => return Ok(()),
            RecorderState::Recording => {
                return Err(ReelError::InvalidState(
                    "cannot close while the recording loop is running".to_string(),
                ))
            }
            RecorderState::Idle | RecorderState::Stopping => {}
        }

        info!("Closing recording {:?}", self.output);
        self.state = RecorderState::Closed;
        if let Some(lock) = self.lock.take() {
            lock.release()?;
        }
        Ok(())
    }

    fn run_loop(&mut self, writer: &mut SnapshotWriter, duration: Duration) -> RecordingSummary {
        let mut summary = RecordingSummary::default();
        let started = self.time_source.now();
        let interval = self.config.snapshot_interval;

        loop {
            let tick_start = self.time_source.now();
            let offset = tick_start.saturating_sub(started);
            let timestamp = u32::try_from(offset.as_secs()).unwrap_or(u32::MAX);
            let tag = self.signals.tags.lock().pop_front();

            summary.ticks += 1;
            debug!("Snap! tick {} at {:?}", summary.ticks, offset);

            match writer.take_snapshot(&mut self.provider, timestamp, tag.as_deref()) {
                Ok(header) => {
                    summary.segments_written += 1;
                    if header.kind.is_key() {
                        summary.key_segments += 1;
                    }
                    summary.tags_applied.extend(tag);
                }
                Err(e) => {
                    error!("Failed to record snapshot at {:?}: {}", offset, e);
                    summary.failed_ticks += 1;
                    if let Some(tag) = tag {
                        self.signals.tags.lock().push_front(tag);
                    }
                }
            }

            if let Err(e) = self.time_source.sleep_until(tick_start + interval) {
                debug!("Interrupted while sleeping: {}", e);
            }

            // Allow a different thread to stop the recording
            if self.signals.stop.load(Ordering::SeqCst) {
                summary.stopped_by_request = true;
                break;
            }
            if self.time_source.now().saturating_sub(started) >= duration {
                break;
            }
        }

        summary.elapsed = self.time_source.now().saturating_sub(started);
        summary
    }
}
