//! Motion detection loop.
//!
//! Pulls the two latest detection frames on a fixed cadence, runs the
//! pixel-diff comparison, and on a trigger registers the event with the
//! central server before publishing the handle to the processor. The
//! registration call blocks (retrying forever) because the server owns the
//! event-id namespace; the cooldown starts after the attempt either way, so
//! a server outage degrades into a slow retry stream instead of a storm.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vigil_config::{Config, MotionConfig};
use vigil_core::api::{ApiClient, ApiError};
use vigil_core::buffer::{ChunkBuffer, DetectorControl};
use vigil_core::signal::{MotionEventHandle, MotionSignal};
use vigil_core::{artifacts, detect};

const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Pause/resume handle. The buffer holds this weakly and flips it during
/// mode transitions; the loop checks it each tick.
#[derive(Debug, Default)]
pub struct DetectorHandle {
    paused: AtomicBool,
}

impl DetectorControl for DetectorHandle {
    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("motion detector paused");
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("motion detector resumed");
    }
}

impl DetectorHandle {
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

pub struct MotionDetector {
    buffer: Arc<ChunkBuffer>,
    signal: Arc<MotionSignal>,
    api: Arc<ApiClient>,
    motion: MotionConfig,
    tick: Duration,
    overlay_path: PathBuf,
    handle: Arc<DetectorHandle>,
    shutdown: CancellationToken,
}

impl MotionDetector {
    pub fn new(
        config: &Config,
        buffer: Arc<ChunkBuffer>,
        signal: Arc<MotionSignal>,
        api: Arc<ApiClient>,
        shutdown: CancellationToken,
    ) -> (Self, Arc<DetectorHandle>) {
        let handle = Arc::new(DetectorHandle::default());
        let detector = Self {
            buffer,
            signal,
            api,
            motion: config.motion.clone(),
            tick: config.pictures.capture_interval(),
            overlay_path: config.paths.tmp().join("motion_debug.bmp"),
            handle: Arc::clone(&handle),
            shutdown,
        };
        (detector, handle)
    }

    pub async fn run(self) {
        info!(
            threshold = self.motion.threshold,
            sensitivity = self.motion.sensitivity,
            cooldown_s = self.motion.cooldown_s,
            "motion detection loop started"
        );

        let cooldown = self.motion.cooldown();
        let mut check_count: u64 = 0;
        let mut last_detection: Option<Instant> = None;
        let mut last_status_log = Instant::now();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.tick) => {}
            }
            check_count += 1;
            let now = Instant::now();

            if self.handle.is_paused() {
                continue;
            }

            if detect::in_cooldown(last_detection, cooldown, now) {
                if last_status_log.elapsed() >= STATUS_LOG_INTERVAL {
                    let remaining = detect::cooldown_remaining(last_detection, cooldown, now);
                    debug!(
                        remaining_s = format!("{:.1}", remaining.as_secs_f64()),
                        check = check_count,
                        "in cooldown"
                    );
                    last_status_log = Instant::now();
                }
                continue;
            }

            let (previous, current) = self.buffer.frames_for_detection();
            let (Some(previous), Some(current)) = (previous, current) else {
                if last_status_log.elapsed() >= STATUS_LOG_INTERVAL {
                    debug!(check = check_count, "waiting for detection frames");
                    last_status_log = Instant::now();
                }
                continue;
            };

            let Some(changed) =
                detect::changed_pixel_count(&previous, &current, self.motion.threshold)
            else {
                // Shape mismatch mid mode-change; frames will settle.
                continue;
            };

            if self.motion.log_interval > 0 && check_count % self.motion.log_interval == 0 {
                info!(
                    check = check_count,
                    score = changed,
                    sensitivity = self.motion.sensitivity,
                    "motion check"
                );
                last_status_log = Instant::now();
            }

            if changed > self.motion.sensitivity {
                info!(
                    check = check_count,
                    score = changed,
                    sensitivity = self.motion.sensitivity,
                    "motion detected"
                );
                if self.motion.log_details {
                    info!(
                        frame_w = current.width(),
                        frame_h = current.height(),
                        channels = current.channels(),
                        threshold = self.motion.threshold,
                        sensitivity = self.motion.sensitivity,
                        "comparison details"
                    );
                }
                if self.motion.debug_overlay
                    && let Err(err) = detect::write_debug_overlay(
                        &previous,
                        &current,
                        self.motion.threshold,
                        &self.overlay_path,
                    )
                {
                    warn!(error = %err, "failed to write motion debug overlay");
                }

                if self.register_and_publish(changed).await.is_err() {
                    // Shutdown fired mid-registration; the event is dropped
                    // (the server never acknowledged it).
                    break;
                }

                // Cooldown starts after the attempt regardless of outcome.
                last_detection = Some(Instant::now());
                info!(cooldown_s = self.motion.cooldown_s, "entering cooldown");
                last_status_log = Instant::now();
            }
        }

        info!("motion detection loop stopped");
    }

    /// Establish the event identity with the central server, then hand the
    /// event to the processor. Blocks until the server acknowledges.
    async fn register_and_publish(&self, motion_score: u32) -> Result<(), ApiError> {
        let timestamp = chrono::Local::now();
        let iso = artifacts::iso_timestamp(&timestamp);

        match self.api.create_event(&iso, motion_score).await {
            Ok(event_id) => {
                self.signal.set(MotionEventHandle {
                    event_id,
                    timestamp,
                });
                info!(event_id, "event processor signalled");
                Ok(())
            }
            Err(ApiError::Cancelled) => Err(ApiError::Cancelled),
            Err(err) => {
                // create_event retries forever; any other error is terminal
                // only for this tick.
                error!(error = %err, "event registration failed, motion event lost");
                Ok(())
            }
        }
    }
}
