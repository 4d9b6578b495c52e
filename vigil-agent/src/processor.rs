//! Event processing: the timed artifact sequence.
//!
//! For each handle taken from the motion signal the processor stages four
//! artifacts into the pending directory on a fixed timeline:
//!
//! | T (s)    | artifact                                |
//! |----------|-----------------------------------------|
//! | 0        | picture A (full-resolution still)       |
//! | ~0       | thumbnail (resized from A)              |
//! | 4        | picture B                               |
//! | 4..35    | video (pre/post-motion buffer dump)     |
//!
//! Every artifact is fsync'd before its `.READY` sentinel appears, so the
//! transfer manager never observes a torn file. A single artifact failing
//! is logged and the sequence moves on; the server's event record simply
//! never references that file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use vigil_config::Config;
use vigil_core::artifacts::{self, ArtifactKind};
use vigil_core::buffer::ChunkBuffer;
use vigil_core::capture::Thumbnailer;
use vigil_core::error::Result;
use vigil_core::signal::{MotionEventHandle, MotionSignal};

/// Gap between the motion-moment still and the follow-up still.
pub const PICTURE_B_DELAY: Duration = Duration::from_secs(4);

/// Watchdog pause handle: a paused processor drops events that arrive while
/// it is away (the server keeps the record; the artifacts are forfeit).
#[derive(Debug, Default)]
pub struct ProcessorHandle {
    paused: AtomicBool,
}

impl ProcessorHandle {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("event processor paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("event processor resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

pub struct EventProcessor {
    buffer: Arc<ChunkBuffer>,
    signal: Arc<MotionSignal>,
    thumbnailer: Arc<dyn Thumbnailer>,
    pending_dir: PathBuf,
    thumbnail_size: (u32, u32),
    jpeg_quality: u8,
    handle: Arc<ProcessorHandle>,
    shutdown: CancellationToken,
}

impl EventProcessor {
    pub fn new(
        config: &Config,
        buffer: Arc<ChunkBuffer>,
        signal: Arc<MotionSignal>,
        thumbnailer: Arc<dyn Thumbnailer>,
        shutdown: CancellationToken,
    ) -> (Self, Arc<ProcessorHandle>) {
        let handle = Arc::new(ProcessorHandle::default());
        let processor = Self {
            buffer,
            signal,
            thumbnailer,
            pending_dir: config.paths.pending(),
            thumbnail_size: config.pictures.thumbnail_size,
            jpeg_quality: config.pictures.jpeg_quality,
            handle: Arc::clone(&handle),
            shutdown,
        };
        (processor, handle)
    }

    pub async fn run(self) {
        info!(pending_dir = %self.pending_dir.display(), "event processing loop started");

        loop {
            let handle = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                handle = self.signal.wait_and_get() => handle,
            };

            if self.handle.is_paused() {
                info!(
                    event_id = handle.event_id,
                    "discarding event received while paused"
                );
                continue;
            }

            self.process_event(handle).await;
        }

        info!("event processing loop stopped");
    }

    async fn process_event(&self, handle: MotionEventHandle) {
        let event_id = handle.event_id;
        let ts = artifacts::filename_timestamp(&handle.timestamp);
        let started = Instant::now();
        info!(event_id, timestamp = %ts, "processing event");

        // T+0: picture A, then its thumbnail.
        let picture_a = self.artifact_path(event_id, &ts, ArtifactKind::ImageA);
        let picture_a_ok = self
            .stage(event_id, ArtifactKind::ImageA, async {
                self.buffer.capture_color_still(&picture_a).await?;
                finalize_artifact(&picture_a).await
            })
            .await;

        if picture_a_ok {
            let thumb = self.artifact_path(event_id, &ts, ArtifactKind::Thumbnail);
            self.stage(event_id, ArtifactKind::Thumbnail, async {
                self.thumbnailer
                    .thumbnail(&picture_a, &thumb, self.thumbnail_size, self.jpeg_quality)
                    .await?;
                finalize_artifact(&thumb).await
            })
            .await;
        } else {
            // Nothing to resize from; the thumbnail is forfeit with A.
            error!(event_id, "skipping thumbnail, picture A was not captured");
        }

        // T+4: picture B.
        tokio::select! {
            _ = self.shutdown.cancelled() => return,
            _ = tokio::time::sleep(PICTURE_B_DELAY) => {}
        }

        let picture_b = self.artifact_path(event_id, &ts, ArtifactKind::ImageB);
        self.stage(event_id, ArtifactKind::ImageB, async {
            self.buffer.capture_color_still(&picture_b).await?;
            finalize_artifact(&picture_b).await
        })
        .await;

        // T+4..: video, blocking for the post-motion refill.
        let video = self.artifact_path(event_id, &ts, ArtifactKind::Video);
        self.stage(event_id, ArtifactKind::Video, async {
            let duration = self.buffer.save_h264(&video).await?;
            info!(
                event_id,
                estimated_s = format!("{duration:.1}"),
                "video footage dumped"
            );
            finalize_artifact(&video).await
        })
        .await;

        info!(
            event_id,
            elapsed_s = format!("{:.1}", started.elapsed().as_secs_f64()),
            "event staged for transfer"
        );
    }

    fn artifact_path(&self, event_id: i64, ts: &str, kind: ArtifactKind) -> PathBuf {
        self.pending_dir
            .join(artifacts::artifact_filename(event_id, ts, kind))
    }

    /// Run one artifact step, logging the outcome. Failures never abort the
    /// sequence.
    async fn stage(
        &self,
        event_id: i64,
        kind: ArtifactKind,
        step: impl Future<Output = Result<()>>,
    ) -> bool {
        match step.await {
            Ok(()) => {
                info!(event_id, artifact = kind.file_type(), "artifact ready for transfer");
                true
            }
            Err(err) => {
                error!(
                    event_id,
                    artifact = kind.file_type(),
                    error = %err,
                    "artifact capture failed, continuing"
                );
                false
            }
        }
    }
}

/// Durability step: fsync the artifact, then create and fsync its sentinel.
/// The sentinel's existence is the transfer manager's only readiness signal,
/// so it must never precede the data reaching disk.
async fn finalize_artifact(path: &Path) -> Result<()> {
    let artifact = tokio::fs::File::open(path).await?;
    artifact.sync_all().await?;

    let sentinel = artifacts::sentinel_path(path);
    let marker = tokio::fs::File::create(&sentinel).await?;
    marker.sync_all().await?;
    Ok(())
}
