//! Bounded circular video buffer.
//!
//! Holds the most recent encoded H.264 chunks (capacity- and byte-capped,
//! FIFO eviction) plus the latest two downscaled detection frames. Written
//! by the encoder pump, read by the motion detector (frames) and the event
//! processor (chunks). One mutex guards the state; critical sections stay
//! short and perform no I/O.

use crate::capture::StillCapture;
use crate::error::Result;
use crate::frame::DetectionFrame;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, warn};

/// One encoder output unit of the H.264 elementary stream, stored opaquely.
pub type Chunk = Vec<u8>;

/// Pause/resume control the buffer forwards to its attached detector during
/// mode transitions. The orchestrator owns both sides and injects the link;
/// the buffer only holds it weakly.
pub trait DetectorControl: Send + Sync {
    fn pause(&self);
    fn resume(&self);
}

/// Capacity and estimation tunables, mapped from the validated config.
#[derive(Debug, Clone)]
pub struct BufferSettings {
    pub max_chunks: usize,
    pub max_bytes: u64,
    /// Fill fraction of `max_chunks` the post-motion refill waits for.
    pub post_fill_fraction: f64,
    /// Cap on the post-motion refill wait.
    pub post_timeout: Duration,
    /// Configured encoder bitrate, used for the advisory duration estimate.
    pub bitrate_bps: u64,
    /// JPEG quality for full-resolution stills.
    pub jpeg_quality: u8,
}

#[derive(Debug, Default)]
struct BufferState {
    chunks: VecDeque<Chunk>,
    bytes_held: u64,
    previous: Option<DetectionFrame>,
    current: Option<DetectionFrame>,
    paused: bool,
}

/// Shared chunk ring + frame slots. See the module docs for the access
/// pattern; all methods are callable from any task.
pub struct ChunkBuffer {
    settings: BufferSettings,
    still: Arc<dyn StillCapture>,
    state: Mutex<BufferState>,
    detector: Mutex<Option<Weak<dyn DetectorControl>>>,
}

impl std::fmt::Debug for ChunkBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkBuffer")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ChunkBuffer {
    pub fn new(settings: BufferSettings, still: Arc<dyn StillCapture>) -> Self {
        Self {
            settings,
            still,
            state: Mutex::new(BufferState::default()),
            detector: Mutex::new(None),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a chunk, evicting from the front until both the chunk-count
    /// and byte caps hold again.
    pub fn push_chunk(&self, chunk: Chunk) {
        let mut state = self.state();
        state.bytes_held += chunk.len() as u64;
        state.chunks.push_back(chunk);
        while state.chunks.len() > self.settings.max_chunks
            || state.bytes_held > self.settings.max_bytes
        {
            match state.chunks.pop_front() {
                Some(evicted) => state.bytes_held -= evicted.len() as u64,
                None => break,
            }
        }
    }

    /// Rotate the frame slots: `previous` becomes the prior `current`.
    /// Suppressed while paused.
    pub fn push_detection_frame(&self, frame: DetectionFrame) {
        let mut state = self.state();
        if state.paused {
            return;
        }
        state.previous = state.current.take();
        state.current = Some(frame);
    }

    /// Snapshot of the two frame slots; either may be absent during warmup.
    pub fn frames_for_detection(&self) -> (Option<DetectionFrame>, Option<DetectionFrame>) {
        let state = self.state();
        (state.previous.clone(), state.current.clone())
    }

    pub fn chunk_count(&self) -> usize {
        self.state().chunks.len()
    }

    pub fn bytes_held(&self) -> u64 {
        self.state().bytes_held
    }

    /// Current fill as a fraction of the chunk capacity.
    pub fn fill_fraction(&self) -> f64 {
        self.chunk_count() as f64 / self.settings.max_chunks.max(1) as f64
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    /// Pause or resume frame updates, forwarding the transition to the
    /// attached detector. Chunks keep flowing either way.
    pub fn set_paused(&self, paused: bool) {
        self.state().paused = paused;
        let control = {
            let detector = self.detector.lock().unwrap_or_else(|e| e.into_inner());
            detector.as_ref().and_then(Weak::upgrade)
        };
        if let Some(control) = control {
            if paused {
                control.pause();
            } else {
                control.resume();
            }
        }
    }

    /// Install the weak detector link used by [`ChunkBuffer::set_paused`].
    pub fn attach_motion_detector(&self, control: Weak<dyn DetectorControl>) {
        *self.detector.lock().unwrap_or_else(|e| e.into_inner()) = Some(control);
    }

    /// Capture a full-resolution color still through the attached capturer.
    pub async fn capture_color_still(&self, dest: &Path) -> Result<()> {
        self.still
            .capture_jpeg(dest, self.settings.jpeg_quality)
            .await
    }

    fn take_chunks(&self) -> (Vec<Chunk>, u64) {
        let mut state = self.state();
        let bytes = state.bytes_held;
        state.bytes_held = 0;
        (state.chunks.drain(..).collect(), bytes)
    }

    /// Write the held footage to `dest` as a raw H.264 elementary stream and
    /// return the estimated duration in seconds.
    ///
    /// Two phases: the currently held (pre-motion) chunks are written and
    /// cleared, then the ring is left to refill with post-motion footage
    /// until it reaches the configured fill fraction or the post-timeout
    /// expires, and the refilled chunks are appended and cleared. The file
    /// is fsync'd before returning so a sentinel touched afterwards is a
    /// truthful readiness signal.
    ///
    /// The duration estimate back-calculates from the configured bitrate;
    /// the server recomputes the authoritative value from the file itself.
    pub async fn save_h264(&self, dest: &Path) -> Result<f64> {
        let mut file = tokio::fs::File::create(dest).await?;

        let (pre, pre_bytes) = self.take_chunks();
        for chunk in &pre {
            file.write_all(chunk).await?;
        }
        debug!(
            chunks = pre.len(),
            bytes = pre_bytes,
            "pre-motion footage written, waiting for post-motion refill"
        );
        drop(pre);

        let deadline = Instant::now() + self.settings.post_timeout;
        while self.fill_fraction() < self.settings.post_fill_fraction {
            if Instant::now() >= deadline {
                warn!(
                    held = self.chunk_count(),
                    "post-motion refill timed out, dumping what we have"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }

        let (post, post_bytes) = self.take_chunks();
        for chunk in &post {
            file.write_all(chunk).await?;
        }
        file.sync_all().await?;

        let total_bytes = pre_bytes + post_bytes;
        Ok(total_bytes as f64 * 8.0 / self.settings.bitrate_bps.max(1) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct NullStill;

    #[async_trait]
    impl StillCapture for NullStill {
        async fn capture_jpeg(&self, _dest: &Path, _quality: u8) -> Result<()> {
            Err(AgentError::Capture("no camera in tests".into()))
        }
    }

    fn buffer(max_chunks: usize, max_bytes: u64) -> ChunkBuffer {
        ChunkBuffer::new(
            BufferSettings {
                max_chunks,
                max_bytes,
                post_fill_fraction: 0.95,
                post_timeout: Duration::from_millis(50),
                bitrate_bps: 3_000_000,
                jpeg_quality: 80,
            },
            Arc::new(NullStill),
        )
    }

    fn frame(fill: u8) -> DetectionFrame {
        DetectionFrame::luma(2, 2, vec![fill; 4]).unwrap()
    }

    #[test]
    fn push_at_capacity_evicts_exactly_one() {
        let buffer = buffer(3, u64::MAX);
        for i in 0u8..3 {
            buffer.push_chunk(vec![i; 4]);
        }
        assert_eq!(buffer.chunk_count(), 3);

        buffer.push_chunk(vec![9; 4]);
        assert_eq!(buffer.chunk_count(), 3);
        assert_eq!(buffer.bytes_held(), 12);

        let (chunks, _) = buffer.take_chunks();
        // FIFO eviction dropped the oldest chunk.
        assert_eq!(chunks[0], vec![1; 4]);
        assert_eq!(chunks[2], vec![9; 4]);
    }

    #[test]
    fn byte_cap_evicts_until_it_holds() {
        let buffer = buffer(100, 10);
        buffer.push_chunk(vec![0; 6]);
        buffer.push_chunk(vec![1; 4]);
        assert_eq!(buffer.bytes_held(), 10);

        buffer.push_chunk(vec![2; 8]);
        // Both older chunks go to get back under the 10-byte cap.
        assert_eq!(buffer.chunk_count(), 1);
        assert_eq!(buffer.bytes_held(), 8);
    }

    #[test]
    fn frame_slots_rotate() {
        let buffer = buffer(8, u64::MAX);
        assert_eq!(buffer.frames_for_detection(), (None, None));

        buffer.push_detection_frame(frame(1));
        let (previous, current) = buffer.frames_for_detection();
        assert!(previous.is_none());
        assert_eq!(current, Some(frame(1)));

        buffer.push_detection_frame(frame(2));
        buffer.push_detection_frame(frame(3));
        let (previous, current) = buffer.frames_for_detection();
        assert_eq!(previous, Some(frame(2)));
        assert_eq!(current, Some(frame(3)));
    }

    #[test]
    fn pause_suppresses_frames_but_not_chunks() {
        let buffer = buffer(8, u64::MAX);
        buffer.push_detection_frame(frame(1));
        buffer.set_paused(true);

        buffer.push_detection_frame(frame(2));
        buffer.push_chunk(vec![0; 4]);

        let (_, current) = buffer.frames_for_detection();
        assert_eq!(current, Some(frame(1)), "frame update suppressed");
        assert_eq!(buffer.chunk_count(), 1, "chunks keep recording");

        buffer.set_paused(false);
        buffer.push_detection_frame(frame(2));
        let (_, current) = buffer.frames_for_detection();
        assert_eq!(current, Some(frame(2)));
    }

    #[test]
    fn pause_transitions_reach_the_attached_detector() {
        #[derive(Default)]
        struct Recorder {
            paused: AtomicBool,
            transitions: AtomicU32,
        }
        impl DetectorControl for Recorder {
            fn pause(&self) {
                self.paused.store(true, Ordering::SeqCst);
                self.transitions.fetch_add(1, Ordering::SeqCst);
            }
            fn resume(&self) {
                self.paused.store(false, Ordering::SeqCst);
                self.transitions.fetch_add(1, Ordering::SeqCst);
            }
        }

        let buffer = buffer(8, u64::MAX);
        let recorder = Arc::new(Recorder::default());
        buffer.attach_motion_detector(
            Arc::downgrade(&recorder) as Weak<dyn DetectorControl>
        );

        buffer.set_paused(true);
        assert!(recorder.paused.load(Ordering::SeqCst));
        buffer.set_paused(false);
        assert!(!recorder.paused.load(Ordering::SeqCst));
        assert_eq!(recorder.transitions.load(Ordering::SeqCst), 2);

        // A dropped detector must not break pause handling.
        drop(recorder);
        buffer.set_paused(true);
        assert!(buffer.is_paused());
    }

    #[tokio::test]
    async fn save_h264_with_empty_buffer_writes_zero_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("0_20251030_143022_video.h264");

        let buffer = buffer(4, u64::MAX);
        let duration = buffer.save_h264(&dest).await.unwrap();

        assert_eq!(duration, 0.0);
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn save_h264_appends_post_motion_refill() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("7_20251030_143022_video.h264");

        let buffer = Arc::new(ChunkBuffer::new(
            BufferSettings {
                max_chunks: 4,
                max_bytes: u64::MAX,
                post_fill_fraction: 0.5,
                post_timeout: Duration::from_secs(5),
                bitrate_bps: 8, // 1 byte per second, keeps the estimate readable
                jpeg_quality: 80,
            },
            Arc::new(NullStill),
        ));
        buffer.push_chunk(b"pre-".to_vec());

        let producer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                buffer.push_chunk(b"post1".to_vec());
                buffer.push_chunk(b"post2".to_vec());
            })
        };

        let duration = buffer.save_h264(&dest).await.unwrap();
        producer.await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"pre-post1post2");
        assert_eq!(duration, 14.0);
        assert_eq!(buffer.chunk_count(), 0, "ring cleared after the dump");
    }
}
