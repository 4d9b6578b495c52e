//! Orchestrator: owns every component's lifecycle.
//!
//! Startup order is load-bearing: config is validated before anything is
//! built, directories exist before any writer starts, and the camera is
//! registered with the central server (blocking, cancellable) before any
//! activity that could reference it runs. Shutdown is the reverse, with a
//! bounded join per activity inside one soft budget; activities that
//! overstay are abandoned.

use crate::camera::{CameraPump, CameraSettings, FrameStore};
use crate::detector::{DetectorHandle, MotionDetector};
use crate::processor::{EventProcessor, ProcessorHandle};
use crate::shipper::LogBatcher;
use crate::transfer::TransferManager;
use anyhow::Context as _;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vigil_config::{Config, validation};
use vigil_core::api::{ApiClient, ApiError, ApiSettings, LogEntry};
use vigil_core::buffer::{BufferSettings, ChunkBuffer, DetectorControl};
use vigil_core::capture::ImageThumbnailer;
use vigil_core::signal::MotionSignal;

/// Per-activity join budget during shutdown.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);
/// Supervision cadence; RSS is logged every `RSS_LOG_EVERY` iterations.
const SUPERVISE_TICK: Duration = Duration::from_secs(1);
const RSS_LOG_EVERY: u64 = 200;

pub struct Agent {
    config: Config,
    shutdown: CancellationToken,
    buffer: Arc<ChunkBuffer>,
    signal: Arc<MotionSignal>,
    // The pause handles live here: the buffer only links to the detector
    // weakly, and the watchdog (camera-fault recovery) drives both handles.
    #[allow(dead_code)]
    detector_handle: Arc<DetectorHandle>,
    #[allow(dead_code)]
    processor_handle: Arc<ProcessorHandle>,
    camera: Option<CameraPump>,
    detector: Option<MotionDetector>,
    processor: Option<EventProcessor>,
    transfer: Option<TransferManager>,
    batcher: Option<LogBatcher>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Agent {
    /// Validate config, create directories, and bring up every component in
    /// dependency order. Blocks on camera registration.
    pub async fn initialize(
        config: Config,
        ship_rx: mpsc::UnboundedReceiver<LogEntry>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let warnings = validation::validate(&config).context("configuration rejected")?;
        for warning in warnings.iter() {
            warn!(%warning, "suspicious configuration value");
        }
        info!(
            camera_id = %config.camera.id,
            server = %config.server.api_base(),
            base = %config.paths.base.display(),
            mount = %config.paths.nfs_mount.display(),
            buffer_chunks = config.buffer.max_chunks,
            buffer_target_s = config.buffer.target_seconds,
            cooldown_s = config.motion.cooldown_s,
            "configuration validated"
        );

        config
            .ensure_directories()
            .context("creating local directories")?;

        let api = Arc::new(
            ApiClient::new(
                ApiSettings {
                    base_url: config.server.api_base(),
                    camera_id: config.camera.id.clone(),
                    camera_name: config.camera.name.clone(),
                    camera_location: config.camera.location.clone(),
                },
                shutdown.clone(),
            )
            .context("building API client")?,
        );

        // Identity first: nothing else runs until the server knows us.
        info!("registering camera with central server (retries until acknowledged)");
        match api.register_camera().await {
            Ok(()) => {}
            Err(ApiError::Cancelled) => {
                anyhow::bail!("camera registration aborted by shutdown signal")
            }
            Err(err) => return Err(err).context("camera registration"),
        }

        let signal = Arc::new(MotionSignal::new());
        let frame_store = Arc::new(FrameStore::new());
        let buffer = Arc::new(ChunkBuffer::new(
            BufferSettings {
                max_chunks: config.buffer.max_chunks,
                max_bytes: config.buffer.max_bytes,
                post_fill_fraction: config.buffer.post_fill_fraction,
                post_timeout: config.buffer.post_timeout(),
                bitrate_bps: config.video.bitrate,
                jpeg_quality: config.pictures.jpeg_quality,
            },
            Arc::clone(&frame_store) as Arc<dyn vigil_core::capture::StillCapture>,
        ));

        let camera = CameraPump::new(
            CameraSettings::from_config(&config),
            Arc::clone(&buffer),
            Arc::clone(&frame_store),
            shutdown.clone(),
        );

        let (detector, detector_handle) = MotionDetector::new(
            &config,
            Arc::clone(&buffer),
            Arc::clone(&signal),
            Arc::clone(&api),
            shutdown.clone(),
        );
        buffer.attach_motion_detector(
            Arc::downgrade(&detector_handle) as Weak<dyn DetectorControl>
        );

        let (processor, processor_handle) = EventProcessor::new(
            &config,
            Arc::clone(&buffer),
            Arc::clone(&signal),
            Arc::new(ImageThumbnailer),
            shutdown.clone(),
        );

        let transfer = TransferManager::new(&config, Arc::clone(&api), shutdown.clone());

        let batcher = LogBatcher::new(
            ship_rx,
            Arc::clone(&api),
            config.log.destination,
            config.log.batch_interval(),
            config.log.buffer_size,
            shutdown.clone(),
        );

        info!("core initialization complete");
        Ok(Self {
            config,
            shutdown,
            buffer,
            signal,
            detector_handle,
            processor_handle,
            camera: Some(camera),
            detector: Some(detector),
            processor: Some(processor),
            transfer: Some(transfer),
            batcher: Some(batcher),
            tasks: Vec::new(),
        })
    }

    /// Spawn every activity: camera first (the buffer needs footage), then
    /// detector, processor, transfer, and the log batcher.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        let camera = self.camera.take().context("agent already started")?;
        self.tasks.push(("camera", tokio::spawn(camera.run())));

        // Let the sensor settle exposure/white balance before detection
        // starts comparing frames.
        let warmup = self.config.system.warmup();
        if !warmup.is_zero() {
            info!(seconds = warmup.as_secs_f64(), "camera warmup");
            tokio::select! {
                _ = self.shutdown.cancelled() => {}
                _ = tokio::time::sleep(warmup) => {}
            }
        }

        if let Some(detector) = self.detector.take() {
            self.tasks.push(("motion detector", tokio::spawn(detector.run())));
        }
        if let Some(processor) = self.processor.take() {
            self.tasks.push(("event processor", tokio::spawn(processor.run())));
        }
        if let Some(transfer) = self.transfer.take() {
            self.tasks.push(("transfer manager", tokio::spawn(transfer.run())));
        }
        if let Some(batcher) = self.batcher.take() {
            self.tasks.push(("log batcher", tokio::spawn(batcher.run())));
        }

        info!("camera system running");
        Ok(())
    }

    /// Idle supervision until the shutdown token fires.
    pub async fn supervise(&mut self) {
        let mut iterations: u64 = 0;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(SUPERVISE_TICK) => {}
            }
            iterations += 1;
            if iterations % RSS_LOG_EVERY == 0 {
                if let Some(rss) = resident_bytes() {
                    info!(
                        rss_mb = format!("{:.1}", rss as f64 / (1024.0 * 1024.0)),
                        "memory"
                    );
                }
            }
        }
    }

    /// Reverse-order shutdown with a bounded join per activity inside the
    /// configured soft budget.
    pub async fn stop(mut self) {
        info!("system shutdown initiated");
        self.shutdown.cancel();

        let deadline = tokio::time::Instant::now() + self.config.system.shutdown_timeout();
        // Reverse of startup, with the batcher last so its final drain sees
        // the other activities' shutdown logs.
        const SHUTDOWN_ORDER: [&str; 5] = [
            "motion detector",
            "event processor",
            "transfer manager",
            "camera",
            "log batcher",
        ];
        for name in SHUTDOWN_ORDER {
            let Some(position) = self.tasks.iter().position(|(task, _)| *task == name) else {
                continue;
            };
            let (_, task) = self.tasks.swap_remove(position);
            let remaining = deadline
                .saturating_duration_since(tokio::time::Instant::now())
                .min(JOIN_TIMEOUT);
            match tokio::time::timeout(remaining, task).await {
                Ok(Ok(())) => info!(activity = name, "stopped"),
                Ok(Err(err)) => warn!(activity = name, error = %err, "activity panicked"),
                Err(_elapsed) => warn!(activity = name, "join timed out, abandoning activity"),
            }
        }

        // Drop any event the processor never consumed; the server still has
        // the record.
        if let Some(orphan) = self.signal.clear() {
            warn!(event_id = orphan.event_id, "unprocessed motion event dropped at shutdown");
        }

        info!(
            chunks_held = self.buffer.chunk_count(),
            "system shutdown complete"
        );
    }
}

/// Resident set size from `/proc/self/statm` (page-size 4096).
#[cfg(target_os = "linux")]
fn resident_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * 4096)
}

#[cfg(not(target_os = "linux"))]
fn resident_bytes() -> Option<u64> {
    None
}
