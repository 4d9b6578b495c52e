//! Camera child-process driver.
//!
//! Spawns the platform camera binary (`rpicam-vid` by default) emitting a
//! raw H.264 elementary stream on stdout. The pump pushes every stream
//! chunk into the circular buffer unmodified, and taps the same bytes
//! through an in-process decoder to maintain the latest decoded frame: the
//! luma plane is downscaled into detection frames on the configured
//! cadence, and the full frame backs the `StillCapture` capability for the
//! event processor's pictures.
//!
//! The child is respawned with a short backoff if it dies; the pump itself
//! only exits on shutdown.

use anyhow::Context as _;
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{GrayImage, Rgb, RgbImage};
use openh264::decoder::{DecodedYUV, Decoder};
use openh264::formats::YUVSource;
use std::io::BufWriter;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vigil_config::Config;
use vigil_core::buffer::ChunkBuffer;
use vigil_core::capture::StillCapture;
use vigil_core::error::AgentError;
use vigil_core::frame::DetectionFrame;

const RESPAWN_BACKOFF: Duration = Duration::from_secs(2);
const READ_CHUNK_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub bin: String,
    pub resolution: (u32, u32),
    pub framerate: u32,
    pub bitrate: u64,
    pub detection_resolution: (u32, u32),
    pub capture_interval: Duration,
}

impl CameraSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bin: config.video.camera_bin.clone(),
            resolution: config.video.resolution,
            framerate: config.video.framerate,
            bitrate: config.video.bitrate,
            detection_resolution: config.motion.detection_resolution,
            capture_interval: config.pictures.capture_interval(),
        }
    }
}

/// One decoded frame, planes copied tight (stride removed).
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
}

impl RawFrame {
    fn from_decoded(yuv: &DecodedYUV<'_>) -> Self {
        let (width, height) = yuv.dimensions();
        let (y_stride, u_stride, v_stride) = yuv.strides();
        let chroma_w = width.div_ceil(2);
        let chroma_h = height.div_ceil(2);
        Self {
            width: width as u32,
            height: height as u32,
            y: tighten(yuv.y(), y_stride, width, height),
            u: tighten(yuv.u(), u_stride, chroma_w, chroma_h),
            v: tighten(yuv.v(), v_stride, chroma_w, chroma_h),
        }
    }

    #[cfg(test)]
    fn from_planes(width: u32, height: u32, y: Vec<u8>, u: Vec<u8>, v: Vec<u8>) -> Self {
        Self {
            width,
            height,
            y,
            u,
            v,
        }
    }

    /// Downscale the luma plane to the detection resolution.
    fn detection_frame(&self, target: (u32, u32)) -> Option<DetectionFrame> {
        let gray = GrayImage::from_raw(self.width, self.height, self.y.clone())?;
        let small = image::imageops::resize(&gray, target.0, target.1, FilterType::Triangle);
        DetectionFrame::luma(target.0, target.1, small.into_raw())
    }

    /// BT.601 I420 -> RGB for still capture.
    fn to_rgb(&self) -> RgbImage {
        let width = self.width as usize;
        let chroma_w = width.div_ceil(2);
        let mut image = RgbImage::new(self.width, self.height);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            let (xs, ys) = (x as usize, y as usize);
            let luma = i32::from(self.y[ys * width + xs]);
            let cb = i32::from(self.u[(ys / 2) * chroma_w + xs / 2]) - 128;
            let cr = i32::from(self.v[(ys / 2) * chroma_w + xs / 2]) - 128;
            let c = (luma - 16).max(0);
            let r = (298 * c + 409 * cr + 128) >> 8;
            let g = (298 * c - 100 * cb - 208 * cr + 128) >> 8;
            let b = (298 * c + 516 * cb + 128) >> 8;
            *pixel = Rgb([clamp_u8(r), clamp_u8(g), clamp_u8(b)]);
        }
        image
    }
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

fn tighten(plane: &[u8], stride: usize, width: usize, height: usize) -> Vec<u8> {
    let mut tight = Vec::with_capacity(width * height);
    for row in 0..height {
        let start = row * stride;
        tight.extend_from_slice(&plane[start..start + width]);
    }
    tight
}

/// Shared slot for the most recent decoded frame. Doubles as the
/// full-resolution still capturer.
#[derive(Debug, Default)]
pub struct FrameStore {
    latest: Mutex<Option<RawFrame>>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&self, frame: RawFrame) {
        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(frame);
    }

    fn snapshot(&self) -> Option<RawFrame> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl StillCapture for FrameStore {
    async fn capture_jpeg(&self, dest: &Path, quality: u8) -> vigil_core::Result<()> {
        let frame = self
            .snapshot()
            .ok_or_else(|| AgentError::Capture("no decoded frame available yet".into()))?;
        let dest = dest.to_path_buf();

        tokio::task::spawn_blocking(move || -> vigil_core::Result<()> {
            let rgb = frame.to_rgb();
            let mut out = BufWriter::new(std::fs::File::create(&dest)?);
            JpegEncoder::new_with_quality(&mut out, quality).encode_image(&rgb)?;
            Ok(())
        })
        .await
        .map_err(|join| AgentError::Capture(format!("still capture task failed: {join}")))?
    }
}

/// Find the byte offset of the last Annex-B start code (`00 00 01`,
/// extended to include a preceding zero) in the buffer.
fn last_start_code(buf: &[u8]) -> Option<usize> {
    if buf.len() < 3 {
        return None;
    }
    (0..=buf.len() - 3)
        .rev()
        .find(|&i| buf[i] == 0 && buf[i + 1] == 0 && buf[i + 2] == 1)
        .map(|i| if i > 0 && buf[i - 1] == 0 { i - 1 } else { i })
}

/// Split off everything before the last start code: those NAL units are
/// complete and safe to decode. The tail (a unit still streaming in) stays.
fn split_complete_nals(pending: &mut Vec<u8>) -> Option<Vec<u8>> {
    let boundary = last_start_code(pending)?;
    if boundary == 0 {
        return None;
    }
    let tail = pending.split_off(boundary);
    Some(std::mem::replace(pending, tail))
}

/// The chunk-producer activity.
pub struct CameraPump {
    settings: CameraSettings,
    buffer: Arc<ChunkBuffer>,
    store: Arc<FrameStore>,
    shutdown: tokio_util::sync::CancellationToken,
}

impl CameraPump {
    pub fn new(
        settings: CameraSettings,
        buffer: Arc<ChunkBuffer>,
        store: Arc<FrameStore>,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> Self {
        Self {
            settings,
            buffer,
            store,
            shutdown,
        }
    }

    pub async fn run(self) {
        info!(bin = %self.settings.bin, "camera pump started");
        while !self.shutdown.is_cancelled() {
            match self.stream_once().await {
                Ok(()) => break, // shutdown
                Err(err) => {
                    warn!(error = %err, "camera pipeline failed, respawning");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RESPAWN_BACKOFF) => {}
                    }
                }
            }
        }
        info!("camera pump stopped");
    }

    fn command(&self) -> Command {
        let (width, height) = self.settings.resolution;
        let mut cmd = Command::new(&self.settings.bin);
        cmd.arg("-t")
            .arg("0")
            .arg("--nopreview")
            .arg("--codec")
            .arg("h264")
            .arg("--inline")
            .arg("--width")
            .arg(width.to_string())
            .arg("--height")
            .arg(height.to_string())
            .arg("--framerate")
            .arg(self.settings.framerate.to_string())
            .arg("--bitrate")
            .arg(self.settings.bitrate.to_string())
            .arg("-o")
            .arg("-");
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        cmd.kill_on_drop(true);
        cmd
    }

    /// One child lifetime: spawn, stream until EOF or shutdown.
    async fn stream_once(&self) -> anyhow::Result<()> {
        let mut child = self
            .command()
            .spawn()
            .with_context(|| format!("spawning {}", self.settings.bin))?;
        let mut stdout = child
            .stdout
            .take()
            .context("camera child has no stdout pipe")?;

        let mut decoder =
            Decoder::new().map_err(|err| anyhow::anyhow!("decoder init failed: {err}"))?;
        let mut undecoded: Vec<u8> = Vec::new();
        let mut read_buf = vec![0u8; READ_CHUNK_BYTES];
        let mut last_frame_push: Option<Instant> = None;

        loop {
            let read = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    child.start_kill().ok();
                    return Ok(());
                }
                read = stdout.read(&mut read_buf) => read,
            };

            let n = read.context("reading camera stream")?;
            if n == 0 {
                anyhow::bail!("camera stream ended");
            }

            let chunk = read_buf[..n].to_vec();
            undecoded.extend_from_slice(&chunk);
            self.buffer.push_chunk(chunk);

            if let Some(complete) = split_complete_nals(&mut undecoded) {
                for nal in openh264::nal_units(&complete) {
                    match decoder.decode(nal) {
                        Ok(Some(yuv)) => self.handle_frame(&yuv, &mut last_frame_push),
                        Ok(None) => {}
                        Err(err) => {
                            // Reinitialize to clear decoder state, matching
                            // the stream joining behavior after an IDR.
                            debug!(error = %err, "decode error, reinitializing decoder");
                            decoder = Decoder::new()
                                .map_err(|err| anyhow::anyhow!("decoder reinit failed: {err}"))?;
                        }
                    }
                }
            }
        }
    }

    fn handle_frame(&self, yuv: &DecodedYUV<'_>, last_frame_push: &mut Option<Instant>) {
        let frame = RawFrame::from_decoded(yuv);

        let due = last_frame_push
            .map(|at| at.elapsed() >= self.settings.capture_interval)
            .unwrap_or(true);
        if due && let Some(detection) = frame.detection_frame(self.settings.detection_resolution) {
            self.buffer.push_detection_frame(detection);
            *last_frame_push = Some(Instant::now());
        }

        self.store.put(frame);
    }
}
