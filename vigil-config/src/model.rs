use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Settings identifying this camera in the multi-camera system. Must be
/// unique per deployment.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraIdentity {
    pub id: String,
    pub name: String,
    pub location: String,
}

/// Central server endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    /// `http://{host}:{port}/api/v1`
    pub fn api_base(&self) -> String {
        format!("http://{}:{}/api/v1", self.host, self.port)
    }
}

/// Filesystem layout. The network-storage subdirectories are owned by the
/// central server and are never created by the agent.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    pub base: PathBuf,
    pub nfs_mount: PathBuf,
}

impl PathsConfig {
    pub fn tmp(&self) -> PathBuf {
        self.base.join("tmp")
    }

    /// Local staging area between the processor and the transfer manager.
    pub fn pending(&self) -> PathBuf {
        self.tmp().join("pending")
    }

    pub fn pictures(&self) -> PathBuf {
        self.nfs_mount.join("pictures")
    }

    pub fn videos(&self) -> PathBuf {
        self.nfs_mount.join("videos")
    }

    pub fn thumbs(&self) -> PathBuf {
        self.nfs_mount.join("thumbs")
    }
}

/// Circular-buffer capacity. Pre- and post-motion footage are both
/// capacity-driven; the target duration is approximate and only logged.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    pub max_chunks: usize,
    pub max_bytes: u64,
    /// Approximate pre-motion duration the capacity is tuned for.
    pub target_seconds: f64,
    /// Post-motion refill target as a fraction of `max_chunks`.
    pub post_fill_fraction: f64,
    /// Cap on the post-motion refill wait.
    pub post_timeout_s: f64,
}

impl BufferConfig {
    pub fn post_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.post_timeout_s.max(0.0))
    }
}

/// Encoder settings.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoConfig {
    pub resolution: (u32, u32),
    pub framerate: u32,
    /// H.264 bitrate in bits per second.
    pub bitrate: u64,
    /// Raw elementary stream only; muxing happens on the central server.
    pub output_format: String,
    /// Camera binary spawned as the chunk producer.
    pub camera_bin: String,
}

/// Still/thumbnail capture settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PictureConfig {
    /// Detection-frame cadence; these frames feed both motion comparison and
    /// the stills.
    pub capture_interval_s: f64,
    pub jpeg_quality: u8,
    pub thumbnail_size: (u32, u32),
}

impl PictureConfig {
    pub fn capture_interval(&self) -> Duration {
        Duration::from_secs_f64(self.capture_interval_s.max(0.0))
    }
}

/// Motion detection tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    /// Comparison resolution; full frames are downscaled to this.
    pub detection_resolution: (u32, u32),
    /// Per-pixel change floor (0-255).
    pub threshold: u8,
    /// Changed-pixel count that declares motion.
    pub sensitivity: u32,
    /// Suppression window after a trigger. Must exceed the processing
    /// window (see [`crate::validation::COOLDOWN_FLOOR_SECS`]).
    pub cooldown_s: f64,
    /// Log a check-stats line every N checks; 0 disables.
    pub log_interval: u64,
    /// Log comparison details when motion is detected.
    pub log_details: bool,
    /// Write the changed-pixel overlay bitmap on every trigger.
    pub debug_overlay: bool,
}

impl MotionConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_s.max(0.0))
    }
}

/// Pending-directory drain settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    pub check_interval_s: f64,
    /// Per-file copy wall-clock cap.
    pub timeout_s: f64,
}

impl TransferConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.check_interval_s.max(0.0))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_s.max(0.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogDestination {
    /// Batch-ship to the central server.
    Api,
    /// Console only (fallback/testing).
    Local,
}

/// Log batching settings. Console output is immediate regardless.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    pub destination: LogDestination,
    pub batch_interval_s: f64,
    /// Flush early once this many entries are queued.
    pub buffer_size: usize,
}

impl LogConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_secs_f64(self.batch_interval_s.max(0.0))
    }
}

/// Process-level settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    /// Exposure/white-balance settling time after camera start.
    pub warmup_s: f64,
    /// Soft budget for the whole shutdown sequence.
    pub shutdown_timeout_s: f64,
}

impl SystemConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_secs_f64(self.warmup_s.max(0.0))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.shutdown_timeout_s.max(0.0))
    }
}

/// The validated snapshot every component reads from.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub camera: CameraIdentity,
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub buffer: BufferConfig,
    pub video: VideoConfig,
    pub pictures: PictureConfig,
    pub motion: MotionConfig,
    pub transfer: TransferConfig,
    pub log: LogConfig,
    pub system: SystemConfig,
}

impl Config {
    /// Load from environment variables, honoring a `.env` file when present.
    /// Unparseable values fall back to their defaults; invariants are the
    /// validator's job.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            camera: CameraIdentity {
                id: env_string("CAMERA_ID", "camera_1"),
                name: env_string("CAMERA_NAME", "Front Walkway"),
                location: env_string("CAMERA_LOCATION", "Study"),
            },
            server: ServerConfig {
                host: env_string("CENTRAL_SERVER_HOST", "192.168.1.26"),
                port: env_parse("CENTRAL_SERVER_PORT", 8000),
            },
            paths: {
                let base = PathBuf::from(env_string("BASE_PATH", "/home/pi/vigil"));
                let nfs_mount = env::var("NFS_MOUNT_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| base.join("security_footage"));
                PathsConfig { base, nfs_mount }
            },
            buffer: BufferConfig {
                max_chunks: env_parse("CIRCULAR_BUFFER_MAX_CHUNKS", 1000),
                max_bytes: env_parse("CIRCULAR_BUFFER_MAX_BYTES", 50 * 1024 * 1024),
                target_seconds: env_parse("CIRCULAR_BUFFER_SECONDS", 20.0),
                post_fill_fraction: env_parse("POST_MOTION_BUFFER_FILL", 0.95),
                post_timeout_s: env_parse("POST_MOTION_TIMEOUT_SECONDS", 60.0),
            },
            video: VideoConfig {
                resolution: env_resolution("VIDEO_RESOLUTION", (1280, 720)),
                framerate: env_parse("VIDEO_FRAMERATE", 15),
                bitrate: env_parse("VIDEO_BITRATE", 3_000_000),
                output_format: env_string("VIDEO_OUTPUT_FORMAT", "h264"),
                camera_bin: env_string("CAMERA_BIN", "rpicam-vid"),
            },
            pictures: PictureConfig {
                capture_interval_s: env_parse("PICTURE_CAPTURE_INTERVAL", 0.5),
                jpeg_quality: env_parse("JPEG_QUALITY", 80),
                thumbnail_size: env_resolution("THUMBNAIL_SIZE", (240, 180)),
            },
            motion: MotionConfig {
                detection_resolution: env_resolution("DETECTION_RESOLUTION", (100, 75)),
                threshold: env_parse("MOTION_THRESHOLD", 60),
                sensitivity: env_parse("MOTION_SENSITIVITY", 50),
                cooldown_s: env_parse("MOTION_COOLDOWN_SECONDS", 65.0),
                log_interval: env_parse("MOTION_LOG_INTERVAL", 100),
                log_details: env_parse("MOTION_LOG_DETAILS", true),
                debug_overlay: env_parse("MOTION_DEBUG_OVERLAY", false),
            },
            transfer: TransferConfig {
                check_interval_s: env_parse("TRANSFER_CHECK_INTERVAL", 0.25),
                timeout_s: env_parse("TRANSFER_TIMEOUT", 30.0),
            },
            log: LogConfig {
                destination: match env_string("LOG_DESTINATION", "api").as_str() {
                    "local" => LogDestination::Local,
                    _ => LogDestination::Api,
                },
                batch_interval_s: env_parse("LOG_BATCH_INTERVAL", 10.0),
                buffer_size: env_parse("LOG_BUFFER_SIZE", 100),
            },
            system: SystemConfig {
                warmup_s: env_parse("CAMERA_WARMUP_SECONDS", 2.0),
                shutdown_timeout_s: env_parse("SHUTDOWN_TIMEOUT_SECONDS", 10.0),
            },
        }
    }

    /// Create the local directories the agent owns. Network-storage
    /// subdirectories belong to the central server and are left alone.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.paths.base)?;
        std::fs::create_dir_all(self.paths.tmp())?;
        std::fs::create_dir_all(self.paths.pending())?;
        Ok(())
    }

    /// Reload hook for server-pushed configuration. No-op in this phase:
    /// the snapshot is static for the process lifetime.
    pub fn reload(&mut self) {}
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

/// `WIDTHxHEIGHT`, e.g. `1280x720`.
fn env_resolution(key: &str, default: (u32, u32)) -> (u32, u32) {
    env::var(key)
        .ok()
        .and_then(|raw| {
            let (w, h) = raw.split_once('x')?;
            Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
        })
        .unwrap_or(default)
}
