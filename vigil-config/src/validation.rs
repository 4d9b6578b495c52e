//! Guard-rail validation.
//!
//! Misconfiguration that breaks pipeline invariants aborts startup;
//! suspicious-but-legal values come back as warnings for the agent to log.

use crate::model::Config;
use thiserror::Error;

/// The motion cooldown must cover the event-processing window (stills,
/// 4-second gap, post-motion video dump) so a new event can never overlap a
/// sequence still in flight.
pub const COOLDOWN_FLOOR_SECS: f64 = 17.0;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigGuardRailError {
    #[error("camera identity incomplete: {field} is empty")]
    MissingIdentity { field: &'static str },

    #[error("central server host is empty")]
    MissingServerHost,

    #[error(
        "motion cooldown {cooldown_s}s is below the {floor}s processing floor",
        floor = COOLDOWN_FLOOR_SECS
    )]
    CooldownBelowFloor { cooldown_s: f64 },

    #[error("{name} must be positive (got {value})")]
    NonPositive { name: &'static str, value: f64 },

    #[error("post-motion fill fraction {0} is outside (0, 1]")]
    FillFractionOutOfRange(f64),

    #[error("jpeg quality {0} is outside 1..=100")]
    JpegQualityOutOfRange(u8),

    #[error("detection resolution {0}x{1} has a zero dimension")]
    EmptyDetectionResolution(u32, u32),

    #[error("unsupported video output format {0:?} (the device records raw h264 only)")]
    UnsupportedVideoFormat(String),
}

/// A suspicious-but-legal setting. Logged at startup, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning(pub String);

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigWarnings(Vec<ConfigWarning>);

impl ConfigWarnings {
    fn push(&mut self, message: impl Into<String>) {
        self.0.push(ConfigWarning(message.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.0.iter()
    }
}

/// Validate the snapshot. Errors are fail-hard; the returned warnings are
/// for the caller to log.
pub fn validate(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let identity = [
        ("id", config.camera.id.trim()),
        ("name", config.camera.name.trim()),
        ("location", config.camera.location.trim()),
    ];
    for (field, value) in identity {
        if value.is_empty() {
            return Err(ConfigGuardRailError::MissingIdentity { field });
        }
    }

    if config.server.host.trim().is_empty() {
        return Err(ConfigGuardRailError::MissingServerHost);
    }

    if config.motion.cooldown_s < COOLDOWN_FLOOR_SECS {
        return Err(ConfigGuardRailError::CooldownBelowFloor {
            cooldown_s: config.motion.cooldown_s,
        });
    }

    let positives = [
        ("picture capture interval", config.pictures.capture_interval_s),
        ("transfer check interval", config.transfer.check_interval_s),
        ("transfer timeout", config.transfer.timeout_s),
        ("log batch interval", config.log.batch_interval_s),
        ("post-motion timeout", config.buffer.post_timeout_s),
        ("shutdown timeout", config.system.shutdown_timeout_s),
        ("buffer chunk capacity", config.buffer.max_chunks as f64),
        ("buffer byte capacity", config.buffer.max_bytes as f64),
        ("video framerate", config.video.framerate as f64),
        ("video bitrate", config.video.bitrate as f64),
    ];
    for (name, value) in positives {
        if value <= 0.0 {
            return Err(ConfigGuardRailError::NonPositive { name, value });
        }
    }

    let fill = config.buffer.post_fill_fraction;
    if !(fill > 0.0 && fill <= 1.0) {
        return Err(ConfigGuardRailError::FillFractionOutOfRange(fill));
    }

    if !(1..=100).contains(&config.pictures.jpeg_quality) {
        return Err(ConfigGuardRailError::JpegQualityOutOfRange(
            config.pictures.jpeg_quality,
        ));
    }

    let (dw, dh) = config.motion.detection_resolution;
    if dw == 0 || dh == 0 {
        return Err(ConfigGuardRailError::EmptyDetectionResolution(dw, dh));
    }

    // Muxing happens on the central server; anything but the raw elementary
    // stream is a misdeployment.
    if config.video.output_format != "h264" {
        return Err(ConfigGuardRailError::UnsupportedVideoFormat(
            config.video.output_format.clone(),
        ));
    }

    let mut warnings = ConfigWarnings::default();
    if config.motion.threshold > 200 {
        warnings.push(format!(
            "motion threshold {} is near the top of the scale; almost no pixel change will register",
            config.motion.threshold
        ));
    }
    if config.motion.sensitivity == 0 {
        warnings.push("motion sensitivity 0 triggers on any single changed pixel");
    }
    if config.motion.cooldown_s > 600.0 {
        warnings.push(format!(
            "motion cooldown {}s will suppress events for over ten minutes",
            config.motion.cooldown_s
        ));
    }
    if config.buffer.max_chunks < 100 {
        warnings.push(format!(
            "buffer capacity {} chunks gives a very short pre-motion window",
            config.buffer.max_chunks
        ));
    }
    if config.log.batch_interval_s < 1.0 {
        warnings.push("sub-second log batching defeats the point of batching");
    }
    if config.transfer.check_interval_s > 5.0 {
        warnings.push(format!(
            "transfer check interval {}s adds noticeable latency to artifact publication",
            config.transfer.check_interval_s
        ));
    }

    Ok(warnings)
}
