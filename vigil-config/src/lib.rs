//! Shared configuration library for the Vigil edge agent.
//!
//! One validated snapshot is constructed at startup from environment
//! variables (with a `.env` file honored when present) and passed by
//! reference to every component. Guard-rail violations abort startup;
//! suspicious-but-legal values surface as warnings the agent logs and
//! carries on with.

pub mod model;
pub mod validation;

pub use model::{
    BufferConfig, CameraIdentity, Config, LogConfig, LogDestination, MotionConfig, PathsConfig,
    PictureConfig, ServerConfig, SystemConfig, TransferConfig, VideoConfig,
};
pub use validation::{COOLDOWN_FLOOR_SECS, ConfigGuardRailError, ConfigWarning, ConfigWarnings};
