//! # Vigil Core
//!
//! Core library for the Vigil edge agent: the in-memory H.264 chunk buffer,
//! the pixel-diff motion detection primitives, the artifact/filename model
//! shared by the event processor and the transfer manager, and the typed
//! client for the central server's REST API.
//!
//! ## Architecture
//!
//! The agent is a pipeline of four long-running activities joined by two
//! hand-off points, both defined here:
//!
//! - [`buffer::ChunkBuffer`] — bounded ring of encoded chunks plus the two
//!   most recent downscaled detection frames
//! - [`signal::MotionSignal`] — single-slot rendezvous carrying a
//!   server-assigned event handle from the detector to the processor
//! - [`artifacts`] — the filename grammar that binds a staged artifact to its
//!   server event id (the only persisted binding on the device)
//! - [`api::ApiClient`] — the five central-server operations with their
//!   per-operation retry policies

/// Error types and handling
pub mod error;

/// Artifact kinds, the filename grammar, and the sentinel protocol types
pub mod artifacts;

/// Downscaled detection frames
pub mod frame;

/// Pixel-diff motion comparison and the cooldown predicate
pub mod detect;

/// Bounded chunk ring + latest-two detection frames
pub mod buffer;

/// Single-slot motion event rendezvous
pub mod signal;

/// Swappable capture collaborators (stills, thumbnails)
pub mod capture;

/// Central-server REST client
pub mod api;

pub use artifacts::{ArtifactKind, ParsedArtifact, PendingFile, SENTINEL_SUFFIX};
pub use buffer::{BufferSettings, ChunkBuffer, DetectorControl};
pub use capture::{ImageThumbnailer, StillCapture, Thumbnailer};
pub use error::{AgentError, Result};
pub use frame::DetectionFrame;
pub use signal::{MotionEventHandle, MotionSignal};
