//! # Vigil Agent
//!
//! The running edge agent: wires the camera pump, motion detector, event
//! processor, transfer manager, and log batcher around the shared state from
//! `vigil-core`, under one orchestrated lifecycle.
//!
//! The binary entry point lives in `main.rs`; everything here is a library
//! so the activity loops can be exercised by integration tests.

/// Orchestrator: init -> register -> start -> supervise -> shutdown
pub mod agent;

/// Camera child-process driver and decoded-frame store
pub mod camera;

/// Motion detection loop
pub mod detector;

/// Timed artifact sequence
pub mod processor;

/// Log batching and shipment
pub mod shipper;

/// Pending-directory drain to network storage
pub mod transfer;
