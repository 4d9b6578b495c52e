//! Pixel-diff motion comparison.
//!
//! The decision is a two-knob threshold scheme: a pixel counts as changed
//! when its absolute difference on the comparison plane exceeds `threshold`
//! (0-255), and motion is declared when the changed-pixel count exceeds the
//! configured sensitivity.

use crate::error::Result;
use crate::frame::DetectionFrame;
use image::{Rgb, RgbImage};
use std::path::Path;
use std::time::{Duration, Instant};

/// Count pixels whose comparison-plane difference exceeds `threshold`.
///
/// Returns `None` when the frames disagree on shape; callers treat that as
/// "no motion" (the slots are mid-rotation or the producer changed modes).
pub fn changed_pixel_count(
    previous: &DetectionFrame,
    current: &DetectionFrame,
    threshold: u8,
) -> Option<u32> {
    if !previous.same_shape(current) {
        return None;
    }

    let count = previous
        .comparison_plane()
        .zip(current.comparison_plane())
        .filter(|(a, b)| a.abs_diff(*b) > threshold)
        .count();
    Some(count as u32)
}

/// Cooldown predicate: suppressed while the last trigger is closer than
/// `cooldown`. A detector that has never triggered is never in cooldown.
pub fn in_cooldown(last_detection: Option<Instant>, cooldown: Duration, now: Instant) -> bool {
    match last_detection {
        None => false,
        Some(at) => now.saturating_duration_since(at) < cooldown,
    }
}

/// Remaining cooldown, zero when not in cooldown.
pub fn cooldown_remaining(
    last_detection: Option<Instant>,
    cooldown: Duration,
    now: Instant,
) -> Duration {
    match last_detection {
        None => Duration::ZERO,
        Some(at) => cooldown.saturating_sub(now.saturating_duration_since(at)),
    }
}

/// Write a diagnostic bitmap of `current` with changed pixels painted green.
/// Debug-mode only; shape mismatches write nothing.
pub fn write_debug_overlay(
    previous: &DetectionFrame,
    current: &DetectionFrame,
    threshold: u8,
    dest: &Path,
) -> Result<()> {
    if !previous.same_shape(current) {
        return Ok(());
    }

    let (width, height) = (current.width(), current.height());
    let mut overlay = RgbImage::new(width, height);
    let pixels = previous
        .comparison_plane()
        .zip(current.comparison_plane())
        .zip(current.plane(0).zip(current.plane(1).zip(current.plane(2))));

    for (index, ((prev, cur), (r, (g, b)))) in pixels.enumerate() {
        let x = index as u32 % width;
        let y = index as u32 / width;
        let pixel = if prev.abs_diff(cur) > threshold {
            Rgb([r, 255, b])
        } else if current.channels() >= 3 {
            Rgb([r, g, b])
        } else {
            Rgb([cur, cur, cur])
        };
        overlay.put_pixel(x, y, pixel);
    }

    overlay.save(dest)?;
    Ok(())
}
