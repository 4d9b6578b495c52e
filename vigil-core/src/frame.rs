//! Detection frames: small decoded images used only for pixel-diff motion
//! comparison. The buffer keeps the two most recent; everything else about a
//! frame dies with the slot rotation.

/// A downscaled decoded frame in a packed layout: `channels` interleaved
/// bytes per pixel, row-major, no padding. Single-channel frames are luma
/// planes; three-channel frames are RGB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionFrame {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
}

impl DetectionFrame {
    /// Build a frame, validating that the buffer matches the declared shape.
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Option<Self> {
        let expected = width as usize * height as usize * channels as usize;
        if channels == 0 || data.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Single-channel (luma) frame.
    pub fn luma(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        Self::new(width, height, 1, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn same_shape(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.channels == other.channels
    }

    /// Iterate one channel plane in pixel order.
    ///
    /// For multi-channel frames the comparison plane is green (index 1, the
    /// highest-quality channel out of a Bayer sensor); single-channel frames
    /// are their own plane.
    pub fn plane(&self, channel: usize) -> impl Iterator<Item = u8> + '_ {
        let step = self.channels as usize;
        self.data.iter().skip(channel.min(step - 1)).step_by(step).copied()
    }

    /// Comparison plane per the green-channel rule.
    pub fn comparison_plane(&self) -> impl Iterator<Item = u8> + '_ {
        let channel = if self.channels >= 3 { 1 } else { 0 };
        self.plane(channel)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_validation() {
        assert!(DetectionFrame::new(2, 2, 3, vec![0; 12]).is_some());
        assert!(DetectionFrame::new(2, 2, 3, vec![0; 11]).is_none());
        assert!(DetectionFrame::new(2, 2, 0, vec![]).is_none());
        assert!(DetectionFrame::luma(4, 2, vec![0; 8]).is_some());
    }

    #[test]
    fn comparison_plane_picks_green_for_rgb() {
        // Two RGB pixels: green bytes are 20 and 50.
        let frame = DetectionFrame::new(2, 1, 3, vec![10, 20, 30, 40, 50, 60]).unwrap();
        assert_eq!(frame.comparison_plane().collect::<Vec<_>>(), vec![20, 50]);
    }

    #[test]
    fn comparison_plane_is_identity_for_luma() {
        let frame = DetectionFrame::luma(3, 1, vec![1, 2, 3]).unwrap();
        assert_eq!(frame.comparison_plane().collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
