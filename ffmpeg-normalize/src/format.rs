//! Decoder output format tracking.

use std::fmt::{Display, Formatter};

use ffmpeg_next::format::Pixel;

use crate::frame::RawVideoFrame;

/// The `(width, height, pixel format)` triple a decoder is emitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: Pixel,
}

impl FormatDescriptor {
    /// Nothing observed yet. Differs from every real frame.
    pub const UNSET: Self = Self {
        width: 0,
        height: 0,
        format: Pixel::None,
    };

    pub fn new(width: u32, height: u32, format: Pixel) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    pub fn is_set(&self) -> bool {
        self.width > 0 && self.height > 0 && self.format != Pixel::None
    }
}

impl Default for FormatDescriptor {
    fn default() -> Self {
        Self::UNSET
    }
}

impl Display for FormatDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} {:?}", self.width, self.height, self.format)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatChange {
    Unchanged,
    Changed(FormatDescriptor),
}

/// Compares the frame's triple against the last one seen. Any differing
/// field is a change.
pub fn check(frame: &RawVideoFrame, last: &FormatDescriptor) -> FormatChange {
    let current = frame.descriptor();
    if current.width != last.width
        || current.height != last.height
        || current.format != last.format
    {
        FormatChange::Changed(current)
    } else {
        FormatChange::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_frame_always_changes() {
        let frame = RawVideoFrame::new(Pixel::YUV420P, 1280, 720);
        assert_eq!(
            check(&frame, &FormatDescriptor::UNSET),
            FormatChange::Changed(FormatDescriptor::new(1280, 720, Pixel::YUV420P))
        );
    }

    #[test]
    fn test_same_triple_is_unchanged() {
        let frame = RawVideoFrame::new(Pixel::NV12, 1280, 720);
        let last = FormatDescriptor::new(1280, 720, Pixel::NV12);
        assert_eq!(check(&frame, &last), FormatChange::Unchanged);
    }

    #[test]
    fn test_single_field_change() {
        let frame = RawVideoFrame::new(Pixel::NV12, 1280, 720);
        for last in [
            FormatDescriptor::new(640, 720, Pixel::NV12),
            FormatDescriptor::new(1280, 360, Pixel::NV12),
            FormatDescriptor::new(1280, 720, Pixel::YUV420P),
        ] {
            assert_eq!(
                check(&frame, &last),
                FormatChange::Changed(frame.descriptor()),
                "last = {}",
                last
            );
        }
    }

    #[test]
    fn test_unset() {
        assert!(!FormatDescriptor::UNSET.is_set());
        assert_eq!(FormatDescriptor::default(), FormatDescriptor::UNSET);
        assert!(FormatDescriptor::new(2, 2, Pixel::NV12).is_set());
        assert_eq!(
            FormatDescriptor::new(640, 360, Pixel::NV12).to_string(),
            "640x360 NV12"
        );
    }
}
