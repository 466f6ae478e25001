use std::fmt::{Debug, Formatter};

use bytes::Bytes;
use ffmpeg_next::format::Pixel;

use crate::format::FormatDescriptor;

pub type RawFrameSender = tokio::sync::broadcast::Sender<RawFrameCmd>;
pub type RawFrameReceiver = tokio::sync::broadcast::Receiver<RawFrameCmd>;

#[derive(Clone)]
pub enum RawFrameCmd {
    Data(RawVideoFrame),
    EOF,
}

/// A decoded picture. Moved by value from stage to stage, so whoever holds
/// it is the only reader or writer.
#[derive(Clone)]
pub struct RawVideoFrame {
    frame: ffmpeg_next::frame::Video,
}

impl From<ffmpeg_next::frame::Video> for RawVideoFrame {
    fn from(frame: ffmpeg_next::frame::Video) -> Self {
        Self { frame }
    }
}

impl RawVideoFrame {
    /// Allocates a frame with picture buffers for `format` at `width`x`height`.
    pub fn new(format: Pixel, width: u32, height: u32) -> Self {
        Self::from(ffmpeg_next::frame::Video::new(format, width, height))
    }

    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    pub fn format(&self) -> Pixel {
        self.frame.format()
    }

    pub fn descriptor(&self) -> FormatDescriptor {
        FormatDescriptor::new(self.width(), self.height(), self.format())
    }

    pub fn pts(&self) -> Option<i64> {
        self.frame.pts()
    }

    pub fn set_pts(&mut self, pts: Option<i64>) {
        self.frame.set_pts(pts);
    }

    /// False when the decoder handed back a frame without any picture
    /// attached (first plane pointer is null).
    pub fn has_data(&self) -> bool {
        unsafe { !(*self.frame.as_ptr()).data[0].is_null() }
    }

    pub fn planes(&self) -> usize {
        if self.has_data() {
            self.frame.planes()
        } else {
            0
        }
    }

    pub fn stride(&self, plane: usize) -> usize {
        if plane >= self.planes() {
            return 0;
        }
        self.frame.stride(plane)
    }

    /// Copy of one plane's bytes; empty for a plane the format does not have.
    pub fn plane(&self, index: usize) -> Bytes {
        if index >= self.planes() {
            return Bytes::new();
        }
        Bytes::copy_from_slice(self.frame.data(index))
    }

    pub fn as_video(&self) -> &ffmpeg_next::frame::Video {
        &self.frame
    }
}

impl Debug for RawVideoFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawVideoFrame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("format", &self.format())
            .field("pts", &self.pts())
            .field("has_data", &self.has_data())
            .finish()
    }
}
