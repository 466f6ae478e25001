use std::collections::VecDeque;

use anyhow::Context as _;
use ffmpeg_next::{
    format::Pixel,
    software::scaling::{self, flag::Flags},
};

use crate::{
    format::FormatDescriptor,
    frame::RawVideoFrame,
    normalizer::{ConversionGraph, GraphFactory},
    status::AvStatus,
};

/// Pixel format conversion through a libswscale context. Dimensions are kept,
/// so this only ever changes the pixel layout.
pub struct SwsGraph {
    context: scaling::Context,
    input: FormatDescriptor,
    output: Pixel,
    converted: VecDeque<RawVideoFrame>,
    flushed: bool,
}

unsafe impl Send for SwsGraph {}

impl SwsGraph {
    pub fn new(input: &FormatDescriptor, output: Pixel, flags: Flags) -> anyhow::Result<Self> {
        if !input.is_set() {
            anyhow::bail!("cannot build a scaling context for {}", input);
        }
        let context = scaling::Context::get(
            input.format,
            input.width,
            input.height,
            output,
            input.width,
            input.height,
            flags,
        )
        .with_context(|| format!("create scaling context {} -> {:?}", input, output))?;

        Ok(Self {
            context,
            input: *input,
            output,
            converted: VecDeque::new(),
            flushed: false,
        })
    }

    pub fn run(
        &mut self,
        frame: &ffmpeg_next::frame::Video,
        dst: &mut ffmpeg_next::frame::Video,
    ) -> anyhow::Result<()> {
        self.context.run(frame, dst).map_err(|e| e.into())
    }
}

impl ConversionGraph for SwsGraph {
    fn input(&self) -> &FormatDescriptor {
        &self.input
    }

    fn push(&mut self, frame: RawVideoFrame) -> anyhow::Result<AvStatus<()>> {
        if self.flushed {
            return Ok(AvStatus::Eof);
        }
        let mut converted = ffmpeg_next::frame::Video::empty();
        self.run(frame.as_video(), &mut converted)
            .context("convert frame")?;
        // Copy over PTS from old frame.
        converted.set_pts(frame.pts());
        self.converted.push_back(RawVideoFrame::from(converted));
        Ok(AvStatus::Ready(()))
    }

    fn pull(&mut self) -> anyhow::Result<AvStatus<RawVideoFrame>> {
        Ok(match self.converted.pop_front() {
            Some(frame) => AvStatus::Ready(frame),
            None if self.flushed => AvStatus::Eof,
            None => AvStatus::Again,
        })
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.flushed = true;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SwsGraphFactory {
    pub flags: Flags,
}

impl Default for SwsGraphFactory {
    fn default() -> Self {
        Self {
            flags: Flags::BILINEAR,
        }
    }
}

impl GraphFactory for SwsGraphFactory {
    type Graph = SwsGraph;

    fn build(&self, input: &FormatDescriptor, output: Pixel) -> anyhow::Result<SwsGraph> {
        SwsGraph::new(input, output, self.flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nv12_to_yuv420p() {
        let input = FormatDescriptor::new(64, 48, Pixel::NV12);
        let mut graph = SwsGraphFactory::default()
            .build(&input, Pixel::YUV420P)
            .unwrap();
        assert!(matches!(graph.pull().unwrap(), AvStatus::Again));

        let mut frame = RawVideoFrame::new(Pixel::NV12, 64, 48);
        frame.set_pts(Some(7));
        assert!(graph.push(frame).unwrap().is_ready());

        let out = graph.pull().unwrap().ready().expect("converted frame");
        assert_eq!(out.descriptor(), FormatDescriptor::new(64, 48, Pixel::YUV420P));
        assert_eq!(out.pts(), Some(7));

        graph.flush().unwrap();
        assert!(matches!(graph.pull().unwrap(), AvStatus::Eof));
        let late = RawVideoFrame::new(Pixel::NV12, 64, 48);
        assert!(matches!(graph.push(late).unwrap(), AvStatus::Eof));
    }

    #[test]
    fn test_mismatched_input_is_fatal() {
        let input = FormatDescriptor::new(64, 48, Pixel::NV12);
        let mut graph = SwsGraphFactory::default()
            .build(&input, Pixel::YUV420P)
            .unwrap();
        let frame = RawVideoFrame::new(Pixel::NV12, 32, 32);
        assert!(graph.push(frame).is_err());
    }
}
