//! libavfilter backed conversion graph: `buffer` -> `buffersink`.
//!
//! The sink only accepts the canonical pixel format, so libavfilter inserts
//! the scale/convert step itself when the graph is configured.

use std::ffi::c_int;

use anyhow::Context as _;
use ffmpeg_next::{Rational, filter, format::Pixel};

use crate::{
    format::FormatDescriptor,
    frame::RawVideoFrame,
    normalizer::{ConversionGraph, GraphFactory},
    status::{AvStatus, classify},
};

/// Nominal time base handed to the buffer source.
pub const NOMINAL_TIME_BASE: Rational = Rational(1, 1_200_000);

const SOURCE_NAME: &str = "in";
const SINK_NAME: &str = "out";

pub struct FilterGraph {
    graph: filter::Graph,
    input: FormatDescriptor,
    output: Pixel,
}

unsafe impl Send for FilterGraph {}

impl FilterGraph {
    /// Builds and configures the graph. On any failure the partially built
    /// `filter::Graph` is dropped here, which frees every filter context
    /// created so far.
    pub fn new(input: &FormatDescriptor, output: Pixel) -> anyhow::Result<Self> {
        if !input.is_set() {
            anyhow::bail!("cannot build a filter graph for {}", input);
        }

        let buffer = filter::find("buffer").ok_or(anyhow::anyhow!("filter not found: buffer"))?;
        let buffersink =
            filter::find("buffersink").ok_or(anyhow::anyhow!("filter not found: buffersink"))?;

        let mut graph = filter::Graph::new();
        graph
            .add(&buffer, SOURCE_NAME, &Self::source_args(input))
            .context("create buffer source")?;
        graph
            .add(&buffersink, SINK_NAME, "")
            .context("create buffer sink")?;

        let source = Self::context_ptr(&mut graph, SOURCE_NAME)?;
        let sink = Self::context_ptr(&mut graph, SINK_NAME)?;
        restrict_pixel_format(sink, output).context("restrict buffer sink pixel format")?;
        link(source, sink).context("link buffer -> buffersink")?;
        graph.validate().context("configure filter graph")?;

        log::debug!("filter graph configured: {} -> {:?}", input, output);
        Ok(Self {
            graph,
            input: *input,
            output,
        })
    }

    pub fn output(&self) -> Pixel {
        self.output
    }

    fn source_args(input: &FormatDescriptor) -> String {
        let pix_fmt: ffmpeg_next::ffi::AVPixelFormat = input.format.into();
        format!(
            "video_size={}x{}:pix_fmt={}:time_base={}/{}:pixel_aspect=1/1",
            input.width,
            input.height,
            pix_fmt as i32,
            NOMINAL_TIME_BASE.numerator(),
            NOMINAL_TIME_BASE.denominator()
        )
    }

    fn context_ptr(
        graph: &mut filter::Graph,
        name: &str,
    ) -> anyhow::Result<*mut ffmpeg_next::ffi::AVFilterContext> {
        let mut ctx = graph
            .get(name)
            .ok_or(anyhow::anyhow!("filter {} missing from graph", name))?;
        Ok(unsafe { ctx.as_mut_ptr() })
    }
}

/// Sets the `pix_fmts` option on a buffersink, checking the status that
/// `filter::Context::set_pixel_format` discards.
fn restrict_pixel_format(
    sink: *mut ffmpeg_next::ffi::AVFilterContext,
    format: Pixel,
) -> Result<(), ffmpeg_next::Error> {
    let pix_fmt: ffmpeg_next::ffi::AVPixelFormat = format.into();
    let ret = unsafe {
        ffmpeg_next::ffi::av_opt_set_bin(
            sink as *mut std::ffi::c_void,
            c"pix_fmts".as_ptr(),
            &pix_fmt as *const ffmpeg_next::ffi::AVPixelFormat as *const u8,
            std::mem::size_of::<ffmpeg_next::ffi::AVPixelFormat>() as c_int,
            ffmpeg_next::ffi::AV_OPT_SEARCH_CHILDREN as c_int,
        )
    };
    if ret < 0 {
        return Err(ffmpeg_next::Error::from(ret));
    }
    Ok(())
}

fn link(
    source: *mut ffmpeg_next::ffi::AVFilterContext,
    sink: *mut ffmpeg_next::ffi::AVFilterContext,
) -> Result<(), ffmpeg_next::Error> {
    let ret = unsafe { ffmpeg_next::ffi::avfilter_link(source, 0, sink, 0) };
    if ret < 0 {
        return Err(ffmpeg_next::Error::from(ret));
    }
    Ok(())
}

impl ConversionGraph for FilterGraph {
    fn input(&self) -> &FormatDescriptor {
        &self.input
    }

    fn push(&mut self, frame: RawVideoFrame) -> anyhow::Result<AvStatus<()>> {
        let mut source = self
            .graph
            .get(SOURCE_NAME)
            .ok_or(anyhow::anyhow!("filter {} missing from graph", SOURCE_NAME))?;
        classify(source.source().add(frame.as_video())).context("push frame into buffer source")
    }

    fn pull(&mut self) -> anyhow::Result<AvStatus<RawVideoFrame>> {
        let mut sink = self
            .graph
            .get(SINK_NAME)
            .ok_or(anyhow::anyhow!("filter {} missing from graph", SINK_NAME))?;
        let mut frame = ffmpeg_next::frame::Video::empty();
        let status = classify(sink.sink().frame(&mut frame)).context("pull frame from buffer sink")?;
        Ok(status.map(|()| RawVideoFrame::from(frame)))
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        let mut source = self
            .graph
            .get(SOURCE_NAME)
            .ok_or(anyhow::anyhow!("filter {} missing from graph", SOURCE_NAME))?;
        source.source().flush().context("flush buffer source")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FilterGraphFactory;

impl GraphFactory for FilterGraphFactory {
    type Graph = FilterGraph;

    fn build(&self, input: &FormatDescriptor, output: Pixel) -> anyhow::Result<FilterGraph> {
        FilterGraph::new(input, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_args() {
        let args = FilterGraph::source_args(&FormatDescriptor::new(1280, 720, Pixel::NV12));
        let nv12: ffmpeg_next::ffi::AVPixelFormat = Pixel::NV12.into();
        assert_eq!(
            args,
            format!(
                "video_size=1280x720:pix_fmt={}:time_base=1/1200000:pixel_aspect=1/1",
                nv12 as i32
            )
        );
    }

    #[test]
    fn test_unset_format_is_rejected() {
        assert!(FilterGraph::new(&FormatDescriptor::UNSET, Pixel::YUV420P).is_err());
    }

    #[test]
    fn test_nv12_to_yuv420p() {
        let input = FormatDescriptor::new(64, 48, Pixel::NV12);
        let mut graph = FilterGraphFactory.build(&input, Pixel::YUV420P).unwrap();
        assert_eq!(graph.input(), &input);
        assert_eq!(graph.output(), Pixel::YUV420P);

        let mut frame = RawVideoFrame::new(Pixel::NV12, 64, 48);
        frame.set_pts(Some(42));
        assert!(graph.push(frame).unwrap().is_ready());

        let out = graph.pull().unwrap().ready().expect("converted frame");
        assert_eq!(out.format(), Pixel::YUV420P);
        assert_eq!((out.width(), out.height()), (64, 48));
        assert_eq!(out.pts(), Some(42));
        assert_eq!(out.planes(), 3);

        assert!(matches!(graph.pull().unwrap(), AvStatus::Again));
        graph.flush().unwrap();
        assert!(matches!(graph.pull().unwrap(), AvStatus::Eof));
    }
}
