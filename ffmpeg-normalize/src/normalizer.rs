//! Lifecycle of the conversion graph that turns decoder output into the
//! canonical pixel format.
//!
//! A [`GraphManager`] holds at most one live graph. Rebuilding constructs the
//! replacement first and only then releases the old graph, so a failed
//! rebuild leaves the previous one usable.

use std::str::FromStr;

use anyhow::Context as _;
use ffmpeg_next::format::Pixel;

use crate::{format::FormatDescriptor, frame::RawVideoFrame, status::AvStatus};

/// A built two-endpoint graph: frames of one fixed input format go in, frames
/// of the output format come out.
pub trait ConversionGraph {
    /// Input format the graph was built for.
    fn input(&self) -> &FormatDescriptor;

    /// Moves a frame into the input endpoint.
    fn push(&mut self, frame: RawVideoFrame) -> anyhow::Result<AvStatus<()>>;

    /// Takes one converted frame from the output endpoint.
    fn pull(&mut self) -> anyhow::Result<AvStatus<RawVideoFrame>>;

    /// Marks the end of input. Later pulls drain what is queued, then `Eof`.
    fn flush(&mut self) -> anyhow::Result<()>;
}

pub trait GraphFactory {
    type Graph: ConversionGraph;

    /// Builds a fully linked graph or nothing at all.
    fn build(&self, input: &FormatDescriptor, output: Pixel) -> anyhow::Result<Self::Graph>;
}

/// Which conversion engine backs the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormalizeBackend {
    /// libavfilter `buffer -> buffersink`.
    #[default]
    Filter,
    /// libswscale context.
    Scale,
}

impl FromStr for NormalizeBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filter" | "avfilter" => Ok(NormalizeBackend::Filter),
            "scale" | "swscale" => Ok(NormalizeBackend::Scale),
            other => Err(anyhow::anyhow!("unknown normalize backend: {}", other)),
        }
    }
}

pub struct GraphManager<F: GraphFactory> {
    factory: F,
    canonical: Pixel,
    graph: Option<F::Graph>,
    rebuilds: u64,
}

impl<F: GraphFactory> GraphManager<F> {
    pub fn new(factory: F, canonical: Pixel) -> Self {
        Self {
            factory,
            canonical,
            graph: None,
            rebuilds: 0,
        }
    }

    pub fn canonical(&self) -> Pixel {
        self.canonical
    }

    pub fn is_built(&self) -> bool {
        self.graph.is_some()
    }

    /// Input format of the live graph, if any.
    pub fn current(&self) -> Option<&FormatDescriptor> {
        self.graph.as_ref().map(|graph| graph.input())
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Replaces the live graph with one built for `format`.
    pub fn rebuild(&mut self, format: &FormatDescriptor) -> anyhow::Result<()> {
        let graph = self
            .factory
            .build(format, self.canonical)
            .with_context(|| format!("build conversion graph for {}", format))?;
        if let Some(previous) = self.graph.replace(graph) {
            log::debug!("releasing conversion graph for {}", previous.input());
        }
        self.rebuilds += 1;
        log::info!(
            "conversion graph #{} built: {} -> {:?}",
            self.rebuilds,
            format,
            self.canonical
        );
        Ok(())
    }

    /// Converts one frame. Callers skip this for frames already in the
    /// canonical format.
    pub fn normalize(&mut self, frame: RawVideoFrame) -> anyhow::Result<AvStatus<RawVideoFrame>> {
        let graph = self
            .graph
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("normalize called before a graph was built"))?;
        let descriptor = frame.descriptor();
        if descriptor != *graph.input() {
            anyhow::bail!(
                "frame {} does not match conversion graph input {}",
                descriptor,
                graph.input()
            );
        }

        match graph.push(frame)? {
            AvStatus::Ready(()) => {}
            AvStatus::Again => return Ok(AvStatus::Again),
            AvStatus::Eof => return Ok(AvStatus::Eof),
        }
        graph.pull()
    }

    /// Flushes the live graph and returns every frame still queued in it.
    pub fn drain(&mut self) -> anyhow::Result<Vec<RawVideoFrame>> {
        let mut frames = Vec::new();
        let Some(graph) = self.graph.as_mut() else {
            return Ok(frames);
        };
        graph.flush()?;
        while let AvStatus::Ready(frame) = graph.pull()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    pub fn release(&mut self) {
        if let Some(graph) = self.graph.take() {
            log::debug!("conversion graph for {} released", graph.input());
        }
    }
}
