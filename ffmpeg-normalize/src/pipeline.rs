//! Decode-and-normalize loop.
//!
//! ```text
//! PacketSource ──► FrameDecoder ──► format check ──► GraphManager ──► FrameSink
//!                      ▲                  │ (rebuild on change)
//!                      └── Again / Eof ───┘
//! ```
//!
//! The pipeline is a pull-based state machine
//! (`Idle -> Running -> Draining -> Terminated`). Every native call returns
//! `Ready | Again | Eof` or a fatal error; fatal errors tear the pipeline
//! down before they are returned.

use std::fmt::{Display, Formatter};

use anyhow::Context as _;
use ffmpeg_next::format::Pixel;
use tokio_util::sync::CancellationToken;

use crate::{
    decoder::FrameDecoder,
    format::{FormatChange, FormatDescriptor, check},
    frame::{RawFrameCmd, RawFrameSender, RawVideoFrame},
    input::PacketSource,
    normalizer::{GraphFactory, GraphManager},
    packet::RawPacket,
    status::AvStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Draining,
    Terminated,
}

/// What to do when the conversion graph takes a frame but has nothing to
/// hand back yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Count the frame as dropped and move on.
    #[default]
    Drop,
    /// Leave it queued in the graph; queued frames are flushed out before a
    /// rebuild and while draining.
    Keep,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub canonical_format: Pixel,
    /// Stop after this many delivered frames.
    pub max_frames: Option<u64>,
    pub retry_policy: RetryPolicy,
    /// Consecutive `Again` polls tolerated while draining before giving up.
    pub drain_retry_limit: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            canonical_format: Pixel::YUV420P,
            max_frames: None,
            retry_policy: RetryPolicy::Drop,
            drain_retry_limit: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub packets: u64,
    pub decoded: u64,
    pub normalized: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub rebuilds: u64,
}

impl Display for PipelineStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "packets: {}, decoded: {}, normalized: {}, delivered: {}, dropped: {}, rebuilds: {}",
            self.packets,
            self.decoded,
            self.normalized,
            self.delivered,
            self.dropped,
            self.rebuilds
        )
    }
}

/// Consumer boundary. Receives each frame exactly once, always in the
/// canonical pixel format.
pub trait FrameSink {
    fn deliver(&mut self, frame: RawVideoFrame) -> anyhow::Result<()>;
}

impl<T> FrameSink for T
where
    T: FnMut(RawVideoFrame) -> anyhow::Result<()>,
{
    fn deliver(&mut self, frame: RawVideoFrame) -> anyhow::Result<()> {
        self(frame)
    }
}

impl FrameSink for RawFrameSender {
    fn deliver(&mut self, frame: RawVideoFrame) -> anyhow::Result<()> {
        // No subscribers is not an error for a broadcast.
        let _ = self.send(RawFrameCmd::Data(frame));
        Ok(())
    }
}

impl FrameSink for std::sync::mpsc::Sender<RawVideoFrame> {
    fn deliver(&mut self, frame: RawVideoFrame) -> anyhow::Result<()> {
        self.send(frame)
            .map_err(|_| anyhow::anyhow!("frame receiver dropped"))
    }
}

pub struct Pipeline<S, D, F: GraphFactory> {
    // Declared in release order: graph, decoder, source.
    graphs: GraphManager<F>,
    decoder: Option<D>,
    source: Option<S>,
    config: PipelineConfig,
    state: PipelineState,
    last_format: FormatDescriptor,
    pending: Option<RawPacket>,
    flush_sent: bool,
    idle_polls: u32,
    stats: PipelineStats,
    cancel: CancellationToken,
}

impl<S, D, F> Pipeline<S, D, F>
where
    S: PacketSource,
    D: FrameDecoder,
    F: GraphFactory,
{
    /// Takes ownership of an opened source and decoder.
    pub fn new(source: S, decoder: D, factory: F, config: PipelineConfig) -> Self {
        Self {
            graphs: GraphManager::new(factory, config.canonical_format),
            decoder: Some(decoder),
            source: Some(source),
            config,
            state: PipelineState::Idle,
            last_format: FormatDescriptor::UNSET,
            pending: None,
            flush_sent: false,
            idle_polls: 0,
            stats: PipelineStats::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn last_format(&self) -> &FormatDescriptor {
        &self.last_format
    }

    /// Runs until `Terminated`. Resources are released before this returns,
    /// on success and on error alike.
    pub fn run(&mut self, sink: &mut impl FrameSink) -> anyhow::Result<PipelineStats> {
        while self.step(sink)? != PipelineState::Terminated {}
        log::info!("pipeline finished: {}", self.stats);
        Ok(self.stats)
    }

    /// Performs one loop iteration and returns the resulting state.
    pub fn step(&mut self, sink: &mut impl FrameSink) -> anyhow::Result<PipelineState> {
        let result = match self.state {
            PipelineState::Idle => {
                log::info!("pipeline running");
                self.state = PipelineState::Running;
                Ok(())
            }
            PipelineState::Running => self.step_running(sink),
            PipelineState::Draining => self.step_draining(sink),
            PipelineState::Terminated => return Ok(PipelineState::Terminated),
        };

        if let Err(e) = result {
            self.teardown();
            return Err(e);
        }
        if self.state == PipelineState::Terminated {
            self.teardown();
        }
        Ok(self.state)
    }

    fn step_running(&mut self, sink: &mut impl FrameSink) -> anyhow::Result<()> {
        if self.cancel.is_cancelled() {
            log::info!("pipeline cancelled, draining decoder");
            self.pending = None;
            self.state = PipelineState::Draining;
            return Ok(());
        }
        if self.limit_reached() {
            self.state = PipelineState::Terminated;
            return Ok(());
        }

        let packet = match self.pending.take() {
            Some(packet) => packet,
            None => match self.source_mut()?.next_packet().context("read packet")? {
                Some(packet) => {
                    self.stats.packets += 1;
                    packet
                }
                None => {
                    log::info!("source exhausted, draining decoder");
                    self.state = PipelineState::Draining;
                    return Ok(());
                }
            },
        };

        let decoder = self.decoder_mut()?;
        let busy = matches!(decoder.submit(Some(&packet))?, AvStatus::Again);
        let status = decoder.retrieve()?;
        if busy {
            log::trace!("decoder busy, packet kept for resubmission");
            self.pending = Some(packet);
        }

        match status {
            AvStatus::Ready(frame) => self.accept(frame, sink),
            AvStatus::Again => Ok(()),
            AvStatus::Eof => {
                log::info!("decoder reported end of stream");
                self.finish_drain(sink)
            }
        }
    }

    fn step_draining(&mut self, sink: &mut impl FrameSink) -> anyhow::Result<()> {
        let flush_sent = self.flush_sent;
        let decoder = self.decoder_mut()?;
        // A busy decoder refuses the end marker until it has handed out a
        // frame; keep retrieving and resend it next step.
        let accepted = flush_sent || !matches!(decoder.submit(None)?, AvStatus::Again);
        let status = decoder.retrieve()?;
        if !accepted {
            log::trace!("decoder busy, end of stream marker kept for resubmission");
        }
        self.flush_sent = accepted;

        match status {
            AvStatus::Ready(frame) => {
                self.idle_polls = 0;
                self.accept(frame, sink)?;
                if self.state == PipelineState::Terminated {
                    return Ok(());
                }
            }
            AvStatus::Again => {
                self.idle_polls += 1;
                if self.idle_polls < self.config.drain_retry_limit {
                    return Ok(());
                }
                log::warn!(
                    "decoder still not ready after {} polls, giving up on drain",
                    self.idle_polls
                );
                self.finish_drain(sink)?;
            }
            AvStatus::Eof => self.finish_drain(sink)?,
        }
        Ok(())
    }

    fn finish_drain(&mut self, sink: &mut impl FrameSink) -> anyhow::Result<()> {
        if self.config.retry_policy == RetryPolicy::Keep {
            self.flush_graph(sink)?;
        }
        log::info!("decoder drained");
        self.state = PipelineState::Terminated;
        Ok(())
    }

    /// Runs one decoded frame through detection, optional conversion and
    /// delivery.
    fn accept(&mut self, frame: RawVideoFrame, sink: &mut impl FrameSink) -> anyhow::Result<()> {
        if !frame.has_data() {
            log::trace!("decoder returned a frame without data, skipping");
            return Ok(());
        }
        self.stats.decoded += 1;

        if let FormatChange::Changed(format) = check(&frame, &self.last_format) {
            log::info!("decoder output changed: {} -> {}", self.last_format, format);
            if self.config.retry_policy == RetryPolicy::Keep && self.graphs.is_built() {
                self.flush_graph(sink)?;
            }
            self.graphs.rebuild(&format)?;
            self.last_format = format;
            self.stats.rebuilds += 1;
        }

        let frame = if frame.format() == self.graphs.canonical() {
            frame
        } else {
            match self.graphs.normalize(frame).context("normalize frame")? {
                AvStatus::Ready(frame) => {
                    self.stats.normalized += 1;
                    frame
                }
                AvStatus::Again | AvStatus::Eof => {
                    if self.config.retry_policy == RetryPolicy::Drop {
                        self.stats.dropped += 1;
                        log::debug!("conversion produced no frame, dropped");
                    }
                    return Ok(());
                }
            }
        };

        self.deliver(frame, sink)
    }

    /// Pushes out whatever the live graph still holds. Only used with
    /// `RetryPolicy::Keep`; the graph accepts no input afterwards.
    fn flush_graph(&mut self, sink: &mut impl FrameSink) -> anyhow::Result<()> {
        for frame in self.graphs.drain().context("flush conversion graph")? {
            if self.limit_reached() {
                break;
            }
            self.stats.normalized += 1;
            self.deliver(frame, sink)?;
        }
        Ok(())
    }

    fn deliver(&mut self, frame: RawVideoFrame, sink: &mut impl FrameSink) -> anyhow::Result<()> {
        let (width, height, format, pts) =
            (frame.width(), frame.height(), frame.format(), frame.pts());
        sink.deliver(frame).context("deliver frame")?;
        self.stats.delivered += 1;
        log::debug!(
            "frame {:4} delivered: {}x{} {:?} pts={:?}",
            self.stats.delivered,
            width,
            height,
            format,
            pts
        );
        if self.limit_reached() {
            log::info!("frame limit {} reached", self.stats.delivered);
            self.state = PipelineState::Terminated;
        }
        Ok(())
    }

    fn limit_reached(&self) -> bool {
        self.config
            .max_frames
            .is_some_and(|max| self.stats.delivered >= max)
    }

    fn source_mut(&mut self) -> anyhow::Result<&mut S> {
        self.source
            .as_mut()
            .ok_or(anyhow::anyhow!("packet source already released"))
    }

    fn decoder_mut(&mut self) -> anyhow::Result<&mut D> {
        self.decoder
            .as_mut()
            .ok_or(anyhow::anyhow!("decoder already released"))
    }

    /// Releases graph, decoder and source, in that order. Idempotent.
    fn teardown(&mut self) {
        self.state = PipelineState::Terminated;
        self.pending = None;
        self.graphs.release();
        if self.decoder.take().is_some() {
            log::debug!("decoder released");
        }
        if self.source.take().is_some() {
            log::debug!("packet source released");
        }
    }
}

impl<S, D, F: GraphFactory> Drop for Pipeline<S, D, F> {
    fn drop(&mut self) {
        self.graphs.release();
        self.decoder.take();
        self.source.take();
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
