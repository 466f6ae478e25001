//! Scripted stand-ins for the packet source, decoder and conversion graph.
//! Every mock writes to a shared event log so tests can assert call order and
//! release counts.

use std::collections::VecDeque;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use ffmpeg_next::{Rational, format::Pixel};

use crate::{
    decoder::FrameDecoder,
    format::FormatDescriptor,
    frame::RawVideoFrame,
    input::PacketSource,
    normalizer::{ConversionGraph, GraphFactory},
    packet::RawPacket,
    status::AvStatus,
};

#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == event).count()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == event)
    }
}

pub fn packet(pts: i64) -> RawPacket {
    let mut inner = ffmpeg_next::codec::packet::Packet::copy(&[0, 0, 0, 1, 0x65]);
    inner.set_pts(Some(pts));
    RawPacket::from((inner, Rational::new(1, 90_000)))
}

pub struct MockSource {
    remaining: usize,
    read: i64,
    events: Events,
}

impl MockSource {
    pub fn new(packets: usize, events: &Events) -> Self {
        Self {
            remaining: packets,
            read: 0,
            events: events.clone(),
        }
    }
}

impl PacketSource for MockSource {
    fn next_packet(&mut self) -> anyhow::Result<Option<RawPacket>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        self.read += 1;
        Ok(Some(packet(self.read)))
    }
}

impl Drop for MockSource {
    fn drop(&mut self) {
        self.events.push("release source");
    }
}

/// One scripted `retrieve` outcome.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Frame(u32, u32, Pixel),
    /// A frame with no picture attached.
    Empty,
    Again,
    Eof,
    Fail,
}

pub struct MockDecoder {
    script: VecDeque<Step>,
    held: VecDeque<Step>,
    busy_submits: usize,
    busy_flushes: usize,
    flushed: bool,
    events: Events,
}

impl MockDecoder {
    pub fn new(script: impl IntoIterator<Item = Step>, events: &Events) -> Self {
        Self {
            script: script.into_iter().collect(),
            held: VecDeque::new(),
            busy_submits: 0,
            busy_flushes: 0,
            flushed: false,
            events: events.clone(),
        }
    }

    /// The first `count` submits report "decoder busy".
    pub fn busy_for(mut self, count: usize) -> Self {
        self.busy_submits = count;
        self
    }

    /// The first `count` end-of-stream markers report "decoder busy".
    pub fn busy_flush_for(mut self, count: usize) -> Self {
        self.busy_flushes = count;
        self
    }

    /// Frames only handed out once the end-of-stream marker is accepted.
    pub fn hold_until_flush(mut self, held: impl IntoIterator<Item = Step>) -> Self {
        self.held = held.into_iter().collect();
        self
    }
}

impl FrameDecoder for MockDecoder {
    fn submit(&mut self, packet: Option<&RawPacket>) -> anyhow::Result<AvStatus<()>> {
        match packet {
            Some(packet) => {
                if self.busy_submits > 0 {
                    self.busy_submits -= 1;
                    self.events.push(format!("busy {}", packet.pts().unwrap_or(-1)));
                    return Ok(AvStatus::Again);
                }
                self.events.push(format!("submit {}", packet.pts().unwrap_or(-1)));
            }
            None => {
                if self.busy_flushes > 0 {
                    self.busy_flushes -= 1;
                    self.events.push("busy flush");
                    return Ok(AvStatus::Again);
                }
                self.flushed = true;
                self.events.push("flush decoder");
            }
        }
        Ok(AvStatus::Ready(()))
    }

    fn retrieve(&mut self) -> anyhow::Result<AvStatus<RawVideoFrame>> {
        let step = match self.script.pop_front() {
            Some(step) => step,
            None if self.flushed => self.held.pop_front().unwrap_or(Step::Eof),
            None => Step::Again,
        };
        match step {
            Step::Frame(width, height, format) => Ok(AvStatus::Ready(RawVideoFrame::new(
                format, width, height,
            ))),
            Step::Empty => Ok(AvStatus::Ready(RawVideoFrame::from(
                ffmpeg_next::frame::Video::empty(),
            ))),
            Step::Again => Ok(AvStatus::Again),
            Step::Eof => Ok(AvStatus::Eof),
            Step::Fail => Err(anyhow::anyhow!("receive frame: mock decoder failure")),
        }
    }
}

impl Drop for MockDecoder {
    fn drop(&mut self) {
        self.events.push("release decoder");
    }
}

pub struct MockGraph {
    id: usize,
    input: FormatDescriptor,
    output: Pixel,
    queue: VecDeque<RawVideoFrame>,
    stall: bool,
    flushed: bool,
    events: Events,
}

impl ConversionGraph for MockGraph {
    fn input(&self) -> &FormatDescriptor {
        &self.input
    }

    fn push(&mut self, frame: RawVideoFrame) -> anyhow::Result<AvStatus<()>> {
        self.events.push(format!("push graph {}", self.id));
        let mut converted = RawVideoFrame::new(self.output, frame.width(), frame.height());
        converted.set_pts(frame.pts());
        self.queue.push_back(converted);
        Ok(AvStatus::Ready(()))
    }

    fn pull(&mut self) -> anyhow::Result<AvStatus<RawVideoFrame>> {
        if self.stall && !self.flushed {
            return Ok(AvStatus::Again);
        }
        Ok(match self.queue.pop_front() {
            Some(frame) => AvStatus::Ready(frame),
            None if self.flushed => AvStatus::Eof,
            None => AvStatus::Again,
        })
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.events.push(format!("flush graph {}", self.id));
        self.flushed = true;
        Ok(())
    }
}

impl Drop for MockGraph {
    fn drop(&mut self) {
        self.events.push(format!("release graph {}", self.id));
    }
}

pub struct MockGraphFactory {
    built: AtomicUsize,
    fail: Arc<AtomicBool>,
    stall: Arc<AtomicBool>,
    events: Events,
}

impl MockGraphFactory {
    pub fn new(events: &Events) -> Self {
        Self {
            built: AtomicUsize::new(0),
            fail: Arc::new(AtomicBool::new(false)),
            stall: Arc::new(AtomicBool::new(false)),
            events: events.clone(),
        }
    }

    /// While set, `build` fails.
    pub fn fail_switch(&self) -> Arc<AtomicBool> {
        self.fail.clone()
    }

    /// While set, newly built graphs hold every frame until flushed.
    pub fn stall_switch(&self) -> Arc<AtomicBool> {
        self.stall.clone()
    }
}

impl GraphFactory for MockGraphFactory {
    type Graph = MockGraph;

    fn build(&self, input: &FormatDescriptor, output: Pixel) -> anyhow::Result<MockGraph> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("mock graph construction failure");
        }
        let id = self.built.fetch_add(1, Ordering::SeqCst) + 1;
        self.events.push(format!("build graph {}", id));
        Ok(MockGraph {
            id,
            input: *input,
            output,
            queue: VecDeque::new(),
            stall: self.stall.load(Ordering::SeqCst),
            flushed: false,
            events: self.events.clone(),
        })
    }
}
