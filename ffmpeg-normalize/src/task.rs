use std::pin::Pin;

use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::{
    decoder::FrameDecoder,
    frame::{RawFrameCmd, RawFrameReceiver, RawFrameSender, RawVideoFrame},
    input::PacketSource,
    normalizer::GraphFactory,
    pipeline::{Pipeline, PipelineStats},
};

pub type RawVideoFrameStream = Pin<Box<dyn Stream<Item = RawVideoFrame> + Send>>;

/// Runs a [`Pipeline`] on the blocking pool and fans its output out over a
/// broadcast channel. Subscribe before calling [`PipelineTask::start`], frames
/// sent earlier are not replayed.
pub struct PipelineTask {
    cancel: CancellationToken,
    raw_chan: RawFrameSender,
}

impl PipelineTask {
    pub fn new() -> Self {
        let cancel = CancellationToken::new();
        let (sender, _) = tokio::sync::broadcast::channel(64);

        Self {
            cancel,
            raw_chan: sender,
        }
    }

    pub fn subscribe(&self) -> RawFrameReceiver {
        self.raw_chan.subscribe()
    }

    /// Normalized frames until the pipeline terminates.
    pub fn frames(&self) -> RawVideoFrameStream {
        let stream = BroadcastStream::new(self.subscribe())
            .take_while(|cmd| futures::future::ready(!matches!(cmd, Ok(RawFrameCmd::EOF))))
            .filter_map(|cmd| async move {
                match cmd {
                    Ok(RawFrameCmd::Data(frame)) => Some(frame),
                    Ok(RawFrameCmd::EOF) => None,
                    Err(e) => {
                        log::warn!("frame subscriber lagging: {}", e);
                        None
                    }
                }
            });
        Box::pin(stream)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Asks the pipeline to drain and stop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn start<S, D, F>(
        &self,
        pipeline: Pipeline<S, D, F>,
    ) -> JoinHandle<anyhow::Result<PipelineStats>>
    where
        S: PacketSource + Send + 'static,
        D: FrameDecoder + Send + 'static,
        F: GraphFactory + Send + 'static,
        F::Graph: Send,
    {
        let mut pipeline = pipeline.with_cancel(self.cancel.clone());
        let mut sender = self.raw_chan.clone();
        tokio::task::spawn_blocking(move || {
            let result = pipeline.run(&mut sender);
            if let Err(e) = &result {
                log::error!("pipeline error: {:#}", e);
            }
            let _ = sender.send(RawFrameCmd::EOF);
            result
        })
    }
}

impl Default for PipelineTask {
    fn default() -> Self {
        Self::new()
    }
}
