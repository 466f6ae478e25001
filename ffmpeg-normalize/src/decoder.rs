use anyhow::Context as _;
use ffmpeg_next::Rational;

use crate::{
    frame::RawVideoFrame,
    hw::{DEFAULT_HW_DECODER, is_hw_decoder_name, select_decoder},
    packet::RawPacket,
    status::{AvStatus, classify},
    stream::AvStream,
};

/// Send/receive side of a video decoder.
///
/// Both calls are non-blocking: `Again` means "nothing this time", `Eof`
/// means the decoder is drained. Only real failures are `Err`.
pub trait FrameDecoder {
    /// Sends one access unit, or the end-of-stream marker for `None`.
    fn submit(&mut self, packet: Option<&RawPacket>) -> anyhow::Result<AvStatus<()>>;

    /// Pulls at most one decoded frame.
    fn retrieve(&mut self) -> anyhow::Result<AvStatus<RawVideoFrame>>;
}

#[derive(Debug, Clone)]
pub struct DecoderSettings {
    /// Decoder requested by name before falling back to the stream's codec.
    pub decoder_name: Option<String>,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            decoder_name: Some(DEFAULT_HW_DECODER.to_string()),
        }
    }
}

pub struct Decoder {
    inner: ffmpeg_next::codec::decoder::Video,
    decoder_time_base: Rational,
    codec_name: String,
}

impl Decoder {
    pub fn open(stream: &AvStream, settings: &DecoderSettings) -> anyhow::Result<Self> {
        if !stream.is_video() {
            anyhow::bail!("stream {} is not a video stream", stream.index());
        }

        let codec_id = stream.codec_id();
        let codec = select_decoder(settings.decoder_name.as_deref(), codec_id)?;
        let (inner, codec_name) = match Self::open_with(stream, codec) {
            Ok(decoder) => (decoder, codec.name().to_string()),
            Err(e) if is_hw_decoder_name(codec.name()) => {
                let sw_codec = ffmpeg_next::decoder::find(codec_id)
                    .ok_or(anyhow::anyhow!("no software decoder for {:?}", codec_id))?;
                log::warn!(
                    "hardware decoder {} failed to open: {:#}, falling back to {}",
                    codec.name(),
                    e,
                    sw_codec.name()
                );
                let decoder = Self::open_with(stream, sw_codec)?;
                (decoder, sw_codec.name().to_string())
            }
            Err(e) => return Err(e),
        };

        let decoder_time_base = inner.time_base();
        log::info!(
            "decoder {} opened for stream #{} ({:?})",
            codec_name,
            stream.index(),
            codec_id
        );

        Ok(Self {
            inner,
            decoder_time_base,
            codec_name,
        })
    }

    fn open_with(
        stream: &AvStream,
        codec: ffmpeg_next::Codec,
    ) -> anyhow::Result<ffmpeg_next::codec::decoder::Video> {
        let mut decoder_ctx = ffmpeg_next::codec::Context::new_with_codec(codec);
        unsafe {
            (*decoder_ctx.as_mut_ptr()).time_base = stream.time_base().into();
        }
        decoder_ctx.set_parameters(stream.parameters().clone())?;
        let decoder = decoder_ctx
            .decoder()
            .open_as(codec)
            .with_context(|| format!("open decoder {}", codec.name()))?
            .video()?;
        Ok(decoder)
    }

    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }
}

impl FrameDecoder for Decoder {
    fn submit(&mut self, packet: Option<&RawPacket>) -> anyhow::Result<AvStatus<()>> {
        let result = match packet {
            Some(packet) => {
                let mut inner = packet.packet().clone();
                inner.rescale_ts(packet.time_base(), self.decoder_time_base);
                self.inner.send_packet(&inner)
            }
            None => self.inner.send_eof(),
        };
        classify(result).context("send packet")
    }

    fn retrieve(&mut self) -> anyhow::Result<AvStatus<RawVideoFrame>> {
        let mut frame = ffmpeg_next::frame::Video::empty();
        let status = classify(self.inner.receive_frame(&mut frame)).context("receive frame")?;
        Ok(status.map(|()| RawVideoFrame::from(frame)))
    }
}
