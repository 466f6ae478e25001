use std::collections::HashMap;
use std::ffi::CString;
use std::path::Path;

use anyhow::Context as _;
use ffmpeg_next::Dictionary;

use crate::{packet::RawPacket, stream::AvStream};

/// Anything that yields compressed access units in presentation order.
pub trait PacketSource {
    /// Next access unit, or `None` once the source is exhausted.
    fn next_packet(&mut self) -> anyhow::Result<Option<RawPacket>>;
}

pub struct AvInput {
    inner: ffmpeg_next::format::context::Input,
    streams: HashMap<usize, AvStream>,
}

impl AvInput {
    /// Resolve input format by name (e.g. "h264", "v4l2") via FFmpeg's av_find_input_format.
    fn find_input_format(name: &str) -> anyhow::Result<ffmpeg_next::format::format::Input> {
        let cname = CString::new(name)
            .map_err(|e| anyhow::anyhow!("invalid format name {:?}: {}", name, e))?;
        let ptr = unsafe { ffmpeg_next::ffi::av_find_input_format(cname.as_ptr()) };
        if ptr.is_null() {
            return Err(anyhow::anyhow!("input format not found: {}", name));
        }
        Ok(unsafe { ffmpeg_next::format::format::Input::wrap(ptr as *mut _) })
    }

    pub fn new(
        url: &str,
        format: Option<&str>,
        options: Option<Dictionary>,
    ) -> anyhow::Result<Self> {
        use ffmpeg_next::format::format::Format;

        let path = Path::new(url);
        let input = match (format, options) {
            (Some(fmt_name), opts) => {
                let fmt = Self::find_input_format(fmt_name)?;
                let ctx = ffmpeg_next::format::open_with(
                    path,
                    &Format::Input(fmt),
                    opts.unwrap_or_default(),
                )?;
                ctx.input()
            }
            (None, Some(opts)) => ffmpeg_next::format::input_with_dictionary(path, opts)?,
            (None, None) => ffmpeg_next::format::input(path)?,
        };

        let mut streams = HashMap::new();
        for stream in input.streams() {
            streams.insert(stream.index(), AvStream::from(stream));
        }

        Ok(Self {
            inner: input,
            streams,
        })
    }

    pub fn best_video_stream(&self) -> Option<AvStream> {
        self.inner
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .and_then(|stream| self.streams.get(&stream.index()).cloned())
    }

    pub fn read_packet(&mut self) -> Option<RawPacket> {
        self.inner
            .packets()
            .next()
            .map(|(stream, packet)| (packet, stream.time_base()).into())
    }
}

/// An input narrowed down to its best video stream.
pub struct VideoInput {
    input: AvInput,
    stream: AvStream,
}

impl VideoInput {
    pub fn open(
        url: &str,
        format: Option<&str>,
        options: Option<Dictionary>,
    ) -> anyhow::Result<Self> {
        let input =
            AvInput::new(url, format, options).with_context(|| format!("open input {}", url))?;
        let stream = input
            .best_video_stream()
            .ok_or_else(|| anyhow::anyhow!("no video stream in {}", url))?;
        log::info!(
            "opened input {}: video stream #{} {:?} {}x{} @ {:.2} fps",
            url,
            stream.index(),
            stream.codec_id(),
            stream.width(),
            stream.height(),
            stream.fps()
        );
        Ok(Self { input, stream })
    }

    pub fn stream(&self) -> &AvStream {
        &self.stream
    }
}

impl PacketSource for VideoInput {
    fn next_packet(&mut self) -> anyhow::Result<Option<RawPacket>> {
        while let Some(packet) = self.input.read_packet() {
            if packet.index() == self.stream.index() {
                return Ok(Some(packet));
            }
        }
        Ok(None)
    }
}
