/// Registers FFmpeg components (codecs, demuxers, filters). Call once at
/// startup before opening any input.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod decoder;
pub mod filter;
pub mod format;
pub mod frame;
pub mod hw;
pub mod input;
pub mod normalizer;
pub mod packet;
pub mod pipeline;
pub mod scaler;
pub mod status;
pub mod stream;
pub mod task;

#[cfg(test)]
mod testing;
