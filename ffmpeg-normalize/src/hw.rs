//! Hardware-accelerated decoder discovery.
//!
//! Decoder lookup goes from an explicitly requested decoder name, to the known
//! hardware decoders for the stream's codec (CUDA/QSV/V4L2M2M), to FFmpeg's
//! default software decoder for that codec.

/// Decoder requested when the caller does not name one.
pub const DEFAULT_HW_DECODER: &str = "h264_cuvid";

/// Known hardware decoder names for a codec, in order of preference.
pub fn hw_decoder_names(codec_id: ffmpeg_next::codec::Id) -> &'static [&'static str] {
    match codec_id {
        ffmpeg_next::codec::Id::H264 => &["h264_cuvid", "h264_qsv", "h264_v4l2m2m"],
        ffmpeg_next::codec::Id::HEVC => &["hevc_cuvid", "hevc_qsv", "hevc_v4l2m2m"],
        ffmpeg_next::codec::Id::VP8 => &["vp8_cuvid", "vp8_qsv", "vp8_v4l2m2m"],
        ffmpeg_next::codec::Id::VP9 => &["vp9_cuvid", "vp9_qsv", "vp9_v4l2m2m"],
        ffmpeg_next::codec::Id::AV1 => &["av1_cuvid", "av1_qsv"],
        ffmpeg_next::codec::Id::MPEG2VIDEO => &["mpeg2_cuvid", "mpeg2_qsv", "mpeg2_v4l2m2m"],
        ffmpeg_next::codec::Id::MPEG4 => &["mpeg4_cuvid", "mpeg4_v4l2m2m"],
        _ => &[],
    }
}

pub fn is_hw_decoder_name(name: &str) -> bool {
    name.ends_with("_cuvid") || name.ends_with("_qsv") || name.ends_with("_v4l2m2m")
}

/// Fallback used when no decoder name was configured or the named one is
/// missing: walks the hardware decoders known for `codec_id` in order and
/// returns the first one this FFmpeg build provides.
pub fn find_hw_decoder(codec_id: ffmpeg_next::codec::Id) -> Option<ffmpeg_next::Codec> {
    for name in hw_decoder_names(codec_id) {
        if let Some(codec) = ffmpeg_next::decoder::find_by_name(name) {
            log::info!("found hardware decoder: {}", name);
            return Some(codec);
        }
    }
    None
}

/// Picks the decoder for a stream of `codec_id`.
///
/// A `preferred` decoder that exists but decodes a different codec is skipped.
pub fn select_decoder(
    preferred: Option<&str>,
    codec_id: ffmpeg_next::codec::Id,
) -> anyhow::Result<ffmpeg_next::Codec> {
    if let Some(name) = preferred {
        match ffmpeg_next::decoder::find_by_name(name) {
            Some(codec) if codec.id() == codec_id => {
                log::info!("codec {} found", name);
                return Ok(codec);
            }
            Some(codec) => {
                log::warn!(
                    "codec {} decodes {:?}, stream is {:?}; skipping",
                    name,
                    codec.id(),
                    codec_id
                );
            }
            None => log::info!("codec {} not found", name),
        }
    }

    if let Some(codec) = find_hw_decoder(codec_id) {
        return Ok(codec);
    }

    match ffmpeg_next::decoder::find(codec_id) {
        Some(codec) => {
            log::info!("using software decoder {} for {:?}", codec.name(), codec_id);
            Ok(codec)
        }
        None => Err(anyhow::anyhow!("no decoder found for {:?}", codec_id)),
    }
}
