use std::sync::LazyLock;

use ffmpeg_normalize::{decoder::DecoderSettings, hw::DEFAULT_HW_DECODER, normalizer::NormalizeBackend};

pub struct AppConfig {
    input: String,
    decoder_name: Option<String>,
    max_frames: Option<u64>,
    backend: NormalizeBackend,
}

impl AppConfig {
    /// Positional argument wins over `HWDEC_INPUT`. `HWDEC_DECODER=auto`
    /// skips the named decoder and goes straight to automatic selection.
    pub fn from_vars<F>(arg: Option<String>, var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let input = arg
            .or_else(|| var("HWDEC_INPUT"))
            .ok_or(anyhow::anyhow!("no input given (argument or HWDEC_INPUT)"))?;

        let decoder_name = match var("HWDEC_DECODER") {
            Some(name) if name.is_empty() || name.eq_ignore_ascii_case("auto") => None,
            Some(name) => Some(name),
            None => Some(DEFAULT_HW_DECODER.to_string()),
        };

        let max_frames = var("HWDEC_MAX_FRAMES")
            .map(|v| {
                v.parse::<u64>()
                    .map_err(|e| anyhow::anyhow!("invalid HWDEC_MAX_FRAMES {:?}: {}", v, e))
            })
            .transpose()?;

        let backend = var("HWDEC_BACKEND")
            .map(|v| v.parse::<NormalizeBackend>())
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            input,
            decoder_name,
            max_frames,
            backend,
        })
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn decoder_settings(&self) -> DecoderSettings {
        DecoderSettings {
            decoder_name: self.decoder_name.clone(),
        }
    }

    pub fn max_frames(&self) -> Option<u64> {
        self.max_frames
    }

    pub fn backend(&self) -> NormalizeBackend {
        self.backend
    }
}

pub fn config() -> &'static AppConfig {
    static CONFIG: LazyLock<AppConfig> = LazyLock::new(|| {
        AppConfig::from_vars(std::env::args().nth(1), |key| std::env::var(key).ok())
            .unwrap_or_else(|e| {
                eprintln!("error: {:#}", e);
                std::process::exit(1);
            })
    });
    &CONFIG
}
