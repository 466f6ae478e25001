use futures::StreamExt;

use ffmpeg_normalize::{
    decoder::Decoder,
    filter::FilterGraphFactory,
    input::VideoInput,
    normalizer::{GraphFactory, NormalizeBackend},
    pipeline::{Pipeline, PipelineConfig, PipelineStats},
    scaler::SwsGraphFactory,
    task::PipelineTask,
};

mod config;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_next", log::LevelFilter::Info)
        .filter_module("ffmpeg_normalize", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    if let Err(e) = ffmpeg_normalize::init() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }

    let config = config::config();
    let code = match run(config).await {
        Ok(stats) => {
            log::info!("{}: {}", config.input(), stats);
            0
        }
        Err(e) => {
            eprintln!("error: {:#}", e);
            1
        }
    };

    std::process::exit(code);
}

async fn run(config: &config::AppConfig) -> anyhow::Result<PipelineStats> {
    let input = VideoInput::open(config.input(), None, None)?;
    let decoder = Decoder::open(input.stream(), &config.decoder_settings())?;
    log::info!("decoding {} with {}", config.input(), decoder.codec_name());
    let pipeline_config = PipelineConfig {
        max_frames: config.max_frames(),
        ..Default::default()
    };

    match config.backend() {
        NormalizeBackend::Filter => {
            drive(Pipeline::new(input, decoder, FilterGraphFactory, pipeline_config)).await
        }
        NormalizeBackend::Scale => {
            let factory = SwsGraphFactory::default();
            drive(Pipeline::new(input, decoder, factory, pipeline_config)).await
        }
    }
}

async fn drive<F>(pipeline: Pipeline<VideoInput, Decoder, F>) -> anyhow::Result<PipelineStats>
where
    F: GraphFactory + Send + 'static,
    F::Graph: Send,
{
    let task = PipelineTask::new();
    let mut frames = task.frames();
    let handle = task.start(pipeline);

    let mut received = 0u64;
    loop {
        tokio::select! {
            frame = frames.next() => {
                let Some(frame) = frame else {
                    break;
                };
                received += 1;
                log::trace!(
                    "received frame {}: {}x{} {:?}",
                    received,
                    frame.width(),
                    frame.height(),
                    frame.format()
                );
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted, draining pipeline");
                task.stop();
            },
        }
    }

    let stats = handle.await??;
    log::info!("{} frames received", received);
    Ok(stats)
}
