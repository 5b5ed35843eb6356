//! 视频检测 + 同步回放
//!
//! 运行: cargo run --bin yolo-replay --features ffmpeg,onnx --release -- -i video.mp4
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::{bounded, never, select, Receiver};
use mimalloc::MiMalloc;

use yolo_replay::detection::{Annotator, Inference};
use yolo_replay::export::DetectionLog;
use yolo_replay::playback::{
    OriginalTrack, Phase, PlaybackBuffer, PlaybackClock, PlaybackView,
};
use yolo_replay::{
    Args, DefaultOpener, PipelineEvent, Processor, RunConfig, Settings, SourceOpener,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn build_inference(args: &Args, settings: &Settings) -> Box<dyn Inference> {
    #[cfg(feature = "onnx")]
    {
        use yolo_replay::detection::Detector;
        use yolo_replay::models::{YoloConfig, YoloDetector};

        let model = YoloDetector::new(YoloConfig::new(&args.model, settings));
        Box::new(Detector::with_settings(model, settings))
    }

    #[cfg(not(feature = "onnx"))]
    {
        let _ = settings;
        if !args.no_detection {
            log::warn!("⚠️ 未启用 onnx 特性, 检测不可用: {}", args.model.display());
        }
        Box::new(yolo_replay::detection::Passthrough)
    }
}

/// 后台解码完整原始帧, 供回放并排显示
fn spawn_original_loader(
    opener: DefaultOpener,
    input: PathBuf,
) -> Receiver<yolo_replay::Result<OriginalTrack>> {
    let (tx, rx) = bounded(1);
    let spawned = thread::Builder::new()
        .name("original-loader".into())
        .spawn(move || {
            let track = opener
                .open(&input)
                .and_then(|mut source| OriginalTrack::load(&mut source));
            let _ = tx.send(track);
        });
    if let Err(e) = spawned {
        log::warn!("⚠️ 原始帧加载线程启动失败: {}", e);
    }
    rx
}

fn save_preview(dir: &Path, view: &PlaybackView) {
    let path = dir.join(format!("frame_{:06}.png", view.position));
    if let Err(e) = view.compose().save(&path) {
        log::warn!("⚠️ 预览保存失败 {}: {}", path.display(), e);
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(args.log_level.as_str()),
    )
    .init();

    let settings = Settings::load(&args.settings);
    settings.log_summary();

    let mut annotator = Annotator::new();
    if let Some(font) = &args.font {
        annotator = annotator
            .with_font(font)
            .with_context(|| format!("加载字体失败: {}", font.display()))?;
    }

    let opener = DefaultOpener {
        image_rate: args.source_fps,
        queue_capacity: settings.source_queue_capacity,
    };

    if let Some(dir) = &args.preview_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("创建预览目录失败: {}", dir.display()))?;
    }

    let mut processor = Processor::new(opener.clone(), build_inference(&args, &settings))
        .with_settings(settings.clone())
        .with_annotator(annotator);

    let config = RunConfig::from_args(&args);
    let looping = !args.no_loop;
    let events = processor.start(&args.input, config)?;
    let originals = spawn_original_loader(opener, args.input.clone());

    let mut buffer = PlaybackBuffer::new(looping);
    let mut clock = PlaybackClock::new(args.playback_fps);
    let ticker = clock.ticker();
    let mut detection_log = DetectionLog::new();

    let mut terminal: Option<PipelineEvent> = None;
    let mut originals_done = false;

    loop {
        let event_rx = if terminal.is_some() { never() } else { events.clone() };
        let original_rx = if originals_done { never() } else { originals.clone() };

        select! {
            recv(event_rx) -> msg => match msg {
                Ok(PipelineEvent::FrameReady(result)) => {
                    detection_log.push(&result);
                    buffer.append(result);
                    if buffer.phase() == Phase::Loaded && buffer.play() {
                        clock.start(Instant::now());
                    }
                }
                Ok(PipelineEvent::SourceInfo {
                    total_frames,
                    native_rate,
                    sample_factor,
                    target_rate,
                }) => {
                    log::info!(
                        "🎬 源: {}帧 @ {:.1}FPS → 目标 {:.0}FPS (因子 {})",
                        total_frames, native_rate, target_rate, sample_factor
                    );
                    buffer.set_sample_factor(sample_factor);
                }
                Ok(PipelineEvent::ModelReady(model)) => log::info!("🧠 模型: {}", model),
                Ok(PipelineEvent::Progress { processed, expected, percent }) => {
                    log::debug!("⏳ 进度 {}/{} ({}%)", processed, expected, percent);
                }
                Ok(PipelineEvent::Rate(fps)) => log::info!("⚡ 处理速率: {:.1}fps", fps),
                Ok(PipelineEvent::Info(text)) => log::debug!("{}", text),
                Ok(event) if event.is_terminal() => {
                    if let PipelineEvent::Error(message) = &event {
                        log::error!("❌ {}", message);
                    }
                    // 之后的完整循环才计入圈数
                    buffer.mark_complete();
                    terminal = Some(event);
                }
                Ok(_) => {}
                Err(_) => {
                    buffer.mark_complete();
                    terminal = Some(PipelineEvent::Stopped);
                }
            },
            recv(original_rx) -> msg => {
                originals_done = true;
                match msg {
                    Ok(Ok(track)) => buffer.set_originals(track),
                    Ok(Err(e)) => log::warn!("⚠️ 原始帧不可用, 只回放标注帧: {}", e),
                    Err(_) => {}
                }
            },
            recv(ticker) -> _ => {
                if clock.poll(Instant::now()) {
                    if let Some(view) = buffer.tick() {
                        if let Some(dir) = &args.preview_dir {
                            save_preview(dir, &view);
                        }
                    }
                }
            },
        }

        if terminal.is_some() {
            let played_out = if looping {
                buffer.loops_completed() >= args.loops
            } else {
                buffer.phase() == Phase::Paused
            };
            if buffer.is_empty() || played_out {
                break;
            }
        }
    }

    clock.stop();
    processor.wait();

    let summary = detection_log.summary();
    log::info!(
        "📊 共 {} 帧, {} 个检测, 平均每帧 {:.2}",
        summary.total_frames,
        summary.total_detections,
        summary.average_detections_per_frame
    );
    for (name, count) in &summary.class_counts {
        log::info!("  {}: {}", name, count);
    }
    if let Some(path) = &args.results_json {
        detection_log.write_json(path)?;
        log::info!("💾 检测结果已保存: {}", path.display());
    }
    if let Some(path) = &args.results_csv {
        detection_log.write_csv(path)?;
        log::info!("💾 检测结果已保存: {}", path.display());
    }

    match terminal {
        Some(PipelineEvent::Error(message)) => Err(anyhow::anyhow!(message)),
        _ => Ok(()),
    }
}
