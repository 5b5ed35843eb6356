//! 处理器 (Processor)
//! 职责: 启动/取消后台运行; 工作线程执行逐帧协议并发送事件

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Local;
use crossbeam_channel::{unbounded, Receiver, Sender};

use super::rate::RateReporter;
use super::PipelineEvent;
use crate::config::{RunConfig, Settings};
use crate::detection::{Annotator, FrameResult, Inference, Passthrough};
use crate::error::{PipelineError, Result};
use crate::export::LabelWriter;
use crate::input::SourceOpener;
use crate::sampling::{percent, SampleFactor};

type SharedInference = Arc<Mutex<Box<dyn Inference>>>;

/// 当前运行的句柄
struct RunHandle {
    cancel: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl RunHandle {
    fn join(self) {
        if self.handle.join().is_err() {
            log::error!("❌ 工作线程异常退出");
        }
    }
}

/// 视频处理器, 同一时刻最多一个运行
pub struct Processor {
    opener: Arc<dyn SourceOpener>,
    inference: SharedInference,
    annotator: Arc<Annotator>,
    settings: Settings,
    active: Option<RunHandle>,
}

impl Processor {
    pub fn new(
        opener: impl SourceOpener + 'static,
        inference: impl Inference + 'static,
    ) -> Self {
        Self {
            opener: Arc::new(opener),
            inference: Arc::new(Mutex::new(Box::new(inference))),
            annotator: Arc::new(Annotator::new()),
            settings: Settings::default(),
            active: None,
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = Arc::new(annotator);
        self
    }

    /// 是否有未结束的运行
    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|run| !run.done.load(Ordering::Acquire))
    }

    /// 启动一次运行, 立即返回事件接收端
    ///
    /// 已有运行未结束时返回 `PipelineError::Configuration`.
    pub fn start(
        &mut self,
        path: impl AsRef<Path>,
        config: RunConfig,
    ) -> Result<Receiver<PipelineEvent>> {
        if self.is_running() {
            return Err(PipelineError::configuration("已有处理任务正在运行"));
        }
        config.validate()?;

        // 上一次运行已结束, 回收线程
        if let Some(previous) = self.active.take() {
            previous.join();
        }

        let (tx, rx) = unbounded();
        let cancel = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            path: path.as_ref().to_path_buf(),
            config,
            settings: self.settings.clone(),
            opener: Arc::clone(&self.opener),
            inference: Arc::clone(&self.inference),
            annotator: Arc::clone(&self.annotator),
            cancel: Arc::clone(&cancel),
            done: Arc::clone(&done),
            events: tx,
        };

        let handle = std::thread::Builder::new()
            .name("pipeline-worker".into())
            .spawn(move || worker.run())
            .map_err(|e| PipelineError::configuration(format!("工作线程启动失败: {}", e)))?;

        self.active = Some(RunHandle {
            cancel,
            done,
            handle,
        });
        Ok(rx)
    }

    /// 请求取消当前运行 (在帧之间生效), 无运行时返回 false
    pub fn cancel(&self) -> bool {
        match &self.active {
            Some(run) if !run.done.load(Ordering::Acquire) => {
                log::info!("🛑 请求停止处理");
                run.cancel.store(true, Ordering::Release);
                true
            }
            _ => false,
        }
    }

    /// 等待当前运行结束
    pub fn wait(&mut self) {
        if let Some(run) = self.active.take() {
            run.join();
        }
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        self.cancel();
        self.wait();
    }
}

/// 运行结果 (错误单独走 Err)
enum Outcome {
    Finished,
    Stopped,
}

/// 单次运行的工作线程状态
struct Worker {
    path: PathBuf,
    config: RunConfig,
    settings: Settings,
    opener: Arc<dyn SourceOpener>,
    inference: SharedInference,
    annotator: Arc<Annotator>,
    cancel: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    events: Sender<PipelineEvent>,
}

impl Worker {
    fn run(self) {
        let emitted = Arc::new(AtomicU64::new(0));
        let mut reporter = None;

        // 推理/解码 panic 也必须以 Error 终止事件结束
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.execute(&emitted, &mut reporter)
        }))
        .unwrap_or_else(|payload| {
            Err(PipelineError::inference(format!(
                "工作线程 panic: {}",
                panic_message(payload.as_ref())
            )))
        });

        // 速率线程先退出, 终止事件之后不再有任何事件
        if let Some(reporter) = reporter {
            reporter.stop();
        }

        let processed = emitted.load(Ordering::Acquire);
        let terminal = match outcome {
            Ok(Outcome::Finished) => {
                log::info!("✅ 处理完成: 共 {} 帧", processed);
                PipelineEvent::Finished
            }
            Ok(Outcome::Stopped) => {
                log::info!("🛑 处理已停止: 已处理 {} 帧", processed);
                PipelineEvent::Stopped
            }
            Err(e) => {
                log::error!("❌ 视频处理失败: {}", e);
                PipelineEvent::Error(e.to_string())
            }
        };

        self.done.store(true, Ordering::Release);
        let _ = self.events.send(terminal);
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// 发送事件, 接收端已关闭时返回 false
    fn emit(&self, event: PipelineEvent) -> bool {
        self.events.send(event).is_ok()
    }

    fn info(&self, text: String) {
        if self.settings.info_events {
            self.emit(PipelineEvent::Info(text));
        }
    }

    /// 上一次运行 panic 后锁会被污染; 取回内部值, 运行开始时会 reset
    fn lock_inference(&self) -> MutexGuard<'_, Box<dyn Inference>> {
        self.inference.lock().unwrap_or_else(|poisoned| {
            log::warn!("⚠️ 上一次运行异常退出, 重置推理状态");
            PoisonError::into_inner(poisoned)
        })
    }

    fn execute(
        &self,
        emitted: &Arc<AtomicU64>,
        reporter: &mut Option<RateReporter>,
    ) -> Result<Outcome> {
        let config = &self.config;

        // 1. 打开帧源
        let mut source = self.opener.open(&self.path)?;
        let asset = source.asset().clone();

        // 2. 抽帧因子
        let factor = SampleFactor::resolve(asset.native_rate, config.target_rate);
        let expected = factor.expected_count(asset.native_frame_count);

        log::info!(
            "🚀 开始处理: {} | 目标{:.0}FPS | 每{}帧处理1帧 | 预计{}帧",
            asset.path.display(),
            config.target_rate,
            factor,
            expected
        );
        self.emit(PipelineEvent::SourceInfo {
            total_frames: asset.native_frame_count,
            native_rate: asset.native_rate,
            sample_factor: factor,
            target_rate: config.target_rate,
        });
        self.info(format!(
            "视频信息: {}帧, {:.1}FPS",
            asset.native_frame_count, asset.native_rate
        ));
        self.info(format!(
            "处理设置: 目标{:.0}FPS, 每{}帧处理1帧",
            config.target_rate, factor
        ));

        // 3. 推理阶段 (检测关闭时直接透传)
        let mut passthrough = Passthrough;
        let mut guard: MutexGuard<'_, Box<dyn Inference>>;
        let inference: &mut dyn Inference = if config.detection_enabled {
            guard = self.lock_inference();
            &mut **guard
        } else {
            &mut passthrough
        };
        inference.reset();
        if config.detection_enabled {
            let model_id = inference.prepare()?;
            log::info!("✅ 模型就绪: {}", model_id);
            self.emit(PipelineEvent::ModelReady(model_id));
        }
        if self.cancelled() {
            return Ok(Outcome::Stopped);
        }

        // 4. 标签导出 (尽力而为, 失败不影响处理)
        let writer = if config.export.save_txt {
            match LabelWriter::create(&config.export, &asset.stem()) {
                Ok(writer) => Some(writer),
                Err(e) => {
                    log::warn!("⚠️ 标签导出已禁用: {}", e);
                    None
                }
            }
        } else {
            None
        };

        // 5. 速率上报
        *reporter = Some(RateReporter::spawn(
            Arc::clone(emitted),
            self.events.clone(),
            Duration::from_millis(self.settings.rate_interval_ms),
            Duration::from_millis(self.settings.rate_window_ms),
        ));

        // 6. 逐帧处理
        let mut native_index: u64 = 0;
        let mut processed: usize = 0;
        let run_started = Instant::now();

        loop {
            if self.cancelled() {
                return Ok(Outcome::Stopped);
            }
            let Some(frame) = source.next_frame()? else {
                break;
            };
            let index = native_index;
            native_index += 1;

            if !factor.should_sample(index) {
                continue;
            }
            if self.cancelled() {
                return Ok(Outcome::Stopped);
            }

            let started = Instant::now();
            let detections =
                inference.infer(&frame.image, config.tracking_enabled, config.tracker)?;
            let inference_ms = started.elapsed().as_secs_f64() * 1000.0;

            let mut image = frame.image;
            if !detections.is_empty() {
                self.annotator.annotate(&mut image, &detections);
            }

            if let Some(writer) = &writer {
                let (width, height) = image.dimensions();
                if let Err(e) = writer.write(processed, &detections, width, height) {
                    log::warn!("⚠️ 帧 {} 标签写入失败: {}", processed, e);
                }
            }

            let count = detections.len();
            let result = FrameResult {
                index: processed,
                native_index: index,
                image: Arc::new(image),
                detections,
                completed_at: Local::now(),
                inference_ms,
            };

            if !self.emit(PipelineEvent::FrameReady(Arc::new(result))) {
                log::warn!("⚠️ 事件接收端已关闭, 停止处理");
                return Ok(Outcome::Stopped);
            }
            processed += 1;
            emitted.store(processed as u64, Ordering::Release);

            self.emit(PipelineEvent::Progress {
                processed: processed as u64,
                expected,
                percent: percent(processed as u64, expected),
            });
            if count > 0 {
                self.info(format!(
                    "帧 {}/{}: 检测到 {} 个对象",
                    index + 1,
                    asset.native_frame_count,
                    count
                ));
            }

            let interval = self.settings.stats_interval.max(1) as usize;
            if processed % interval == 0 {
                let elapsed = run_started.elapsed().as_secs_f64();
                log::debug!(
                    "📊 已处理 {}/{} 帧 | 平均 {:.1}fps | 最近推理 {:.1}ms",
                    processed,
                    expected,
                    processed as f64 / elapsed.max(1e-6),
                    inference_ms
                );
            }
        }

        Ok(Outcome::Finished)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "未知错误".to_string()
    }
}
