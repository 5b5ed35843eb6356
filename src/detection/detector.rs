//! 检测器 (Detector)
//! 职责: 单帧检测 → (可选) 跟踪关联 → 带跟踪ID的检测结果

use std::time::Instant;

use image::RgbaImage;

use super::bytetrack::ByteTracker;
use super::tracker::Tracker;
use super::types::Detection;
use crate::config::{Settings, TrackerVariant};
use crate::error::Result;

/// 原始检测模型 (无跟踪状态)
pub trait Detect: Send {
    /// 加载模型 (幂等), 返回模型标识
    fn load(&mut self) -> Result<String>;

    fn detect(&mut self, frame: &RgbaImage) -> Result<Vec<Detection>>;
}

/// 推理能力: 给定一帧返回检测结果, 跟踪模式下跨帧保持状态
pub trait Inference: Send {
    /// 运行开始前调用, 返回模型标识
    fn prepare(&mut self) -> Result<String>;

    fn infer(
        &mut self,
        frame: &RgbaImage,
        tracking: bool,
        variant: TrackerVariant,
    ) -> Result<Vec<Detection>>;

    /// 清除跨帧状态 (每次运行开始时调用)
    fn reset(&mut self);
}

impl<T: Inference + ?Sized> Inference for Box<T> {
    fn prepare(&mut self) -> Result<String> {
        (**self).prepare()
    }

    fn infer(
        &mut self,
        frame: &RgbaImage,
        tracking: bool,
        variant: TrackerVariant,
    ) -> Result<Vec<Detection>> {
        (**self).infer(frame, tracking, variant)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// 关闭检测时使用: 帧原样通过, 无检测结果
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Inference for Passthrough {
    fn prepare(&mut self) -> Result<String> {
        Ok("passthrough".to_string())
    }

    fn infer(
        &mut self,
        _frame: &RgbaImage,
        _tracking: bool,
        _variant: TrackerVariant,
    ) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }

    fn reset(&mut self) {}
}

/// 检测 + 跟踪
pub struct Detector<D> {
    model: D,
    settings: Settings,
    tracker: Option<(TrackerVariant, ByteTracker)>,

    // 统计
    count: u64,
    last: Instant,
}

impl<D: Detect> Detector<D> {
    pub fn new(model: D) -> Self {
        Self::with_settings(model, &Settings::default())
    }

    pub fn with_settings(model: D, settings: &Settings) -> Self {
        Self {
            model,
            settings: settings.clone(),
            tracker: None,
            count: 0,
            last: Instant::now(),
        }
    }

    /// 取得 (必要时创建) 指定变体的跟踪器; 变体切换时旧轨迹作废
    fn tracker_for(&mut self, variant: TrackerVariant) -> &mut ByteTracker {
        let stale = !matches!(self.tracker, Some((current, _)) if current == variant);
        if stale {
            let params = self.settings.tracker_params(variant);
            log::info!("🎯 跟踪器: {}", variant);
            self.tracker = Some((variant, ByteTracker::with_params(params)));
        }
        let (_, tracker) = self.tracker.get_or_insert_with(|| (variant, ByteTracker::new()));
        tracker
    }
}

impl<D: Detect> Inference for Detector<D> {
    fn prepare(&mut self) -> Result<String> {
        self.model.load()
    }

    fn infer(
        &mut self,
        frame: &RgbaImage,
        tracking: bool,
        variant: TrackerVariant,
    ) -> Result<Vec<Detection>> {
        let mut detections = self.model.detect(frame)?;

        if tracking {
            let boxes: Vec<_> = detections.iter().map(Detection::bbox).collect();
            let tracker = self.tracker_for(variant);
            let ids = tracker.update(&boxes);
            for (det, id) in detections.iter_mut().zip(ids) {
                det.track_id = id;
            }
        } else {
            detections.iter_mut().for_each(|d| d.track_id = None);
        }

        self.count += 1;
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            let fps = self.count as f64 / elapsed;
            if let Some((_, tracker)) = &self.tracker {
                log::debug!("🔍 推理 {:.1}fps | {}", fps, tracker.stats());
            } else {
                log::debug!("🔍 推理 {:.1}fps", fps);
            }
            self.count = 0;
            self.last = Instant::now();
        }

        Ok(detections)
    }

    fn reset(&mut self) {
        if let Some((_, tracker)) = &mut self.tracker {
            tracker.reset();
        }
        self.tracker = None;
        self.count = 0;
        self.last = Instant::now();
    }
}
