//! 原始帧轨道: 完整帧率的原始帧, 与处理帧按抽帧因子对齐

use std::sync::Arc;

use image::RgbaImage;

use crate::error::Result;
use crate::input::FrameSource;

#[derive(Clone, Debug, Default)]
pub struct OriginalTrack {
    frames: Vec<Arc<RgbaImage>>,
    rate: f64,
}

impl OriginalTrack {
    /// 解码帧源的全部原生帧
    pub fn load(source: &mut dyn FrameSource) -> Result<Self> {
        let rate = source.native_rate();
        let mut frames = Vec::with_capacity(source.native_frame_count() as usize);
        while let Some(frame) = source.next_frame()? {
            frames.push(Arc::new(frame.image));
        }
        log::info!("🎞️ 原始帧加载完成: {} 帧, {:.1}FPS", frames.len(), rate);
        Ok(Self { frames, rate })
    }

    pub fn from_frames(frames: Vec<RgbaImage>, rate: f64) -> Self {
        Self {
            frames: frames.into_iter().map(Arc::new).collect(),
            rate,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn get(&self, index: u64) -> Option<&Arc<RgbaImage>> {
        self.frames.get(usize::try_from(index).ok()?)
    }
}
