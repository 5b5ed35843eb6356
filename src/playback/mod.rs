/// 回放系统 (Playback)
///
/// 消费者一侧: 缓存工作线程输出, 按回放帧率重放处理帧, 同步显示对应原始帧
/// - PlaybackBuffer: 只追加缓冲 + 跳转/循环/暂停
/// - PlaybackClock:  回放节拍
/// - OriginalTrack:  完整帧率原始帧
pub mod buffer;
pub mod clock;
pub mod original;

pub use buffer::{Phase, PlaybackBuffer, PlaybackState, PlaybackView};
pub use clock::PlaybackClock;
pub use original::OriginalTrack;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

/// 并排拼接: 左原始帧, 右标注帧 (原始帧缩放到相同高度)
pub fn compose_side_by_side(original: &RgbaImage, processed: &RgbaImage) -> RgbaImage {
    let height = processed.height().max(1);
    let left = if original.height() == height {
        original.clone()
    } else {
        let width = ((original.width() as f64 * height as f64 / original.height().max(1) as f64)
            .round() as u32)
            .max(1);
        imageops::resize(original, width, height, FilterType::Triangle)
    };

    let mut canvas = RgbaImage::from_pixel(
        left.width() + processed.width(),
        height,
        Rgba([0, 0, 0, 255]),
    );
    imageops::replace(&mut canvas, &left, 0, 0);
    imageops::replace(&mut canvas, processed, left.width() as i64, 0);
    canvas
}

impl PlaybackView {
    /// 预览画面; 没有原始帧时只返回标注帧
    pub fn compose(&self) -> RgbaImage {
        match &self.original {
            Some(original) => compose_side_by_side(original, &self.processed.image),
            None => (*self.processed.image).clone(),
        }
    }
}
