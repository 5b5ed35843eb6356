/// FFmpeg解码过滤器模块
/// FFmpeg decode filter: YUV420P 帧 → RGBA 原生帧 → 帧源队列
use crossbeam_channel::Sender;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};
use image::RgbaImage;
use std::time::Instant;

use super::source;

/// 解码线程 → 帧源 的消息
pub enum DecodeMessage {
    Frame(source::Frame),
    Error(String),
}

/// FFmpeg解码过滤器
pub struct DecodeFilter {
    tx: Sender<DecodeMessage>,
    next_index: u64,
    count: usize,
    last: Instant,
    current_fps: f64,
    dropped_frames: usize,
}

impl DecodeFilter {
    pub fn new(tx: Sender<DecodeMessage>) -> Self {
        Self {
            tx,
            next_index: 0,
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
            dropped_frames: 0,
        }
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        log::info!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        let index = self.next_index;
        self.next_index += 1;

        let image = unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() {
                None
            } else {
                let w = (*frame.as_ptr()).width as usize;
                let h = (*frame.as_ptr()).height as usize;
                let y_plane = (*frame.as_ptr()).data[0];
                let u_plane = (*frame.as_ptr()).data[1];
                let v_plane = (*frame.as_ptr()).data[2];
                let y_stride = (*frame.as_ptr()).linesize[0] as usize;
                let uv_stride = (*frame.as_ptr()).linesize[1] as usize;

                if w == 0
                    || h == 0
                    || y_plane.is_null()
                    || u_plane.is_null()
                    || v_plane.is_null()
                    || y_stride < w
                    || uv_stride < w.div_ceil(2)
                {
                    None
                } else {
                    let mut buffer = vec![255u8; w * h * 4];
                    yuv420p_to_rgba(
                        y_plane, u_plane, v_plane, y_stride, uv_stride, &mut buffer, w, h,
                    );
                    RgbaImage::from_raw(w as u32, h as u32, buffer)
                }
            }
        };

        // 原生帧序号必须连续: 损坏帧用黑帧占位
        let image = match image {
            Some(image) => image,
            None => {
                self.dropped_frames += 1;
                log::warn!("⚠️ 帧 #{} 无法转换, 使用空白帧占位", index);
                RgbaImage::new(1, 1)
            }
        };

        self.count += 1;
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            self.current_fps = self.count as f64 / elapsed;
            log::debug!(
                "📺 解码统计: {:.1}fps | 总帧{} | 异常{}",
                self.current_fps,
                self.next_index,
                self.dropped_frames
            );
            self.last = Instant::now();
            self.count = 0;
        }

        // 帧源已关闭 → 中止解码
        if self
            .tx
            .send(DecodeMessage::Frame(source::Frame { index, image }))
            .is_err()
        {
            return Err("frame source closed".to_string());
        }

        Ok(Some(frame))
    }
}

/// YUV420P → RGBA (BT.601 整数近似)
#[allow(clippy::too_many_arguments)]
unsafe fn yuv420p_to_rgba(
    y_plane: *const u8,
    u_plane: *const u8,
    v_plane: *const u8,
    y_stride: usize,
    uv_stride: usize,
    buffer: &mut [u8],
    width: usize,
    height: usize,
) {
    for (y, row) in buffer.chunks_exact_mut(width * 4).take(height).enumerate() {
        let y_row = y * y_stride;
        let uv_row = (y >> 1) * uv_stride;

        for (x, px) in row.chunks_exact_mut(4).enumerate() {
            let y_val = *y_plane.add(y_row + x) as i32;
            let u_val = *u_plane.add(uv_row + (x >> 1)) as i32 - 128;
            let v_val = *v_plane.add(uv_row + (x >> 1)) as i32 - 128;

            px[0] = (y_val + ((v_val * 179) >> 7)).clamp(0, 255) as u8;
            px[1] = (y_val - ((u_val * 44) >> 7) - ((v_val * 91) >> 7)).clamp(0, 255) as u8;
            px[2] = (y_val + ((u_val * 227) >> 7)).clamp(0, 255) as u8;
        }
    }
}
