/// FFmpeg 视频文件帧源
/// Video file frame source backed by ez-ffmpeg (CPU software decoding)
use std::path::Path;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::stream_info::{find_video_stream_info, StreamInfo};
use ez_ffmpeg::{AVMediaType, FfmpegContext};

use super::decode_filter::{DecodeFilter, DecodeMessage};
use super::source::{Frame, FrameSource, VideoAsset};
use crate::error::{PipelineError, Result};

/// 视频文件帧源: 独立解码线程 + 有界队列
pub struct FfmpegSource {
    asset: VideoAsset,
    rx: Receiver<DecodeMessage>,
    handle: Option<JoinHandle<()>>,
}

impl FfmpegSource {
    pub fn open(path: &Path, queue_capacity: usize) -> Result<Self> {
        let url = path.to_string_lossy().to_string();

        let (native_frame_count, native_rate) = match find_video_stream_info(url.clone()) {
            Ok(Some(StreamInfo::Video { nb_frames, fps, .. })) => (nb_frames.max(0) as u64, fps),
            Ok(_) => {
                return Err(PipelineError::source_failure(format!(
                    "无视频流: {}",
                    path.display()
                )))
            }
            Err(e) => {
                return Err(PipelineError::source_failure(format!(
                    "无法打开视频文件 {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        log::info!(
            "🎬 视频信息: {}帧, {:.1}FPS ({})",
            native_frame_count,
            native_rate,
            path.display()
        );

        let (tx, rx) = bounded(queue_capacity.max(1));
        let filter = DecodeFilter::new(tx.clone());

        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("decode", Box::new(filter));
        let out = create_null_output().add_frame_pipeline(pipe);

        let ctx = FfmpegContext::builder()
            .input(url.as_str())
            .filter_desc("format=yuv420p")
            .output(out)
            .build()
            .map_err(|e| PipelineError::source_failure(format!("构建解码器失败: {}", e)))?;

        let handle = std::thread::Builder::new()
            .name("ffmpeg-decode".into())
            .spawn(move || {
                let result = ctx
                    .start()
                    .map_err(|e| format!("启动失败: {}", e))
                    .and_then(|sch| sch.wait().map_err(|e| format!("解码失败: {}", e)));
                match result {
                    Ok(()) => log::info!("✅ 解码线程正常退出"),
                    Err(e) => {
                        // 帧源主动关闭时发送会失败, 忽略
                        let _ = tx.send(DecodeMessage::Error(e));
                    }
                }
            })
            .map_err(|e| PipelineError::source_failure(format!("解码线程启动失败: {}", e)))?;

        Ok(Self {
            asset: VideoAsset {
                path: path.to_path_buf(),
                native_frame_count,
                native_rate,
            },
            rx,
            handle: Some(handle),
        })
    }
}

impl FrameSource for FfmpegSource {
    fn asset(&self) -> &VideoAsset {
        &self.asset
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.rx.recv() {
            Ok(DecodeMessage::Frame(frame)) => Ok(Some(frame)),
            Ok(DecodeMessage::Error(e)) => Err(PipelineError::source_failure(e)),
            // 解码线程结束且队列已空
            Err(_) => Ok(None),
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        // 先关闭接收端, 让阻塞在发送上的解码线程退出
        drop(std::mem::replace(&mut self.rx, crossbeam_channel::never()));
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("❌ 解码线程异常退出");
            }
        }
    }
}
