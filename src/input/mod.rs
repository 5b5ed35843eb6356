/// 视频输入系统 (Video Input System)
///
/// 顺序帧源, 报告原生帧数和原生帧率
/// - FfmpegSource:   视频文件解码 (ffmpeg 特性)
/// - ImageDirSource: 图片目录
/// - DefaultOpener:  按路径类型选择帧源
#[cfg(feature = "ffmpeg")]
pub mod decode_filter;
#[cfg(feature = "ffmpeg")]
pub mod decoder;
pub mod source;

#[cfg(feature = "ffmpeg")]
pub use decoder::FfmpegSource;
pub use source::{Frame, FrameSource, ImageDirSource, SourceOpener, VideoAsset};

use std::path::Path;

use crate::error::{PipelineError, Result};

/// 目录 → 图片序列, 文件 → FFmpeg 解码
#[derive(Debug, Clone)]
pub struct DefaultOpener {
    /// 图片目录帧源的帧率
    pub image_rate: f64,
    /// 解码队列容量
    pub queue_capacity: usize,
}

impl Default for DefaultOpener {
    fn default() -> Self {
        Self {
            image_rate: 30.0,
            queue_capacity: 8,
        }
    }
}

impl SourceOpener for DefaultOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        if path.is_dir() {
            return Ok(Box::new(ImageDirSource::open(path, self.image_rate)?));
        }
        if !path.exists() {
            return Err(PipelineError::source_failure(format!(
                "视频文件不存在: {}",
                path.display()
            )));
        }

        #[cfg(feature = "ffmpeg")]
        {
            Ok(Box::new(FfmpegSource::open(path, self.queue_capacity)?))
        }

        #[cfg(not(feature = "ffmpeg"))]
        {
            Err(PipelineError::source_failure(format!(
                "视频文件解码需要启用 ffmpeg 特性: {}",
                path.display()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_source_error() {
        let opener = DefaultOpener::default();
        let result = opener.open(Path::new("/definitely/not/here.mp4"));
        assert!(matches!(result, Err(PipelineError::Source(_))));
    }

    #[test]
    fn test_directory_opens_image_source() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbaImage::new(2, 2)
            .save(dir.path().join("0001.png"))
            .unwrap();
        let opener = DefaultOpener {
            image_rate: 12.0,
            queue_capacity: 2,
        };
        let source = opener.open(dir.path()).unwrap();
        assert_eq!(source.native_frame_count(), 1);
        assert_eq!(source.native_rate(), 12.0);
    }
}
