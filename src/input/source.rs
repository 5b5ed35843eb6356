//! 帧源接口 + 图片目录帧源

use std::path::{Path, PathBuf};

use image::RgbaImage;

use crate::error::{PipelineError, Result};

/// 已解码的原生帧
#[derive(Clone, Debug)]
pub struct Frame {
    /// 原生帧序号 (解码顺序)
    pub index: u64,
    pub image: RgbaImage,
}

/// 视频资源信息, 打开后不再变化
#[derive(Clone, Debug, PartialEq)]
pub struct VideoAsset {
    pub path: PathBuf,
    /// 原生帧数 (0 表示未知)
    pub native_frame_count: u64,
    /// 原生帧率 (<= 0 表示未知)
    pub native_rate: f64,
}

impl VideoAsset {
    /// 文件名(不含扩展名), 用于派生导出目录和文件名
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("video")
            .to_string()
    }
}

/// 顺序帧源
pub trait FrameSource: Send {
    fn asset(&self) -> &VideoAsset;

    /// 读取下一帧, 源耗尽时返回 `Ok(None)`
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn native_frame_count(&self) -> u64 {
        self.asset().native_frame_count
    }

    fn native_rate(&self) -> f64 {
        self.asset().native_rate
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn asset(&self) -> &VideoAsset {
        (**self).asset()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }
}

/// 打开帧源 (每次运行调用一次)
pub trait SourceOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>>;
}

impl<F> SourceOpener for F
where
    F: Fn(&Path) -> Result<Box<dyn FrameSource>> + Send + Sync,
{
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        self(path)
    }
}

/// 图片目录帧源: 按文件名排序, 帧率由调用方指定
pub struct ImageDirSource {
    asset: VideoAsset,
    files: Vec<PathBuf>,
    cursor: usize,
}

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

impl ImageDirSource {
    pub fn open(dir: &Path, rate: f64) -> Result<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            PipelineError::source_failure(format!("无法打开图片目录 {}: {}", dir.display(), e))
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(PipelineError::source_failure(format!(
                "图片目录为空: {}",
                dir.display()
            )));
        }

        log::info!("📂 图片目录: {} ({} 帧, {:.1}fps)", dir.display(), files.len(), rate);

        Ok(Self {
            asset: VideoAsset {
                path: dir.to_path_buf(),
                native_frame_count: files.len() as u64,
                native_rate: rate,
            },
            files,
            cursor: 0,
        })
    }
}

impl FrameSource for ImageDirSource {
    fn asset(&self) -> &VideoAsset {
        &self.asset
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(None);
        };
        let image = image::open(path)
            .map_err(|e| {
                PipelineError::source_failure(format!("解码失败 {}: {}", path.display(), e))
            })?
            .to_rgba8();
        let frame = Frame {
            index: self.cursor as u64,
            image,
        };
        self.cursor += 1;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn write_frames(dir: &Path, count: usize) {
        for i in 0..count {
            let img = RgbaImage::from_pixel(4, 3, Rgba([i as u8, 0, 0, 255]));
            img.save(dir.join(format!("frame_{:03}.png", i))).unwrap();
        }
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();
    }

    #[test]
    fn test_image_dir_source_order() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 3);

        let mut source = ImageDirSource::open(dir.path(), 15.0).unwrap();
        assert_eq!(source.native_frame_count(), 3);
        assert_eq!(source.native_rate(), 15.0);

        for expected in 0..3u8 {
            let frame = source.next_frame().unwrap().unwrap();
            assert_eq!(frame.index, expected as u64);
            assert_eq!(frame.image.get_pixel(0, 0)[0], expected);
        }
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_empty_dir_is_source_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageDirSource::open(dir.path(), 30.0),
            Err(PipelineError::Source(_))
        ));
    }

    #[test]
    fn test_asset_stem() {
        let asset = VideoAsset {
            path: PathBuf::from("/data/clips/street.mp4"),
            native_frame_count: 0,
            native_rate: 0.0,
        };
        assert_eq!(asset.stem(), "street");
        let asset = VideoAsset {
            path: PathBuf::from("/"),
            ..asset
        };
        assert_eq!(asset.stem(), "video");
    }
}
