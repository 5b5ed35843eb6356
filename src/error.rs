//! 错误类型 (Error taxonomy)
//!
//! - Configuration: 启动参数非法 / 重复启动, 同步拒绝
//! - Source:        视频源无法打开或解码, 终止本次运行
//! - Inference:     模型加载或推理失败, 终止本次运行 (不重试)
//! - Export:        标签文件写入失败, 仅跳过当前帧
//! - Settings:      配置文件读写失败
//!
//! 取消不是错误: 它对应 `PipelineEvent::Stopped` 终止事件.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("视频源错误: {0}")]
    Source(String),

    #[error("推理失败: {0}")]
    Inference(String),

    #[error("标签导出失败 {}: {source}", path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("配置文件错误 {}: {message}", path.display())]
    Settings { path: PathBuf, message: String },
}

impl PipelineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn source_failure(message: impl Into<String>) -> Self {
        Self::Source(message.into())
    }

    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference(message.into())
    }

    pub fn export(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Export {
            path: path.into(),
            source,
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Inference(format!("{:#}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_error_names_path() {
        let err = PipelineError::export(
            "labels/a_000001.txt",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("a_000001.txt"));
        assert!(matches!(err, PipelineError::Export { .. }));
    }

    #[test]
    fn test_anyhow_maps_to_inference() {
        let err: PipelineError = anyhow::anyhow!("session run failed").into();
        assert!(matches!(err, PipelineError::Inference(ref m) if m.contains("session run")));
    }
}
