// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 运行参数与持久化设置
pub mod detection; // 检测/跟踪/标注
pub mod error; // 流水线错误
pub mod export; // 标签与结果导出
pub mod input; // 帧源 (图片目录 / FFmpeg)
pub mod models; // 模型实现
pub mod pipeline; // 后台处理器与事件
pub mod playback; // 同步回放
pub mod sampling; // 抽帧

pub use crate::config::{
    Args, ExportSettings, RunConfig, Settings, TrackerParams, TrackerVariant,
};
pub use crate::detection::{
    Annotator, Detection, Detector, FrameResult, Geometry, Inference, Passthrough,
};
pub use crate::error::{PipelineError, Result};
pub use crate::export::{DetectionLog, LabelWriter};
pub use crate::input::{DefaultOpener, FrameSource, SourceOpener, VideoAsset};
pub use crate::pipeline::{PipelineEvent, Processor};
pub use crate::playback::{OriginalTrack, PlaybackBuffer, PlaybackClock, PlaybackView};
pub use crate::sampling::SampleFactor;
