/// 处理流水线 (Worker Pipeline)
///
/// 后台工作线程: 帧源 → 抽帧 → 推理 → 标注/导出 → 事件
/// - Processor:    启动/取消, 同时最多一个运行
/// - RateReporter: 独立线程按固定间隔上报处理速率
pub mod processor;
pub mod rate;

pub use processor::Processor;
pub use rate::{RateReporter, RateWindow};

use std::sync::Arc;

use crate::detection::FrameResult;
use crate::sampling::SampleFactor;

/// 工作线程 → 消费者 的事件
///
/// `Finished` / `Stopped` / `Error` 为终止事件, 每次运行恰好一个, 且是最后一个事件.
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    /// 处理进度 (expected 为 0 表示原生帧数未知)
    Progress {
        processed: u64,
        expected: u64,
        percent: u8,
    },
    /// 处理速率 (帧/秒)
    Rate(f64),
    FrameReady(Arc<FrameResult>),
    ModelReady(String),
    SourceInfo {
        total_frames: u64,
        native_rate: f64,
        sample_factor: SampleFactor,
        target_rate: f64,
    },
    /// 状态文字 (视频信息 / 逐帧检测数量)
    Info(String),
    Error(String),
    Finished,
    Stopped,
}

impl PipelineEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineEvent::Finished | PipelineEvent::Stopped | PipelineEvent::Error(_)
        )
    }
}
