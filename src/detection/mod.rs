/// 检测系统 (Detection System)
///
/// 推理阶段, 由流水线工作线程逐帧调用
/// - Detector: 目标检测 + 跟踪关联
/// - Tracker:  ByteTrack / BoT-SORT 关联
/// - Annotator: 标注绘制
pub mod annotate;
pub mod bytetrack;
pub mod detector;
pub mod tracker;
pub mod types;

pub use annotate::{class_color, Annotator};
pub use bytetrack::ByteTracker;
pub use detector::{Detect, Detector, Inference, Passthrough};
pub use tracker::{compute_iou, Tracker};
pub use types::{BBox, Detection, FrameResult, Geometry};
