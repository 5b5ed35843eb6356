/// 检测数据结构定义
/// Data structures for detections and processed frames
use std::sync::Arc;

use chrono::{DateTime, Local};
use image::RgbaImage;

// ========== 数据结构 ==========

/// 检测框 (轴对齐, 像素坐标)
#[derive(Clone, Debug, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: u32,
}

impl BBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// 检测几何形状
#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    /// 轴对齐框 (x1, y1, x2, y2)
    Aabb { x1: f32, y1: f32, x2: f32, y2: f32 },
    /// 旋转框 4 个角点
    Obb { points: [(f32, f32); 4] },
}

impl Geometry {
    /// 外接轴对齐框 (x1, y1, x2, y2)
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        match *self {
            Geometry::Aabb { x1, y1, x2, y2 } => (x1, y1, x2, y2),
            Geometry::Obb { points } => points.iter().fold(
                (f32::MAX, f32::MAX, f32::MIN, f32::MIN),
                |(x1, y1, x2, y2), &(px, py)| (x1.min(px), y1.min(py), x2.max(px), y2.max(py)),
            ),
        }
    }

    pub fn is_oriented(&self) -> bool {
        matches!(self, Geometry::Obb { .. })
    }
}

/// 单个检测结果
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub geometry: Geometry,
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    /// 跟踪ID (仅跟踪模式下设置)
    pub track_id: Option<u32>,
}

impl Detection {
    pub fn new(
        geometry: Geometry,
        class_id: u32,
        class_name: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            geometry,
            class_id,
            class_name: class_name.into(),
            confidence: confidence.clamp(0.0, 1.0),
            track_id: None,
        }
    }

    /// 外接框 (用于跟踪匹配和NMS)
    pub fn bbox(&self) -> BBox {
        let (x1, y1, x2, y2) = self.geometry.bounds();
        BBox {
            x1,
            y1,
            x2,
            y2,
            confidence: self.confidence,
            class_id: self.class_id,
        }
    }

    /// 标注文字: "ID:{track} {name}: {conf}"
    pub fn label(&self) -> String {
        let label = format!("{}: {:.2}", self.class_name, self.confidence);
        match self.track_id {
            Some(id) => format!("ID:{} {}", id, label),
            None => label,
        }
    }
}

/// 处理帧结果 (工作线程 → 回放缓冲), 创建后不再修改
#[derive(Clone, Debug)]
pub struct FrameResult {
    /// 处理帧序号 (从0开始, 连续)
    pub index: usize,
    /// 对应的原生帧序号 (index * SampleFactor)
    pub native_index: u64,
    /// 标注后的图像
    pub image: Arc<RgbaImage>,
    pub detections: Vec<Detection>,
    /// 完成时间
    pub completed_at: DateTime<Local>,
    pub inference_ms: f64,
}

impl FrameResult {
    pub fn detection_count(&self) -> usize {
        self.detections.len()
    }
}
