//! 多目标跟踪公共组件
//! Common components for multi-object tracking

use super::types::BBox;

// ========== 卡尔曼滤波器 ==========

/// 简化卡尔曼滤波器 (单个边界框的位置和尺寸平滑)
/// 状态向量: [x_center, y_center, width, height, vx, vy, vw, vh]
#[derive(Clone, Debug)]
pub struct KalmanBoxFilter {
    state: [f32; 8],

    /// 估计误差协方差 (简化为对角阵)
    p: [f32; 8],

    /// 过程噪声
    q: f32,

    /// 观测噪声
    r: f32,

    /// 速度衰减因子
    velocity_decay: f32,

    /// 静止阈值 (像素/帧)
    stationary_threshold: f32,

    stationary_count: u32,
}

impl KalmanBoxFilter {
    /// - `q`: 过程噪声 (0.1-1.0, 越小越平滑)
    /// - `r`: 观测噪声 (越大越平滑)
    pub fn new(bbox: &BBox, q: f32, r: f32) -> Self {
        let (cx, cy) = bbox.center();
        Self {
            state: [cx, cy, bbox.width(), bbox.height(), 0.0, 0.0, 0.0, 0.0],
            p: [10.0; 8],
            q,
            r,
            velocity_decay: 0.95,
            stationary_threshold: 2.0,
            stationary_count: 0,
        }
    }

    /// 预测下一帧状态 (匀速模型 + 速度衰减)
    pub fn predict(&mut self) {
        let speed = (self.state[4] * self.state[4] + self.state[5] * self.state[5]).sqrt();
        let is_stationary = speed < self.stationary_threshold;

        let (pos_decay, size_decay) = if is_stationary {
            self.stationary_count += 1;
            // 连续静止3帧后大幅衰减速度
            let decay = if self.stationary_count > 3 {
                0.7
            } else {
                self.velocity_decay
            };
            (decay, decay)
        } else {
            self.stationary_count = 0;
            (self.velocity_decay, 0.98)
        };
        self.state[4] *= pos_decay;
        self.state[5] *= pos_decay;
        self.state[6] *= size_decay;
        self.state[7] *= size_decay;

        for i in 0..4 {
            self.state[i] += self.state[i + 4];
        }

        let q = if is_stationary { self.q * 0.5 } else { self.q };
        self.p.iter_mut().for_each(|p| *p += q);
    }

    /// 融合观测值, 按残差大小自适应调整观测噪声
    pub fn update(&mut self, bbox: &BBox) {
        let (cx, cy) = bbox.center();
        let residual = [
            cx - self.state[0],
            cy - self.state[1],
            bbox.width() - self.state[2],
            bbox.height() - self.state[3],
        ];

        let residual_norm = (residual[0] * residual[0] + residual[1] * residual[1]).sqrt();
        let adaptive_r = if residual_norm < self.stationary_threshold {
            self.r * 0.3
        } else if residual_norm < 10.0 {
            self.r
        } else {
            self.r * 3.0
        };

        let mut gain = [0.0f32; 8];
        for (i, k) in gain.iter_mut().enumerate() {
            let r = if i < 4 { adaptive_r } else { adaptive_r * 10.0 };
            *k = self.p[i] / (self.p[i] + r);
        }

        let velocity_gain = if residual_norm < self.stationary_threshold {
            0.3
        } else {
            1.0
        };
        for i in 0..4 {
            self.state[i] += gain[i] * residual[i];
            self.state[i + 4] += gain[i + 4] * residual[i] * velocity_gain;
        }

        for (p, k) in self.p.iter_mut().zip(gain) {
            *p *= 1.0 - k;
        }

        if residual_norm >= self.stationary_threshold {
            self.stationary_count = 0;
        }
    }

    /// 当前状态的边界框
    pub fn state_bbox(&self) -> BBox {
        Self::to_bbox(self.state[0], self.state[1], self.state[2], self.state[3])
    }

    /// 下一帧预测的边界框 (用于匹配)
    pub fn predicted_bbox(&self) -> BBox {
        Self::to_bbox(
            self.state[0] + self.state[4],
            self.state[1] + self.state[5],
            self.state[2] + self.state[6],
            self.state[3] + self.state[7],
        )
    }

    fn to_bbox(cx: f32, cy: f32, w: f32, h: f32) -> BBox {
        let w = w.max(1.0);
        let h = h.max(1.0);
        BBox {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
            confidence: 1.0,
            class_id: 0,
        }
    }
}

// ========== 跟踪器统一接口 ==========

/// 多目标跟踪器
///
/// 只看到被抽中的帧序列; 跨帧保持状态直到 `reset`.
pub trait Tracker: Send {
    /// 更新跟踪器, 返回与 `detections` 一一对应的跟踪ID
    /// (未被确认为轨迹的检测为 `None`)
    fn update(&mut self, detections: &[BBox]) -> Vec<Option<u32>>;

    /// 清除所有轨迹, ID 从 1 重新分配
    fn reset(&mut self);

    /// 当前活跃轨迹数量
    fn track_count(&self) -> usize;
}

// ========== 工具函数 ==========

/// 两个边界框的IOU
pub fn compute_iou(bbox1: &BBox, bbox2: &BBox) -> f32 {
    let x1 = bbox1.x1.max(bbox2.x1);
    let y1 = bbox1.y1.max(bbox2.y1);
    let x2 = bbox1.x2.min(bbox2.x2);
    let y2 = bbox1.y2.min(bbox2.y2);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let union = bbox1.area() + bbox2.area() - intersection;
    if union <= 0.0 {
        return 0.0;
    }

    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32) -> BBox {
        BBox {
            x1,
            y1,
            x2,
            y2,
            confidence: 0.9,
            class_id: 0,
        }
    }

    #[test]
    fn test_iou() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        assert!((compute_iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(compute_iou(&a, &bbox(20.0, 20.0, 30.0, 30.0)), 0.0);
        let half = compute_iou(&a, &bbox(5.0, 0.0, 15.0, 10.0));
        assert!((half - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_kalman_follows_motion() {
        let mut filter = KalmanBoxFilter::new(&bbox(0.0, 0.0, 10.0, 10.0), 0.1, 0.5);
        for step in 1..=10 {
            filter.predict();
            let offset = step as f32 * 5.0;
            filter.update(&bbox(offset, 0.0, offset + 10.0, 10.0));
        }
        let (cx, _) = filter.state_bbox().center();
        assert!(cx > 40.0, "center x = {}", cx);
    }
}
