//! ByteTrack 关联跟踪
//!
//! 1. 高低分检测框分开处理
//! 2. 高分框优先与所有轨迹匹配 (IOU)
//! 3. 低分框救援未匹配的轨迹
//! 4. 纯运动模型, 无外观特征
//!
//! BoT-SORT 变体使用同一关联流程, 只替换阈值 (见 `TrackerParams::botsort`).

use super::tracker::{compute_iou, KalmanBoxFilter, Tracker};
use super::types::BBox;
use crate::config::TrackerParams;

/// 单条轨迹
#[derive(Clone, Debug)]
struct Track {
    id: u32,
    kalman: KalmanBoxFilter,
    frames_lost: u32,
    class_id: u32,
}

impl Track {
    fn new(id: u32, bbox: &BBox, params: &TrackerParams) -> Self {
        Self {
            id,
            kalman: KalmanBoxFilter::new(bbox, params.process_noise, params.obs_noise),
            frames_lost: 0,
            class_id: bbox.class_id,
        }
    }

    fn update(&mut self, bbox: &BBox) {
        self.kalman.update(bbox);
        self.frames_lost = 0;
    }

    fn mark_lost(&mut self) {
        self.frames_lost += 1;
    }
}

/// ByteTrack 追踪器
pub struct ByteTracker {
    tracks: Vec<Track>,
    next_id: u32,
    params: TrackerParams,
}

impl ByteTracker {
    pub fn new() -> Self {
        Self::with_params(TrackerParams::bytetrack())
    }

    pub fn with_params(params: TrackerParams) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            params,
        }
    }

    /// IOU 贪心匹配, 返回 (检测序号, 轨迹序号)
    fn match_detections_to_tracks(
        &self,
        detections: &[(usize, &BBox)],
        track_indices: &[usize],
        iou_threshold: f32,
    ) -> Vec<(usize, usize)> {
        if detections.is_empty() || track_indices.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for (local_det, (det_idx, detection)) in detections.iter().enumerate() {
            for (local_track, &track_idx) in track_indices.iter().enumerate() {
                let track = &self.tracks[track_idx];
                // 不同类别不关联
                if track.class_id != detection.class_id {
                    continue;
                }
                let iou = compute_iou(detection, &track.kalman.predicted_bbox());
                if iou >= iou_threshold {
                    candidates.push((1.0 - iou, *det_idx, local_det, track_idx, local_track));
                }
            }
        }

        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut assignments = Vec::new();
        let mut used_det = vec![false; detections.len()];
        let mut used_track = vec![false; track_indices.len()];

        for (_, det_idx, local_det, track_idx, local_track) in candidates {
            if !used_det[local_det] && !used_track[local_track] {
                assignments.push((det_idx, track_idx));
                used_det[local_det] = true;
                used_track[local_track] = true;
            }
        }

        assignments
    }

    /// 跟踪统计
    pub fn stats(&self) -> String {
        format!(
            "跟踪: {} 个目标 | 总ID: {}",
            self.tracks.len(),
            self.next_id - 1
        )
    }
}

impl Default for ByteTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker for ByteTracker {
    fn update(&mut self, detections: &[BBox]) -> Vec<Option<u32>> {
        let mut ids = vec![None; detections.len()];

        // 1. 所有轨迹先预测
        for track in &mut self.tracks {
            track.kalman.predict();
        }

        // 2. 分离高低分检测框
        let mut high_dets: Vec<(usize, &BBox)> = Vec::new();
        let mut low_dets: Vec<(usize, &BBox)> = Vec::new();
        for (idx, det) in detections.iter().enumerate() {
            if det.confidence >= self.params.high_score_threshold {
                high_dets.push((idx, det));
            } else if det.confidence >= self.params.low_score_threshold {
                low_dets.push((idx, det));
            }
        }

        // 3. 第一轮: 高分检测 + 所有轨迹
        let mut matched_track = vec![false; self.tracks.len()];
        let all_tracks: Vec<usize> = (0..self.tracks.len()).collect();
        let assignments = self.match_detections_to_tracks(
            &high_dets,
            &all_tracks,
            self.params.high_iou_threshold,
        );
        for (det_idx, track_idx) in assignments {
            matched_track[track_idx] = true;
            self.tracks[track_idx].update(&detections[det_idx]);
            ids[det_idx] = Some(self.tracks[track_idx].id);
        }

        // 4. 第二轮: 低分检测 + 未匹配轨迹 (救援)
        let unmatched: Vec<usize> = (0..self.tracks.len())
            .filter(|&idx| !matched_track[idx])
            .collect();
        let low_assignments =
            self.match_detections_to_tracks(&low_dets, &unmatched, self.params.low_iou_threshold);
        for (det_idx, track_idx) in low_assignments {
            matched_track[track_idx] = true;
            self.tracks[track_idx].update(&detections[det_idx]);
            ids[det_idx] = Some(self.tracks[track_idx].id);
        }

        // 5. 未匹配轨迹标记丢失
        for (track, matched) in self.tracks.iter_mut().zip(&matched_track) {
            if !matched {
                track.mark_lost();
            }
        }

        // 6. 未匹配的高分检测 → 新建轨迹
        for (det_idx, det) in high_dets {
            if ids[det_idx].is_none() {
                let track = Track::new(self.next_id, det, &self.params);
                ids[det_idx] = Some(track.id);
                self.tracks.push(track);
                self.next_id += 1;
            }
        }

        // 7. 删除丢失太久的轨迹
        let max_lost = self.params.max_lost_frames;
        self.tracks.retain(|t| t.frames_lost <= max_lost);

        ids
    }

    fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
    }

    fn track_count(&self) -> usize {
        self.tracks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, confidence: f32) -> BBox {
        BBox {
            x1: x,
            y1: 10.0,
            x2: x + 40.0,
            y2: 90.0,
            confidence,
            class_id: 0,
        }
    }

    #[test]
    fn test_ids_stable_across_frames() {
        let mut tracker = ByteTracker::new();
        let first = tracker.update(&[det(0.0, 0.9), det(200.0, 0.8)]);
        assert_eq!(first, vec![Some(1), Some(2)]);

        let second = tracker.update(&[det(203.0, 0.85), det(4.0, 0.9)]);
        assert_eq!(second, vec![Some(2), Some(1)]);
        assert_eq!(tracker.track_count(), 2);
    }

    #[test]
    fn test_low_score_rescues_existing_track() {
        let mut tracker = ByteTracker::new();
        tracker.update(&[det(0.0, 0.9)]);
        // 低分框不新建轨迹, 但可以延续已有轨迹
        let ids = tracker.update(&[det(2.0, 0.2), det(400.0, 0.2)]);
        assert_eq!(ids, vec![Some(1), None]);
    }

    #[test]
    fn test_reset_restarts_ids() {
        let mut tracker = ByteTracker::new();
        tracker.update(&[det(0.0, 0.9)]);
        tracker.reset();
        assert_eq!(tracker.track_count(), 0);
        assert_eq!(tracker.update(&[det(300.0, 0.9)]), vec![Some(1)]);
    }

    #[test]
    fn test_lost_tracks_expire() {
        let mut params = TrackerParams::bytetrack();
        params.max_lost_frames = 2;
        let mut tracker = ByteTracker::with_params(params);
        tracker.update(&[det(0.0, 0.9)]);
        for _ in 0..3 {
            tracker.update(&[]);
        }
        assert_eq!(tracker.track_count(), 0);
    }
}
