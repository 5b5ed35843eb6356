//! 回放缓冲 (Playback Buffer)
//!
//! 只追加的处理帧序列 + 回放状态. 处理帧 `i` 对应原始帧 `i * SampleFactor`
//! (超出原始帧轨道时取最后一帧).
//!
//! 运行结束 (`mark_complete`) 之前缓冲仍在增长: 循环回放不计入完成圈数,
//! 非循环回放在末尾等待新帧而不是暂停.

use std::sync::Arc;

use image::RgbaImage;

use super::original::OriginalTrack;
use crate::detection::FrameResult;
use crate::sampling::SampleFactor;

/// 回放阶段: Idle → Loaded (首帧追加) → Playing ⇄ Paused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loaded,
    Playing,
    Paused,
}

/// 回放状态, 只由消费者一侧修改
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackState {
    /// 下一次 tick 显示的位置; 非循环且等待新帧时等于 len
    pub index: usize,
    pub playing: bool,
    pub looping: bool,
}

/// 某个位置的同步画面
#[derive(Debug, Clone)]
pub struct PlaybackView {
    pub position: usize,
    pub processed: Arc<FrameResult>,
    /// 对应的原始帧 (原始帧轨道为空时为 None)
    pub original: Option<Arc<RgbaImage>>,
    pub original_index: u64,
    pub detection_count: usize,
}

#[derive(Debug)]
pub struct PlaybackBuffer {
    frames: Vec<Arc<FrameResult>>,
    originals: OriginalTrack,
    factor: SampleFactor,
    state: PlaybackState,
    phase: Phase,
    loops_completed: u32,
    /// 工作线程已发出终止事件, 不会再追加
    complete: bool,
    /// 当前这一圈从 0 开始且开始时缓冲已完整
    full_pass: bool,
}

impl PlaybackBuffer {
    pub fn new(looping: bool) -> Self {
        Self {
            frames: Vec::new(),
            originals: OriginalTrack::default(),
            factor: SampleFactor::ONE,
            state: PlaybackState {
                index: 0,
                playing: false,
                looping,
            },
            phase: Phase::Idle,
            loops_completed: 0,
            complete: false,
            full_pass: false,
        }
    }

    /// 新一次运行: 清空所有缓冲, 回到 Idle (保留循环设置)
    pub fn reset(&mut self, factor: SampleFactor) {
        self.frames.clear();
        self.originals = OriginalTrack::default();
        self.factor = factor;
        self.state.index = 0;
        self.state.playing = false;
        self.phase = Phase::Idle;
        self.loops_completed = 0;
        self.complete = false;
        self.full_pass = false;
    }

    pub fn set_sample_factor(&mut self, factor: SampleFactor) {
        self.factor = factor;
    }

    pub fn set_originals(&mut self, originals: OriginalTrack) {
        self.originals = originals;
    }

    /// 运行已结束: 之后的完整循环才计入圈数, 非循环回放到末尾时暂停
    pub fn mark_complete(&mut self) {
        self.complete = true;
        self.full_pass = self.state.index == 0;
        if !self.state.looping && self.state.playing && self.state.index >= self.frames.len() {
            self.state.index = self.frames.len().saturating_sub(1);
            self.pause();
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// 追加一帧处理结果 (按到达顺序, 不重排不丢弃)
    pub fn append(&mut self, result: Arc<FrameResult>) {
        self.frames.push(result);
        if self.phase == Phase::Idle {
            self.phase = Phase::Loaded;
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn loops_completed(&self) -> u32 {
        self.loops_completed
    }

    pub fn frames(&self) -> &[Arc<FrameResult>] {
        &self.frames
    }

    /// 开始播放, 缓冲为空时不生效
    pub fn play(&mut self) -> bool {
        if self.frames.is_empty() {
            return false;
        }
        self.state.playing = true;
        self.phase = Phase::Playing;
        true
    }

    pub fn pause(&mut self) {
        if self.phase == Phase::Playing {
            self.state.playing = false;
            self.phase = Phase::Paused;
        }
    }

    pub fn toggle(&mut self) -> bool {
        if self.state.playing {
            self.pause();
            false
        } else {
            self.play()
        }
    }

    /// 处理帧位置 → 原始帧序号
    pub fn original_index(&self, position: usize) -> u64 {
        let index = self.factor.native_index(position);
        match self.originals.len() {
            0 => index,
            len => index.min(len as u64 - 1),
        }
    }

    fn view(&self, position: usize) -> Option<PlaybackView> {
        let processed = self.frames.get(position)?;
        let original_index = self.original_index(position);
        Some(PlaybackView {
            position,
            processed: Arc::clone(processed),
            original: self.originals.get(original_index).cloned(),
            original_index,
            detection_count: processed.detection_count(),
        })
    }

    /// 跳转; 位置超出已处理帧数时不做任何改变并返回 None
    pub fn seek(&mut self, position: usize) -> Option<PlaybackView> {
        let view = self.view(position)?;
        self.state.index = position;
        self.full_pass = position == 0 && self.complete;
        Some(view)
    }

    /// 当前位置的画面
    pub fn current(&self) -> Option<PlaybackView> {
        self.view(self.state.index)
    }

    /// 定时器回调: 显示当前帧并前进一帧
    ///
    /// 到达末尾时循环模式回到 0; 非循环模式在运行结束后停在最后一帧并暂停,
    /// 运行中则等待后续帧 (返回 None, 不暂停).
    pub fn tick(&mut self) -> Option<PlaybackView> {
        if !self.state.playing || self.frames.is_empty() {
            return None;
        }
        if self.state.index >= self.frames.len() {
            if self.complete {
                self.state.index = self.frames.len() - 1;
                self.pause();
            }
            return None;
        }

        let view = self.view(self.state.index)?;
        let next = self.state.index + 1;
        if next < self.frames.len() {
            self.state.index = next;
        } else if self.state.looping {
            self.state.index = 0;
            if self.full_pass {
                self.loops_completed += 1;
            }
            self.full_pass = self.complete;
        } else if self.complete {
            self.pause();
        } else {
            self.state.index = next;
        }
        Some(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{Detection, Geometry};
    use chrono::Local;
    use image::Rgba;

    fn result(index: usize, factor: u32, detections: usize) -> Arc<FrameResult> {
        let det = Detection::new(
            Geometry::Aabb { x1: 0.0, y1: 0.0, x2: 1.0, y2: 1.0 },
            0,
            "person",
            0.5,
        );
        Arc::new(FrameResult {
            index,
            native_index: index as u64 * factor as u64,
            image: Arc::new(RgbaImage::new(2, 2)),
            detections: vec![det; detections],
            completed_at: Local::now(),
            inference_ms: 1.0,
        })
    }

    fn originals(count: u8) -> OriginalTrack {
        let frames = (0..count)
            .map(|i| RgbaImage::from_pixel(1, 1, Rgba([i, 0, 0, 255])))
            .collect();
        OriginalTrack::from_frames(frames, 30.0)
    }

    fn filled(len: usize, looping: bool) -> PlaybackBuffer {
        let mut buffer = PlaybackBuffer::new(looping);
        buffer.reset(SampleFactor::new(3));
        buffer.set_originals(originals(100));
        for i in 0..len {
            buffer.append(result(i, 3, i % 2));
        }
        buffer
    }

    #[test]
    fn test_phase_transitions() {
        let mut buffer = PlaybackBuffer::new(true);
        assert_eq!(buffer.phase(), Phase::Idle);
        assert!(!buffer.play());

        buffer.append(result(0, 1, 0));
        assert_eq!(buffer.phase(), Phase::Loaded);
        assert!(buffer.play());
        assert_eq!(buffer.phase(), Phase::Playing);
        buffer.pause();
        assert_eq!(buffer.phase(), Phase::Paused);
        assert!(buffer.toggle());
        assert_eq!(buffer.phase(), Phase::Playing);

        buffer.reset(SampleFactor::ONE);
        assert_eq!(buffer.phase(), Phase::Idle);
        assert!(buffer.is_empty());
        assert!(buffer.state().looping);
    }

    #[test]
    fn test_seek_pairs_original_frame() {
        let mut buffer = filled(34, true);
        let view = buffer.seek(5).unwrap();
        assert_eq!(view.original_index, 15);
        assert_eq!(view.original.unwrap().get_pixel(0, 0)[0], 15);
        assert_eq!(view.detection_count, 1);
        assert_eq!(buffer.state().index, 5);
    }

    #[test]
    fn test_seek_beyond_len_is_noop() {
        let mut buffer = filled(10, true);
        buffer.seek(4);
        let before = buffer.state();
        assert!(buffer.seek(10).is_none());
        assert!(buffer.seek(usize::MAX).is_none());
        assert_eq!(buffer.state(), before);
    }

    #[test]
    fn test_original_index_clamped() {
        let mut buffer = filled(34, true);
        // 34 * 3 = 102 超出 100 帧原始轨道
        buffer.append(result(34, 3, 0));
        assert_eq!(buffer.original_index(33), 99);
        assert_eq!(buffer.seek(34).unwrap().original_index, 99);
    }

    #[test]
    fn test_original_index_monotonic() {
        let buffer = filled(34, true);
        let indices: Vec<u64> = (0..34).map(|i| buffer.original_index(i)).collect();
        assert!(indices.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_tick_requires_playing() {
        let mut buffer = filled(3, true);
        assert!(buffer.tick().is_none());
        buffer.play();
        assert_eq!(buffer.tick().unwrap().position, 0);
    }

    #[test]
    fn test_tick_wraps_to_zero() {
        let mut buffer = filled(3, true);
        buffer.mark_complete();
        buffer.play();
        let positions: Vec<usize> = (0..7).map(|_| buffer.tick().unwrap().position).collect();
        assert_eq!(positions, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(buffer.loops_completed(), 2);
    }

    #[test]
    fn test_tick_without_loop_pauses_at_end() {
        let mut buffer = filled(2, false);
        buffer.mark_complete();
        buffer.play();
        assert_eq!(buffer.tick().unwrap().position, 0);
        assert_eq!(buffer.tick().unwrap().position, 1);
        assert!(buffer.tick().is_none());
        assert_eq!(buffer.phase(), Phase::Paused);
        assert_eq!(buffer.state().index, 1);
    }

    #[test]
    fn test_tick_sees_frames_appended_while_playing() {
        let mut buffer = filled(2, true);
        buffer.play();
        buffer.tick();
        buffer.append(result(2, 3, 0));
        assert_eq!(buffer.tick().unwrap().position, 1);
        assert_eq!(buffer.tick().unwrap().position, 2);
    }

    #[test]
    fn test_without_originals() {
        let mut buffer = PlaybackBuffer::new(true);
        buffer.reset(SampleFactor::new(2));
        buffer.append(result(0, 2, 0));
        buffer.append(result(1, 2, 0));
        let view = buffer.seek(1).unwrap();
        assert_eq!(view.original_index, 2);
        assert!(view.original.is_none());
    }

    #[test]
    fn test_loops_not_counted_while_run_is_live() {
        let mut buffer = filled(2, true);
        buffer.play();
        let positions: Vec<usize> = (0..3).map(|_| buffer.tick().unwrap().position).collect();
        assert_eq!(positions, vec![0, 1, 0]);
        assert_eq!(buffer.loops_completed(), 0);

        // 运行结束时正处于一圈中间: 这一圈不计
        buffer.append(result(2, 3, 0));
        buffer.mark_complete();
        for _ in 0..2 {
            buffer.tick();
        }
        assert_eq!(buffer.loops_completed(), 0);
        for _ in 0..3 {
            buffer.tick();
        }
        assert_eq!(buffer.loops_completed(), 1);
    }

    #[test]
    fn test_no_loop_waits_for_frames_while_live() {
        let mut buffer = filled(1, false);
        buffer.play();
        assert_eq!(buffer.tick().unwrap().position, 0);
        assert!(buffer.tick().is_none());
        assert_eq!(buffer.phase(), Phase::Playing);

        for i in 1..5 {
            buffer.append(result(i, 3, 0));
        }
        let positions: Vec<Option<usize>> =
            (0..4).map(|_| buffer.tick().map(|v| v.position)).collect();
        assert_eq!(positions, vec![Some(1), Some(2), Some(3), Some(4)]);

        buffer.mark_complete();
        assert_eq!(buffer.phase(), Phase::Paused);
        assert_eq!(buffer.state().index, 4);
        assert!(buffer.tick().is_none());
    }
}
