//! 抽帧策略 (Sampling Policy)
//!
//! 原生帧序号 → 处理帧序号 的确定性映射:
//! 每 `SampleFactor` 个原生帧处理 1 帧, 处理帧 `k` 对应原生帧 `k * factor`.

use serde::{Deserialize, Serialize};

/// 抽帧因子 (>= 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SampleFactor(u32);

impl SampleFactor {
    /// 每帧都处理
    pub const ONE: SampleFactor = SampleFactor(1);

    /// `round(native_rate / target_rate)`, 下限为 1
    ///
    /// 目标帧率高于原生帧率时不做插帧, 因子固定为 1.
    /// 原生帧率未知(<= 0 或非有限值)时返回 `None`, 由调用方降级为 1.
    pub fn from_rates(native_rate: f64, target_rate: f64) -> Option<Self> {
        if !native_rate.is_finite() || native_rate <= 0.0 {
            return None;
        }
        if !target_rate.is_finite() || target_rate <= 0.0 || target_rate >= native_rate {
            return Some(Self::ONE);
        }
        let factor = (native_rate / target_rate).round();
        Some(Self(factor.clamp(1.0, u32::MAX as f64) as u32))
    }

    /// 原生帧率未知时降级为每帧处理, 并记录日志
    pub fn resolve(native_rate: f64, target_rate: f64) -> Self {
        match Self::from_rates(native_rate, target_rate) {
            Some(factor) => factor,
            None => {
                log::warn!(
                    "⚠️ 原生帧率未知 ({:.2}), 降级为逐帧处理 (SampleFactor=1)",
                    native_rate
                );
                Self::ONE
            }
        }
    }

    pub fn new(factor: u32) -> Self {
        Self(factor.max(1))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// 该原生帧是否需要处理
    pub fn should_sample(self, native_index: u64) -> bool {
        native_index % self.0 as u64 == 0
    }

    /// 处理帧序号对应的原生帧序号
    pub fn native_index(self, processed_index: usize) -> u64 {
        processed_index as u64 * self.0 as u64
    }

    /// 预计处理帧数: `ceil(native_frame_count / factor)`
    pub fn expected_count(self, native_frame_count: u64) -> u64 {
        native_frame_count.div_ceil(self.0 as u64)
    }
}

impl Default for SampleFactor {
    fn default() -> Self {
        Self::ONE
    }
}

impl std::fmt::Display for SampleFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 自由函数形式: `native_index % factor == 0`
pub fn should_sample(native_index: u64, factor: SampleFactor) -> bool {
    factor.should_sample(native_index)
}

/// 处理进度百分比 (0-100), 预计帧数未知时为 0
pub fn percent(processed: u64, expected: u64) -> u8 {
    if expected == 0 {
        return 0;
    }
    ((processed.min(expected) * 100) / expected) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factor_from_rates() {
        assert_eq!(SampleFactor::from_rates(30.0, 10.0), Some(SampleFactor(3)));
        assert_eq!(SampleFactor::from_rates(30.0, 25.0), Some(SampleFactor(1)));
        assert_eq!(SampleFactor::from_rates(60.0, 25.0), Some(SampleFactor(2)));
        assert_eq!(SampleFactor::from_rates(29.97, 10.0), Some(SampleFactor(3)));
        assert_eq!(SampleFactor::from_rates(25.0, 10.0), Some(SampleFactor(3)));
    }

    #[test]
    fn test_factor_never_upsamples() {
        for target in [31.0, 60.0, 120.0, 1000.0] {
            assert_eq!(SampleFactor::from_rates(30.0, target), Some(SampleFactor::ONE));
        }
        for target in 1..=30 {
            let factor = SampleFactor::from_rates(30.0, target as f64).unwrap();
            assert!(factor.get() >= 1);
        }
    }

    #[test]
    fn test_unknown_native_rate_degrades() {
        assert_eq!(SampleFactor::from_rates(0.0, 10.0), None);
        assert_eq!(SampleFactor::from_rates(f64::NAN, 10.0), None);
        assert_eq!(SampleFactor::resolve(0.0, 10.0), SampleFactor::ONE);
    }

    #[test]
    fn test_scenario_100_frames_30fps_target_10() {
        let factor = SampleFactor::resolve(30.0, 10.0);
        assert_eq!(factor.get(), 3);
        assert_eq!(factor.expected_count(100), 34);
        assert_eq!(factor.native_index(5), 15);

        let sampled = (0..100u64).filter(|&i| should_sample(i, factor)).count();
        assert_eq!(sampled as u64, factor.expected_count(100));
    }

    #[test]
    fn test_native_index_monotonic() {
        let factor = SampleFactor::new(4);
        let mapped: Vec<u64> = (0..10).map(|i| factor.native_index(i)).collect();
        assert!(mapped.windows(2).all(|w| w[0] <= w[1]));
        assert!(mapped.iter().all(|&n| factor.should_sample(n)));
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 34), 0);
        assert_eq!(percent(17, 34), 50);
        assert_eq!(percent(34, 34), 100);
        assert_eq!(percent(5, 0), 0);
    }
}
