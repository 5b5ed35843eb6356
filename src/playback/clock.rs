//! 回放时钟: 周期 = 1000ms / 回放帧率

use std::time::{Duration, Instant};

use crossbeam_channel::{tick, Receiver};

/// 协作式回放时钟, 由消费者循环轮询
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    rate: f64,
    period: Duration,
    next_due: Option<Instant>,
}

impl PlaybackClock {
    pub const MIN_RATE: f64 = 0.1;

    pub fn new(rate: f64) -> Self {
        let rate = Self::sanitize(rate);
        Self {
            rate,
            period: Self::period_for(rate),
            next_due: None,
        }
    }

    fn sanitize(rate: f64) -> f64 {
        if rate.is_finite() {
            rate.max(Self::MIN_RATE)
        } else {
            Self::MIN_RATE
        }
    }

    pub fn period_for(rate: f64) -> Duration {
        Duration::from_nanos((1e9 / Self::sanitize(rate)).round() as u64)
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// 修改回放帧率: 只重新设定周期, 不影响回放位置
    pub fn set_rate(&mut self, rate: f64, now: Instant) {
        self.rate = Self::sanitize(rate);
        self.period = Self::period_for(self.rate);
        if self.next_due.is_some() {
            self.next_due = Some(now + self.period);
        }
        log::debug!("⏱️ 回放帧率: {:.1}fps ({}ms)", self.rate, self.period.as_millis());
    }

    /// 启动时钟, 第一拍立即到期
    pub fn start(&mut self, now: Instant) {
        self.next_due = Some(now);
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_due.is_some()
    }

    /// 到期返回 true 并安排下一拍; 落后多拍时只补一拍
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                let next = due + self.period;
                self.next_due = Some(if next <= now { now + self.period } else { next });
                true
            }
            _ => false,
        }
    }

    /// 按当前周期的 crossbeam 定时通道 (帧率变化后需重新获取)
    pub fn ticker(&self) -> Receiver<Instant> {
        tick(self.period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_from_rate() {
        assert_eq!(PlaybackClock::new(10.0).period(), Duration::from_millis(100));
        assert_eq!(PlaybackClock::new(25.0).period(), Duration::from_millis(40));
        assert_eq!(PlaybackClock::new(0.0).rate(), PlaybackClock::MIN_RATE);
    }

    #[test]
    fn test_poll_schedule() {
        let start = Instant::now();
        let mut clock = PlaybackClock::new(10.0);
        assert!(!clock.poll(start));
        clock.start(start);
        assert!(clock.poll(start));
        assert!(!clock.poll(start + Duration::from_millis(50)));
        assert!(clock.poll(start + Duration::from_millis(100)));
        // 落后多拍只补一拍
        assert!(clock.poll(start + Duration::from_millis(1000)));
        assert!(!clock.poll(start + Duration::from_millis(1050)));
    }

    #[test]
    fn test_set_rate_rearms_period() {
        let start = Instant::now();
        let mut clock = PlaybackClock::new(10.0);
        clock.start(start);
        clock.poll(start);
        clock.set_rate(20.0, start + Duration::from_millis(10));
        assert_eq!(clock.period(), Duration::from_millis(50));
        assert!(!clock.poll(start + Duration::from_millis(40)));
        assert!(clock.poll(start + Duration::from_millis(60)));
    }
}
