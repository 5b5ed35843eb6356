//! 处理速率上报
//!
//! 工作线程只递增一个原子计数器; 上报线程按固定间隔采样,
//! 在滑动时间窗口内计算 帧/秒, 与推理快慢无关.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick, Sender};

use super::PipelineEvent;

/// 滑动窗口: (采样时刻, 累计帧数)
#[derive(Debug)]
pub struct RateWindow {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl RateWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// 记录一次采样, 返回窗口内的平均速率 (样本不足时为 None)
    pub fn push(&mut self, at: Instant, count: u64) -> Option<f64> {
        self.samples.push_back((at, count));
        while let Some(&(oldest, _)) = self.samples.front() {
            if self.samples.len() > 2 && at.duration_since(oldest) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        let (first_at, first_count) = *self.samples.front()?;
        let elapsed = at.duration_since(first_at).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        Some(count.saturating_sub(first_count) as f64 / elapsed)
    }
}

/// 速率上报线程
pub struct RateReporter {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl RateReporter {
    pub fn spawn(
        counter: Arc<AtomicU64>,
        events: Sender<PipelineEvent>,
        interval: Duration,
        window: Duration,
    ) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let interval = interval.max(Duration::from_millis(10));

        let handle = std::thread::Builder::new()
            .name("rate-reporter".into())
            .spawn(move || {
                let ticker = tick(interval);
                let mut rates = RateWindow::new(window);
                rates.push(Instant::now(), counter.load(Ordering::Acquire));
                loop {
                    select! {
                        recv(ticker) -> at => {
                            let Ok(at) = at else { break };
                            if let Some(fps) = rates.push(at, counter.load(Ordering::Acquire)) {
                                if events.send(PipelineEvent::Rate(fps)).is_err() {
                                    break;
                                }
                            }
                        }
                        recv(stop_rx) -> _ => break,
                    }
                }
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::warn!("⚠️ 速率上报线程启动失败: {}", e);
                None
            }
        };

        Self { stop_tx, handle }
    }

    /// 停止并等待线程退出, 之后不会再有速率事件
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("❌ 速率上报线程异常退出");
            }
        }
    }
}

impl Drop for RateReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_window_rate() {
        let start = Instant::now();
        let mut window = RateWindow::new(Duration::from_secs(2));
        assert_eq!(window.push(start, 0), None);
        let fps = window.push(start + Duration::from_millis(500), 5).unwrap();
        assert!((fps - 10.0).abs() < 1e-6);
        let fps = window.push(start + Duration::from_secs(1), 20).unwrap();
        assert!((fps - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_window_drops_old_samples() {
        let start = Instant::now();
        let mut window = RateWindow::new(Duration::from_secs(1));
        window.push(start, 0);
        window.push(start + Duration::from_millis(500), 100);
        window.push(start + Duration::from_millis(1000), 100);
        window.push(start + Duration::from_millis(1500), 100);
        // 突发已移出窗口
        let fps = window.push(start + Duration::from_millis(2600), 100).unwrap();
        assert_eq!(fps, 0.0);
    }

    #[test]
    fn test_reporter_emits_and_stops() {
        let counter = Arc::new(AtomicU64::new(0));
        let (tx, rx) = unbounded();
        let reporter = RateReporter::spawn(
            counter.clone(),
            tx,
            Duration::from_millis(20),
            Duration::from_millis(200),
        );
        for _ in 0..10 {
            counter.fetch_add(1, Ordering::Release);
            std::thread::sleep(Duration::from_millis(10));
        }
        reporter.stop();

        let rates: Vec<_> = rx.try_iter().collect();
        assert!(!rates.is_empty());
        assert!(rates.iter().all(|e| matches!(e, PipelineEvent::Rate(fps) if *fps >= 0.0)));
        // 停止后发送端已释放
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }
}
