//! 速率限制器 - 业务能力层
//!
//! 保证任意两次放行之间至少间隔 `60 / max_per_minute` 秒，所有并发任务共享一个实例。
//! 锁在等待期间一直持有，后来者按 FIFO 顺序排队，没有突发额度。

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub struct RateLimiter {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// `max_per_minute == 0` 表示不限速
    pub fn new(max_per_minute: u32) -> Self {
        let interval = if max_per_minute == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(60.0 / f64::from(max_per_minute))
        };
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// 等待放行，并记录本次放行时间
    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;

        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.interval {
                let wait = self.interval - elapsed;
                debug!("速率限制: 等待 {:?}", wait);
                tokio::time::sleep(wait).await;
            }
        }

        *last = Some(Instant::now());
    }
}
