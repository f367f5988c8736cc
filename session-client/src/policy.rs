//! 重连策略

use std::fmt::Debug;
use std::time::Duration;

/// 重连策略：决定最大尝试次数和每次尝试前的等待时间
pub trait ReconnectPolicy: Debug + Send + Sync {
    /// 最大重连次数
    fn max_attempts(&self) -> u32;

    /// 第 `attempt` 次重连前的等待时间（从 1 开始）
    fn delay(&self, attempt: u32) -> Duration;
}

/// 固定间隔重连
#[derive(Debug, Clone)]
pub struct FixedInterval {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl FixedInterval {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

impl Default for FixedInterval {
    fn default() -> Self {
        Self::new(Duration::from_millis(5000), 10)
    }
}

impl ReconnectPolicy for FixedInterval {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, _attempt: u32) -> Duration {
        self.interval
    }
}

/// 指数退避（每次翻倍，封顶 `max_delay`）
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy for ExponentialBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}
