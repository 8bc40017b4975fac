//! 阻塞等待策略
//!
//! 每个可能挂起的调用都显式接收一个 [`Wait`]，让挂起点和它的上限出现在 API 上，
//! 取代 `while (!available);` 式的忙等

use core::future::Future;

use embassy_time::{with_timeout, Duration};

/// 等待上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum Wait {
    /// 不等待: 立即返回
    NoWait,
    /// 最多等待指定时长
    For(Duration),
    /// 无限等待
    Forever,
}

impl Wait {
    /// 最多等待 `ms` 毫秒 (0 等同于 `NoWait`)
    #[inline]
    pub const fn millis(ms: u64) -> Self {
        if ms == 0 {
            Wait::NoWait
        } else {
            Wait::For(Duration::from_millis(ms))
        }
    }

    /// 是否为非阻塞调用
    #[inline]
    pub fn is_no_wait(&self) -> bool {
        match self {
            Wait::NoWait => true,
            Wait::For(d) => d.as_ticks() == 0,
            Wait::Forever => false,
        }
    }

    /// 在等待上限内驱动 `fut`
    ///
    /// 超时返回 `None`; 超时后 `fut` 被丢弃，因此它必须是可取消的
    pub(crate) async fn bound<F: Future>(self, fut: F) -> Option<F::Output> {
        match self {
            Wait::NoWait => None,
            Wait::For(limit) => with_timeout(limit, fut).await.ok(),
            Wait::Forever => Some(fut.await),
        }
    }
}

impl From<Duration> for Wait {
    fn from(limit: Duration) -> Self {
        Wait::For(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_millis_is_no_wait() {
        assert_eq!(Wait::millis(0), Wait::NoWait);
        assert!(Wait::For(Duration::from_ticks(0)).is_no_wait());
        assert!(!Wait::millis(10).is_no_wait());
        assert!(!Wait::Forever.is_no_wait());
    }

    #[test]
    fn test_bound_times_out_on_pending_future() {
        let out = embassy_futures::block_on(Wait::millis(5).bound(core::future::pending::<()>()));
        assert_eq!(out, None);

        let out = embassy_futures::block_on(Wait::Forever.bound(async { 7 }));
        assert_eq!(out, Some(7));
    }
}
