//! 有界 FIFO 消息通道
//!
//! 基于 embassy-sync `Channel` (统一使用 `CriticalSectionRawMutex`)，
//! 在其上加入显式的 [`Wait`] 超时策略:
//! - 队列满时发送方等待空位或返回 `Full`
//! - 队列空时接收方等待数据或返回 `Empty`
//!
//! 消息按值移动进出队列，入队/出队在临界区内互斥执行，
//! 不存在半拷贝交错的情况。容量在编译期确定，之后不会改变。

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};

use crate::error::{CoordError, CoordResult};
use crate::sync::wait::Wait;

/// 有界 MPMC 通道
///
/// # Type Parameters
/// * `T` - 消息类型 (按值移动)
/// * `N` - 队列容量 (>= 1)
///
/// # Example
/// ```ignore
/// static RATES: BoundedChannel<u32, 5> = BoundedChannel::new();
///
/// // 发送方: 最多等 10ms，失败则丢弃
/// if RATES.send(250, Wait::millis(10)).await.is_err() {
///     log_warn!("rate dropped");
/// }
///
/// // 接收方: 不阻塞主循环
/// if let Some(rate) = RATES.try_receive() { /* ... */ }
/// ```
pub struct BoundedChannel<T, const N: usize> {
    inner: Channel<CriticalSectionRawMutex, T, N>,
}

impl<T, const N: usize> BoundedChannel<T, N> {
    /// 创建空通道
    pub const fn new() -> Self {
        assert!(N > 0, "channel capacity must be at least 1");
        Self {
            inner: Channel::new(),
        }
    }

    /// 发送消息
    ///
    /// 有空位时立即入队; 队列满时按 `wait` 等待空位。
    /// 等待超时返回 `Full`，此时消息被丢弃。
    pub async fn send(&self, item: T, wait: Wait) -> CoordResult<()> {
        let item = match self.inner.try_send(item) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(item)) => item,
        };

        if wait.is_no_wait() {
            return Err(CoordError::Full);
        }

        wait.bound(self.inner.send(item))
            .await
            .ok_or(CoordError::Full)
    }

    /// 非阻塞发送，可在中断上下文中调用
    ///
    /// 队列满时把消息原样退回
    #[inline]
    pub fn try_send(&self, item: T) -> Result<(), T> {
        self.inner.try_send(item).map_err(|TrySendError::Full(item)| item)
    }

    /// 接收最早入队的消息
    ///
    /// 队列空时按 `wait` 等待，超时返回 `Empty`
    pub async fn receive(&self, wait: Wait) -> CoordResult<T> {
        if let Some(item) = self.try_receive() {
            return Ok(item);
        }

        if wait.is_no_wait() {
            return Err(CoordError::Empty);
        }

        wait.bound(self.inner.receive())
            .await
            .ok_or(CoordError::Empty)
    }

    /// 非阻塞接收，等价于 `receive(Wait::NoWait)`
    #[inline]
    pub fn try_receive(&self) -> Option<T> {
        self.inner.try_receive().ok()
    }

    /// 当前排队的消息数
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// 剩余空位
    #[inline]
    pub fn free_slots(&self) -> usize {
        N - self.inner.len()
    }

    /// 是否为空
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// 是否已满
    #[inline]
    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }

    /// 队列容量
    #[inline(always)]
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T, const N: usize> Default for BoundedChannel<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use embassy_time::{Duration, Instant, Timer};

    fn fill_then_full<const N: usize>() {
        let ch: BoundedChannel<u32, N> = BoundedChannel::new();

        for i in 0..N as u32 {
            assert!(block_on(ch.send(i, Wait::NoWait)).is_ok());
        }
        assert!(ch.is_full());
        assert_eq!(block_on(ch.send(99, Wait::NoWait)), Err(CoordError::Full));
        assert_eq!(ch.try_send(99), Err(99));

        assert_eq!(ch.try_receive(), Some(0));
        assert!(block_on(ch.send(100, Wait::NoWait)).is_ok());
        assert_eq!(ch.len(), N);
    }

    #[test]
    fn test_full_after_capacity_sends() {
        fill_then_full::<1>();
        fill_then_full::<2>();
        fill_then_full::<5>();
        fill_then_full::<16>();
    }

    #[test]
    fn test_fifo_with_interleaved_receives() {
        let ch: BoundedChannel<u32, 4> = BoundedChannel::new();
        let mut seen = heapless::Vec::<u32, 16>::new();

        for round in 0..4u32 {
            for k in 0..3 {
                ch.try_send(round * 10 + k).unwrap();
            }
            // 每轮只取两条，剩余的留到下一轮
            seen.push(ch.try_receive().unwrap()).unwrap();
            seen.push(ch.try_receive().unwrap()).unwrap();
            if round % 2 == 1 {
                while let Some(v) = ch.try_receive() {
                    seen.push(v).unwrap();
                }
            }
        }

        assert_eq!(
            seen.as_slice(),
            &[0, 1, 2, 10, 11, 12, 20, 21, 22, 30, 31, 32]
        );
        assert!(ch.is_empty());
    }

    #[test]
    fn test_receive_times_out_with_empty() {
        let ch: BoundedChannel<u8, 2> = BoundedChannel::new();
        assert_eq!(block_on(ch.receive(Wait::NoWait)), Err(CoordError::Empty));

        let start = Instant::now();
        assert_eq!(block_on(ch.receive(Wait::millis(20))), Err(CoordError::Empty));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_blocked_send_completes_when_space_opens() {
        let ch: BoundedChannel<u32, 1> = BoundedChannel::new();
        ch.try_send(1).unwrap();

        let (sent, first) = block_on(join(ch.send(2, Wait::millis(500)), async {
            Timer::after_millis(10).await;
            ch.try_receive()
        }));

        assert_eq!(sent, Ok(()));
        assert_eq!(first, Some(1));
        assert_eq!(ch.try_receive(), Some(2));
    }

    #[test]
    fn test_blocked_send_times_out_with_full() {
        let ch: BoundedChannel<u32, 1> = BoundedChannel::new();
        ch.try_send(1).unwrap();

        assert_eq!(block_on(ch.send(2, Wait::millis(10))), Err(CoordError::Full));
        // 超时的消息被丢弃，队列内容不变
        assert_eq!(ch.try_receive(), Some(1));
        assert!(ch.is_empty());
    }

    #[test]
    fn test_blocked_receive_wakes_on_send() {
        let ch: BoundedChannel<u32, 3> = BoundedChannel::new();

        let (got, _) = block_on(join(ch.receive(Wait::Forever), async {
            Timer::after_millis(5).await;
            ch.try_send(42).unwrap();
        }));

        assert_eq!(got, Ok(42));
    }
}
