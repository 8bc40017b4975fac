//! 延迟中断锁存器
//!
//! 把异步的硬件事件桥接到任务模型，ISR 内永不阻塞:
//! 1. ISR 在 ISR 侧临界区内记录采样值、累加待处理计数
//! 2. ISR 以 from-ISR 方式释放一次二值信号量
//! 3. 若唤醒了挂起的任务，ISR 退出时让出 CPU
//!
//! 任务读取/修改锁存状态时必须使用任务侧临界区 (屏蔽中断)，
//! 因为 ISR 可以在任意指令边界抢占它。

use portable_atomic::{AtomicU32, Ordering};

use crate::error::CoordResult;
use crate::sync::critical::IsrSpinlock;
use crate::sync::semaphore::CountingSemaphore;
use crate::sync::wait::Wait;

/// ISR 一次触发的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsrOutcome {
    /// 本次触发后的待处理计数
    pub pending: u32,
    /// 是否唤醒了等待中的任务 (ISR 退出前应让出 CPU)
    pub task_woken: bool,
}

/// 中断锁存器
pub struct InterruptLatch {
    lock: IsrSpinlock,
    /// 尚未被任务消费的触发次数
    pending: AtomicU32,
    /// 最近一次采样值
    sample: AtomicU32,
    /// 累计触发次数 (只增不减)
    fired: AtomicU32,
    ready: CountingSemaphore,
}

impl InterruptLatch {
    /// 创建空锁存器
    pub const fn new() -> Self {
        Self {
            lock: IsrSpinlock::new(),
            pending: AtomicU32::new(0),
            sample: AtomicU32::new(0),
            fired: AtomicU32::new(0),
            ready: CountingSemaphore::binary(),
        }
    }

    // ===== ISR 侧 =====

    /// 中断处理入口
    ///
    /// 只做短小的非阻塞操作，然后恰好一次 from-ISR 信号
    #[inline]
    pub fn on_interrupt(&self, sample: u32) -> IsrOutcome {
        let pending = self.lock.with_from_isr(|| {
            self.sample.store(sample, Ordering::Relaxed);
            let pending = self.pending.load(Ordering::Relaxed).saturating_add(1);
            self.pending.store(pending, Ordering::Relaxed);
            pending
        });
        self.fired.fetch_add(1, Ordering::Relaxed);

        IsrOutcome {
            pending,
            task_woken: self.ready.release_from_isr(),
        }
    }

    // ===== 任务侧 =====

    /// 等待下一次中断信号，返回最近的采样值
    ///
    /// 多次触发合并为一次信号，采样值总是最新的
    pub async fn wait_sample(&self, wait: Wait) -> CoordResult<u32> {
        self.ready.acquire(wait).await?;
        Ok(self.latest_sample())
    }

    /// 最近一次采样值
    pub fn latest_sample(&self) -> u32 {
        self.lock.with(|| self.sample.load(Ordering::Relaxed))
    }

    /// 当前待处理计数
    pub fn pending(&self) -> u32 {
        self.lock.with(|| self.pending.load(Ordering::Relaxed))
    }

    /// 消费一次触发
    ///
    /// 返回消费前的计数; 计数为 0 时返回 `None`
    pub fn take_one(&self) -> Option<u32> {
        self.lock.with(|| {
            let pending = self.pending.load(Ordering::Relaxed);
            if pending == 0 {
                None
            } else {
                self.pending.store(pending - 1, Ordering::Relaxed);
                Some(pending)
            }
        })
    }

    /// 逐个消费直到计数归零，对每个消费前的计数调用 `f`
    ///
    /// 临界区只覆盖单次递减，`f` 在临界区外执行; ISR 在此期间新增的触发也会被消费
    pub fn drain(&self, mut f: impl FnMut(u32)) -> u32 {
        let mut drained = 0;
        while let Some(count) = self.take_one() {
            f(count);
            drained += 1;
        }
        drained
    }

    /// 累计触发次数
    pub fn fired(&self) -> u32 {
        self.fired.load(Ordering::Relaxed)
    }
}

impl Default for InterruptLatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use embassy_time::Timer;

    #[test]
    fn test_k_firings_latch_exactly_k() {
        let latch = InterruptLatch::new();
        for i in 0..7 {
            latch.on_interrupt(i);
        }
        assert_eq!(latch.pending(), 7);

        let mut seen = heapless::Vec::<u32, 8>::new();
        let drained = latch.drain(|n| seen.push(n).unwrap());

        assert_eq!(drained, 7);
        assert_eq!(seen.as_slice(), &[7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(latch.pending(), 0);
        assert_eq!(latch.take_one(), None);
        assert_eq!(latch.fired(), 7);
    }

    #[test]
    fn test_no_double_counting_with_concurrent_isr() {
        static LATCH: InterruptLatch = InterruptLatch::new();
        const FIRINGS: u32 = 500;

        let isr = std::thread::spawn(|| {
            for i in 0..FIRINGS {
                LATCH.on_interrupt(i);
                if i % 50 == 0 {
                    std::thread::yield_now();
                }
            }
        });

        let mut consumed = 0u32;
        while !isr.is_finished() {
            consumed += LATCH.drain(|_| {});
        }
        isr.join().unwrap();
        consumed += LATCH.drain(|_| {});

        assert_eq!(consumed, FIRINGS);
        assert_eq!(LATCH.pending(), 0);
    }

    #[test]
    fn test_wait_sample_is_woken_by_isr() {
        let latch = InterruptLatch::new();

        let (sample, outcome) = block_on(join(latch.wait_sample(Wait::Forever), async {
            Timer::after_millis(5).await;
            latch.on_interrupt(1234)
        }));

        assert_eq!(sample, Ok(1234));
        assert!(outcome.task_woken);
        assert_eq!(outcome.pending, 1);
    }

    #[test]
    fn test_wait_sample_times_out_without_interrupt() {
        let latch = InterruptLatch::new();
        assert!(block_on(latch.wait_sample(Wait::millis(5))).is_err());
    }
}
