//! 互斥锁保护的共享计数器
//!
//! 两个相同的任务反复执行: 非阻塞占锁 → 读出副本 → 持锁随机延时 → 写回 +1 → 打印 → 释放。
//! 延时放大了读-改-写窗口，没有锁时会丢失更新。

use core::fmt::Write;

use embassy_futures::yield_now;
use embedded_hal_async::delay::DelayNs;

use crate::config::{COUNTER_JITTER_MAX_MS, COUNTER_JITTER_MIN_MS};
use crate::error::{CoordError, CoordResult};
use crate::sync::MutualExclusionLock;
use crate::tasks::task::TaskHandle;
use crate::util::log::*;

/// 线性同余伪随机数 (持锁延时抖动)
#[derive(Debug, Clone, Copy)]
pub struct Jitter {
    state: u32,
}

impl Jitter {
    /// 以 `seed` 初始化
    pub const fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// 下一个 `[min, max)` 内的值
    pub fn next_in(&mut self, min: u32, max: u32) -> u32 {
        self.state = self.state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let span = max.saturating_sub(min).max(1);
        min + (self.state >> 16) % span
    }
}

/// 计数器任务
pub struct Counter<'a, D, W> {
    shared: &'a MutualExclusionLock<u32>,
    delay: D,
    console: W,
    jitter: Jitter,
}

impl<'a, D, W> Counter<'a, D, W>
where
    D: DelayNs,
    W: Write,
{
    /// 创建
    pub fn new(shared: &'a MutualExclusionLock<u32>, delay: D, console: W, seed: u32) -> Self {
        Self {
            shared,
            delay,
            console,
            jitter: Jitter::new(seed),
        }
    }

    /// 尝试一次递增
    ///
    /// 锁被占用时立即返回 `Timeout`，成功时返回写回后的值
    pub async fn increment(&mut self, task: &TaskHandle<'_>) -> CoordResult<u32> {
        let mut guard = self.shared.try_acquire(task.id())?;

        let mut local = *guard;
        local += 1;
        let pause = self.jitter.next_in(COUNTER_JITTER_MIN_MS, COUNTER_JITTER_MAX_MS);
        task.suspend(self.delay.delay_ms(pause)).await;
        *guard = local;

        let _ = writeln!(self.console, "{}", local);
        Ok(local)
    }

    /// 任务主循环
    pub async fn run(mut self, task: TaskHandle<'_>) -> ! {
        if let Err(e) = task.start() {
            task.halt(e).await
        }
        task.signal_ready();
        log_info!("counter task '{}' running", task.name());
        loop {
            match self.increment(&task).await {
                Ok(_) => {}
                // 让另一个任务有机会释放锁
                Err(CoordError::Timeout) => yield_now().await,
                Err(e) => task.halt(e).await,
            }
        }
    }
}
