//! 延迟中断消费者
//!
//! 中断处理只往 [`InterruptLatch`] 里记一笔，真正的处理在这里的任务中完成:
//! - 采样打印任务 (高优先级): 无限等待信号，打印最新采样值
//! - 计数消费任务: 每 `DRAIN_PERIOD` 醒来一次，逐个打印并递减待处理计数直到 0

use core::fmt::Write;

use embassy_time::Timer;
use portable_atomic::{AtomicU32, Ordering};

use crate::config::DRAIN_PERIOD;
use crate::error::CoordResult;
use crate::sync::{InterruptLatch, IsrOutcome, Wait};
use crate::tasks::task::TaskHandle;
use crate::util::log::*;

/// 模拟 ADC (12 位)
///
/// ISR 中调用，只用原子操作
pub struct SimulatedAdc {
    seed: AtomicU32,
}

impl SimulatedAdc {
    /// 以 `seed` 初始化
    pub const fn new(seed: u32) -> Self {
        Self {
            seed: AtomicU32::new(seed),
        }
    }

    /// 读取一次 (LCG)
    #[inline(always)]
    #[cfg_attr(feature = "board", esp_hal::ram)]
    pub fn read(&self) -> u32 {
        let current = self.seed.load(Ordering::Relaxed);
        let next = current.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        self.seed.store(next, Ordering::Relaxed);

        (next >> 16) & 0x0FFF
    }
}

/// 采样锁存器的中断处理: 读一次 ADC 并记入锁存器
#[inline]
pub fn sample_isr(latch: &InterruptLatch, adc: &SimulatedAdc) -> IsrOutcome {
    latch.on_interrupt(adc.read())
}

/// 计数锁存器的中断处理: 只计数
#[inline]
pub fn count_isr(latch: &InterruptLatch) -> IsrOutcome {
    latch.on_interrupt(0)
}

/// 等待下一次采样并打印
pub async fn print_next_sample<W: Write>(
    latch: &InterruptLatch,
    console: &mut W,
    task: &TaskHandle<'_>,
) -> CoordResult<u32> {
    let sample = task.suspend(latch.wait_sample(Wait::Forever)).await?;
    let _ = writeln!(console, "{}", sample);
    Ok(sample)
}

/// 采样打印任务
pub async fn sample_printer<W: Write>(latch: &InterruptLatch, mut console: W, task: TaskHandle<'_>) -> ! {
    if let Err(e) = task.start() {
        task.halt(e).await
    }
    task.signal_ready();
    log_info!("sample printer waiting for interrupts");
    loop {
        if let Err(e) = print_next_sample(latch, &mut console, &task).await {
            task.halt(e).await
        }
    }
}

/// 打印并消费全部待处理计数，返回本次消费的次数
pub fn drain_counts<W: Write>(latch: &InterruptLatch, console: &mut W) -> u32 {
    latch.drain(|count| {
        let _ = writeln!(console, "{}", count);
    })
}

/// 计数消费任务
pub async fn count_drainer<W: Write>(latch: &InterruptLatch, mut console: W, task: TaskHandle<'_>) -> ! {
    if let Err(e) = task.start() {
        task.halt(e).await
    }
    task.signal_ready();
    log_info!("counter drain every {} ms", DRAIN_PERIOD.as_millis());
    loop {
        let drained = drain_counts(latch, &mut console);
        log_trace!("drained {} interrupts, {} fired in total", drained, latch.fired());
        task.suspend(Timer::after(DRAIN_PERIOD)).await;
    }
}
