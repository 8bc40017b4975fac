//! 整数队列演示
//!
//! 生产者每 `PRODUCER_PERIOD` 发送一个递增整数 (最多等待 `SEND_TIMEOUT_MS`，
//! 失败打印 `Queue full`); 消费者每 `CONSUMER_PERIOD` 非阻塞地取一个并打印。

use core::fmt::Write;

use embassy_time::Timer;

use crate::config::{CONSUMER_PERIOD, PRODUCER_PERIOD, SEND_TIMEOUT_MS};
use crate::error::{CoordError, CoordResult};
use crate::message::NumberChannel;
use crate::sync::Wait;
use crate::tasks::task::TaskHandle;
use crate::util::log::*;

/// 发送一个数，队列满时打印 `Queue full`
pub async fn produce_one<W: Write>(
    numbers: &NumberChannel,
    value: u32,
    console: &mut W,
    task: &TaskHandle<'_>,
) -> CoordResult<()> {
    let sent = task
        .suspend(numbers.send(value, Wait::millis(SEND_TIMEOUT_MS)))
        .await;
    if let Err(CoordError::Full) = sent {
        let _ = writeln!(console, "Queue full");
    }
    sent
}

/// 非阻塞地取一个数并打印
pub fn consume_one<W: Write>(numbers: &NumberChannel, console: &mut W) -> Option<u32> {
    let value = numbers.try_receive()?;
    let _ = writeln!(console, "Received: {}", value);
    Some(value)
}

/// 生产者任务
pub async fn producer<W: Write>(numbers: &NumberChannel, mut console: W, task: TaskHandle<'_>) -> ! {
    if let Err(e) = task.start() {
        task.halt(e).await
    }
    task.signal_ready();
    let mut next: u32 = 0;
    loop {
        if let Err(e) = produce_one(numbers, next, &mut console, &task).await {
            log_skipped!("number", e);
        }
        next = next.wrapping_add(1);
        task.suspend(Timer::after(PRODUCER_PERIOD)).await;
    }
}

/// 消费者任务
pub async fn consumer<W: Write>(numbers: &NumberChannel, mut console: W, task: TaskHandle<'_>) -> ! {
    if let Err(e) = task.start() {
        task.halt(e).await
    }
    task.signal_ready();
    loop {
        consume_one(numbers, &mut console);
        task.suspend(Timer::after(CONSUMER_PERIOD)).await;
    }
}
