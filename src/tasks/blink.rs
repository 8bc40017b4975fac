//! LED 闪烁任务
//!
//! 每个周期开头非阻塞地查看一次新的半周期 (来自延时队列或共享变量)，
//! 然后亮半周期、灭半周期。新速率到达时回报 "Message received "，
//! 每闪烁 `BLINK_REPORT_EVERY` 次回报一次 "Blinked: "。
//!
//! 一个周期内不会响应新速率: 新值最迟在下一个周期生效。

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;

use crate::config::{BLINK_REPORT_EVERY, DEFAULT_DELAY_MS, SEND_TIMEOUT_MS};
use crate::error::CoordResult;
use crate::message::{Message, MessageChannel, RateChannel};
use crate::sync::{MutualExclusionLock, Wait};
use crate::tasks::task::{TaskHandle, TaskId};
use crate::util::log::*;

/// 半周期下限 (毫秒)，避免 0 延时占满执行器
pub const MIN_HALF_PERIOD_MS: u32 = 1;

/// 锁保护的共享半周期
///
/// 队列之外的另一种传递方式: 写方覆盖，读方每个周期读取一次
pub struct SharedDelayRate {
    rate: MutualExclusionLock<u32>,
}

impl SharedDelayRate {
    /// 创建，初始值为 `initial_ms`
    pub const fn new(initial_ms: u32) -> Self {
        Self {
            rate: MutualExclusionLock::new(initial_ms),
        }
    }

    /// 写入新值，占锁最多等待 `wait`
    pub async fn set(&self, owner: TaskId, rate_ms: u32, wait: Wait) -> CoordResult<()> {
        let mut guard = self.rate.acquire(owner, wait).await?;
        *guard = rate_ms;
        Ok(())
    }

    /// 非阻塞读取，锁被占用时返回 `Timeout`
    pub fn try_get(&self, owner: TaskId) -> CoordResult<u32> {
        self.rate.try_acquire(owner).map(|guard| *guard)
    }
}

impl Default for SharedDelayRate {
    fn default() -> Self {
        Self::new(DEFAULT_DELAY_MS)
    }
}

/// 半周期来源
pub trait RateSource {
    /// 收到新值时是否回报 "Message received "
    const ACKNOWLEDGE: bool;

    /// 非阻塞地取一次新值
    fn poll_rate(&self, owner: TaskId) -> Option<u32>;
}

impl RateSource for RateChannel {
    const ACKNOWLEDGE: bool = true;

    fn poll_rate(&self, _owner: TaskId) -> Option<u32> {
        self.try_receive()
    }
}

impl RateSource for SharedDelayRate {
    const ACKNOWLEDGE: bool = false;

    fn poll_rate(&self, owner: TaskId) -> Option<u32> {
        self.try_get(owner).ok()
    }
}

/// 闪烁任务状态
pub struct Blinker<'a, P, D, R> {
    led: P,
    delay: D,
    rates: &'a R,
    messages: Option<&'a MessageChannel>,
    half_period_ms: u32,
    blinks: u32,
}

impl<'a, P, D, R> Blinker<'a, P, D, R>
where
    P: OutputPin,
    D: DelayNs,
    R: RateSource,
{
    /// 创建，半周期为默认值
    pub fn new(led: P, delay: D, rates: &'a R) -> Self {
        Self {
            led,
            delay,
            rates,
            messages: None,
            half_period_ms: DEFAULT_DELAY_MS,
            blinks: 0,
        }
    }

    /// 设置回报队列
    pub fn with_messages(mut self, messages: &'a MessageChannel) -> Self {
        self.messages = Some(messages);
        self
    }

    /// 当前半周期 (毫秒)
    pub fn half_period_ms(&self) -> u32 {
        self.half_period_ms
    }

    /// 执行一个闪烁周期
    pub async fn cycle(&mut self, task: &TaskHandle<'_>) {
        if let Some(rate) = self.rates.poll_rate(task.id()) {
            if rate != self.half_period_ms {
                log_debug!("blink half-period {} -> {} ms", self.half_period_ms, rate);
            }
            self.half_period_ms = rate.max(MIN_HALF_PERIOD_MS);
            if R::ACKNOWLEDGE {
                self.report(task, Message::new("Message received ", 1)).await;
            }
        }

        if self.led.set_high().is_err() {
            log_warn!("led write failed");
        }
        task.suspend(self.delay.delay_ms(self.half_period_ms)).await;
        if self.led.set_low().is_err() {
            log_warn!("led write failed");
        }
        task.suspend(self.delay.delay_ms(self.half_period_ms)).await;

        self.blinks += 1;
        if self.blinks >= BLINK_REPORT_EVERY {
            self.report(task, Message::new("Blinked: ", self.blinks)).await;
            self.blinks = 0;
        }
    }

    /// 回报一条消息，队列满时等待 `SEND_TIMEOUT_MS` 后丢弃
    async fn report(&self, task: &TaskHandle<'_>, msg: Message) {
        let Some(messages) = self.messages else {
            return;
        };
        let sent = task
            .suspend(messages.send(msg, Wait::millis(SEND_TIMEOUT_MS)))
            .await;
        if let Err(e) = sent {
            log_skipped!("blink report", e);
        }
    }

    /// 任务主循环
    pub async fn run(mut self, task: TaskHandle<'_>) -> ! {
        if let Err(e) = task.start() {
            task.halt(e).await
        }
        task.signal_ready();
        log_info!("blink task running, half-period {} ms", self.half_period_ms);
        loop {
            self.cycle(&task).await;
        }
    }
}

/// 写入共享半周期，与队列发送使用同一等待上限
pub async fn store_rate(shared: &SharedDelayRate, owner: TaskId, rate_ms: u32) -> CoordResult<()> {
    shared.set(owner, rate_ms, Wait::millis(SEND_TIMEOUT_MS)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mock::{RecordingDelay, RecordingPin};
    use crate::tasks::task::TaskTable;
    use embassy_futures::block_on;

    #[test]
    fn test_new_rate_applies_within_one_cycle() {
        let table = TaskTable::new();
        let task = table.running("blink");
        let rates = RateChannel::new();
        let messages = MessageChannel::new();
        let mut blinker = Blinker::new(RecordingPin::default(), RecordingDelay::default(), &rates)
            .with_messages(&messages);

        block_on(blinker.cycle(&task));
        assert_eq!(blinker.delay.delays_ms, [500, 500]);

        block_on(rates.send(250, Wait::NoWait)).unwrap();
        block_on(blinker.cycle(&task));
        assert_eq!(blinker.half_period_ms(), 250);
        assert_eq!(blinker.delay.delays_ms[2..], [250, 250]);
        assert_eq!(blinker.led.levels, [true, false, true, false]);

        let ack = messages.try_receive().unwrap();
        assert_eq!(ack.body(), "Message received ");
        assert_eq!(ack.count, 1);
        assert!(messages.is_empty());
    }

    #[test]
    fn test_report_every_hundred_blinks() {
        let table = TaskTable::new();
        let task = table.running("blink");
        let rates = RateChannel::new();
        let messages = MessageChannel::new();
        let mut blinker = Blinker::new(RecordingPin::default(), RecordingDelay::default(), &rates)
            .with_messages(&messages);

        for _ in 0..BLINK_REPORT_EVERY - 1 {
            block_on(blinker.cycle(&task));
        }
        assert!(messages.is_empty());

        block_on(blinker.cycle(&task));
        let report = messages.try_receive().unwrap();
        assert_eq!(report.body(), "Blinked: ");
        assert_eq!(report.count, 100);
        assert_eq!(blinker.blinks, 0);
    }

    #[test]
    fn test_zero_rate_clamped() {
        let table = TaskTable::new();
        let task = table.running("blink");
        let rates = RateChannel::new();
        let mut blinker = Blinker::new(RecordingPin::default(), RecordingDelay::default(), &rates);

        block_on(rates.send(0, Wait::NoWait)).unwrap();
        block_on(blinker.cycle(&task));
        assert_eq!(blinker.half_period_ms(), MIN_HALF_PERIOD_MS);
    }

    #[test]
    fn test_shared_rate_read_each_cycle() {
        let table = TaskTable::new();
        let reader = table.running("serial");
        let task = table.running("blink");
        let shared = SharedDelayRate::default();
        let mut blinker = Blinker::new(RecordingPin::default(), RecordingDelay::default(), &shared);

        block_on(store_rate(&shared, reader.id(), 120)).unwrap();
        block_on(blinker.cycle(&task));
        assert_eq!(blinker.delay.delays_ms, [120, 120]);
        assert_eq!(shared.try_get(task.id()), Ok(120));
    }
}
