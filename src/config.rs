//! 系统配置常量
//!
//! 队列长度、缓冲区大小、超时策略与任务参数都在这里集中定义。
//! 超时策略按角色统一 (见各常量说明)，不同任务不各自发明超时值。

use embassy_time::Duration;

use crate::error::{CoordError, CoordResult};
use crate::tasks::Priority;

// ===== 时钟 =====

/// CPU 频率 (Hz)
pub const CPU_FREQ_HZ: u32 = 240_000_000;

/// 定时器组输入时钟 (APB, Hz)
pub const APB_CLOCK_HZ: u64 = 80_000_000;

// ===== 优先级 =====

/// 高优先级 (中断锁存消费者)
pub const HIGH_PRIORITY: Priority = Priority(3);

/// 中优先级
pub const MID_PRIORITY: Priority = Priority(2);

/// 低优先级 (CLI / 闪烁 / 演示任务)
pub const LOW_PRIORITY: Priority = Priority(1);

// ===== 任务 =====

/// 默认任务栈大小 (字节)
pub const DEFAULT_STACK_SIZE: usize = 4096;

/// 最小任务栈大小 (字节)
pub const MIN_STACK_SIZE: usize = 512;

/// 任务表容量
pub const MAX_TASKS: usize = 24;

/// 单个锁/信号量上可同时挂起的任务数 (超出时全部唤醒重新竞争)
pub const SYNC_MAX_WAITERS: usize = 4;

/// 计数信号量演示中一次创建的任务数
pub const FAN_OUT_TASKS: usize = 5;

/// 一次性任务打印后停留的时间
pub const ONE_SHOT_LINGER: Duration = Duration::from_millis(1000);

/// 违反不变量后停机任务的日志周期
pub const HALT_LOG_PERIOD: Duration = Duration::from_millis(1000);

// ===== 队列 =====

/// 延时命令队列长度
pub const RATE_QUEUE_LEN: usize = 5;

/// 反馈消息队列长度
pub const MSG_QUEUE_LEN: usize = 5;

/// 整数生产者演示队列长度
pub const NUMBER_QUEUE_LEN: usize = 5;

/// 行交接队列长度
pub const LINE_QUEUE_LEN: usize = 4;

/// 行缓冲内存池槽位数
pub const LINE_POOL_SLOTS: usize = 4;

/// 消息体最大长度 (字节)
pub const MSG_BODY_LEN: usize = 20;

// ===== 命令行 =====

/// 命令行缓冲区大小 (有效字符最多 `CLI_BUF_LEN - 1`)
pub const CLI_BUF_LEN: usize = 255;

/// 单行最多保留的字符数
pub const LINE_MAX: usize = CLI_BUF_LEN - 1;

/// 延时命令前缀 (注意空格)
pub const DELAY_COMMAND: &str = "delay ";

/// CLI 轮询间隔: 每轮最多处理一个输入字节
pub const CLI_POLL_INTERVAL: Duration = Duration::from_millis(2);

// ===== 超时策略 =====
//
// - 队列发送: 最多等待 SEND_TIMEOUT，失败则记录并丢弃
// - 队列接收 (主循环内): 不等待
// - 参数交接 / 启动屏障 / 延迟中断: 无限等待

/// 队列发送等待上限
pub const SEND_TIMEOUT_MS: u64 = 10;

// ===== 闪烁 =====

/// 默认半周期 (毫秒)
pub const DEFAULT_DELAY_MS: u32 = 500;

/// 每闪烁多少次回报一次
pub const BLINK_REPORT_EVERY: u32 = 100;

// ===== 演示任务 =====

/// 整数生产者周期
pub const PRODUCER_PERIOD: Duration = Duration::from_millis(1000);

/// 整数消费者周期
pub const CONSUMER_PERIOD: Duration = Duration::from_millis(500);

/// 计数器任务持锁期间随机延时下限 (毫秒)
pub const COUNTER_JITTER_MIN_MS: u32 = 100;

/// 计数器任务持锁期间随机延时上限 (毫秒, 不含)
pub const COUNTER_JITTER_MAX_MS: u32 = 500;

/// 计数锁存器消费周期
pub const DRAIN_PERIOD: Duration = Duration::from_millis(2000);

// ===== 硬件定时器 =====

/// 定时器触发方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum TimerMode {
    /// 触发后自动重装，周期触发
    Periodic,
    /// 只触发一次
    OneShot,
}

/// 硬件定时器配置 (分频, 触发计数, 自动重装)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    /// 预分频 (2..=65535)
    pub divider: u16,
    /// 触发时的计数值
    pub alarm_count: u64,
    /// 触发后是否自动重装
    pub auto_reload: bool,
}

impl TimerConfig {
    /// 创建配置
    pub const fn new(divider: u16, alarm_count: u64, auto_reload: bool) -> Self {
        Self {
            divider,
            alarm_count,
            auto_reload,
        }
    }

    /// 检查参数范围
    pub fn validate(&self) -> CoordResult<()> {
        if self.divider < 2 {
            return Err(CoordError::InvariantViolation("timer divider below 2"));
        }
        if self.alarm_count == 0 {
            return Err(CoordError::InvariantViolation("timer alarm count is zero"));
        }
        Ok(())
    }

    /// 由 `auto_reload` 决定的触发方式
    pub const fn mode(&self) -> TimerMode {
        if self.auto_reload {
            TimerMode::Periodic
        } else {
            TimerMode::OneShot
        }
    }

    /// 计数频率 (Hz)
    pub const fn tick_hz(&self) -> u64 {
        APB_CLOCK_HZ / self.divider as u64
    }

    /// 触发周期
    pub fn period(&self) -> CoordResult<Duration> {
        self.validate()?;
        let micros = self.alarm_count.saturating_mul(1_000_000) / self.tick_hz();
        Ok(Duration::from_micros(micros))
    }
}

/// 采样锁存器定时器: 1MHz 计数，每秒触发
pub const SAMPLE_TIMER: TimerConfig = TimerConfig::new(80, 1_000_000, true);

/// 计数锁存器定时器: 10MHz 计数，每 100ms 触发
pub const COUNTER_TIMER: TimerConfig = TimerConfig::new(8, 1_000_000, true);
