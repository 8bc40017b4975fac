//! 命令行任务
//!
//! 每轮循环:
//! 1. 非阻塞地取一条反馈消息并打印 (正文 + 计数)
//! 2. 有输入时读一个字节: 普通字符回显; 行结束符打印 `\r\n` 并处理整行
//!
//! 以 `"delay "` 开头的行按 atoi 语义取整、取绝对值后发往延时队列。
//! 单行最多保留 `LINE_MAX` 个字符，超出部分丢弃直到行结束。

use core::fmt::Write;

use embassy_time::Timer;
use heapless::Vec;

use crate::config::{CLI_POLL_INTERVAL, DELAY_COMMAND, LINE_MAX, SEND_TIMEOUT_MS};
use crate::error::{CoordError, CoordResult};
use crate::io::ByteSource;
use crate::message::{MessageChannel, RateChannel};
use crate::sync::Wait;
use crate::tasks::blink::{store_rate, SharedDelayRate};
use crate::tasks::task::{TaskHandle, TaskId};
use crate::util::log::*;

/// 行缓冲
pub type Line = Vec<u8, LINE_MAX>;

/// 喂入一个字节的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    /// 已存入缓冲
    Stored,
    /// 缓冲已满，字节被丢弃
    Dropped,
    /// 遇到行结束符，整行就绪
    Complete,
}

/// 按字节组装行
pub struct LineAssembler {
    buf: Line,
    accept_cr: bool,
}

impl LineAssembler {
    /// `\n` 和 `\r` 都视为行结束
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            accept_cr: true,
        }
    }

    /// 只有 `\n` 视为行结束
    pub const fn newline_only() -> Self {
        Self {
            buf: Vec::new(),
            accept_cr: false,
        }
    }

    /// 喂入一个字节
    pub fn push(&mut self, byte: u8) -> Feed {
        if byte == b'\n' || (self.accept_cr && byte == b'\r') {
            return Feed::Complete;
        }
        match self.buf.push(byte) {
            Ok(()) => Feed::Stored,
            Err(_) => Feed::Dropped,
        }
    }

    /// 当前行内容 (不含结束符)
    pub fn line(&self) -> &[u8] {
        &self.buf
    }

    /// 清空，开始下一行
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// C 风格 atoi: 跳过前导空白，可选符号，读取连续数字; 无数字时为 0，溢出时饱和
pub fn atoi(bytes: &[u8]) -> i32 {
    let mut iter = bytes
        .iter()
        .copied()
        .skip_while(|b| b.is_ascii_whitespace())
        .peekable();

    let negative = match iter.peek() {
        Some(b'-') => {
            iter.next();
            true
        }
        Some(b'+') => {
            iter.next();
            false
        }
        _ => false,
    };

    let mut value: i64 = 0;
    for b in iter.take_while(u8::is_ascii_digit) {
        value = (value * 10 + i64::from(b - b'0')).min(i64::from(i32::MAX) + 1);
    }
    if negative {
        value = -value;
    }
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// 解析 `"delay <n>"`，返回 |n|; 不是延时命令时返回 `None`
pub fn parse_command(line: &[u8]) -> Option<u32> {
    line.strip_prefix(DELAY_COMMAND.as_bytes())
        .map(|tail| atoi(tail).unsigned_abs())
}

/// 行语法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    /// `delay <n>`，其余行忽略
    DelayCommand,
    /// 整行就是一个整数
    PlainNumber,
}

/// 新速率的去向
#[allow(async_fn_in_trait)]
pub trait RateSink {
    /// 提交一个新半周期 (毫秒)
    async fn submit(&self, owner: TaskId, rate_ms: u32) -> CoordResult<()>;
}

impl RateSink for RateChannel {
    async fn submit(&self, _owner: TaskId, rate_ms: u32) -> CoordResult<()> {
        self.send(rate_ms, Wait::millis(SEND_TIMEOUT_MS)).await
    }
}

impl RateSink for SharedDelayRate {
    async fn submit(&self, owner: TaskId, rate_ms: u32) -> CoordResult<()> {
        store_rate(self, owner, rate_ms).await
    }
}

/// 命令行任务状态
pub struct CommandLine<'a, S, W, K> {
    input: S,
    console: W,
    rates: &'a K,
    messages: Option<&'a MessageChannel>,
    syntax: Syntax,
    line: LineAssembler,
}

impl<'a, S, W, K> CommandLine<'a, S, W, K>
where
    S: ByteSource,
    W: Write,
    K: RateSink,
{
    /// 创建，默认识别 `delay <n>` 命令
    pub fn new(input: S, console: W, rates: &'a K) -> Self {
        Self {
            input,
            console,
            rates,
            messages: None,
            syntax: Syntax::DelayCommand,
            line: LineAssembler::new(),
        }
    }

    /// 打印来自该队列的反馈消息
    pub fn with_messages(mut self, messages: &'a MessageChannel) -> Self {
        self.messages = Some(messages);
        self
    }

    /// 切换行语法 (纯整数行只以 `\n` 结束)
    pub fn with_syntax(mut self, syntax: Syntax) -> Self {
        self.syntax = syntax;
        self.line = match syntax {
            Syntax::DelayCommand => LineAssembler::new(),
            Syntax::PlainNumber => LineAssembler::newline_only(),
        };
        self
    }

    /// 控制台
    pub fn console(&self) -> &W {
        &self.console
    }

    /// 执行一轮: 最多打印一条反馈消息、处理一个输入字节
    pub async fn poll(&mut self, task: &TaskHandle<'_>) {
        if let Some(msg) = self.messages.and_then(|m| m.try_receive()) {
            let _ = writeln!(self.console, "{}{}", msg.body(), msg.count);
        }

        let Some(byte) = self.input.read_byte() else {
            return;
        };

        match self.line.push(byte) {
            Feed::Complete => {
                let _ = self.console.write_str("\r\n");
                self.dispatch(task).await;
                self.line.clear();
            }
            Feed::Stored | Feed::Dropped => {
                let _ = self.console.write_char(byte as char);
            }
        }
    }

    async fn dispatch(&mut self, task: &TaskHandle<'_>) {
        let rate = match self.syntax {
            Syntax::DelayCommand => parse_command(self.line.line()),
            Syntax::PlainNumber => Some(atoi(self.line.line()).unsigned_abs()),
        };
        let Some(rate) = rate else {
            return;
        };

        match task.suspend(self.rates.submit(task.id(), rate)).await {
            Ok(()) => {
                if self.syntax == Syntax::PlainNumber {
                    let _ = writeln!(self.console, "Updated LED delay to: {}", rate);
                }
            }
            Err(CoordError::Full) => {
                let _ = writeln!(self.console, "ERROR: Could not put item on delay queue.");
            }
            Err(e) => log_skipped!("rate update", e),
        }
    }

    /// 任务主循环
    pub async fn run(mut self, task: TaskHandle<'_>) -> ! {
        if let Err(e) = task.start() {
            task.halt(e).await
        }
        task.signal_ready();
        log_info!("cli task running");
        loop {
            self.poll(&task).await;
            task.suspend(Timer::after(CLI_POLL_INTERVAL)).await;
        }
    }
}
