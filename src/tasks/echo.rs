//! 经内存池交接的行回显
//!
//! 读行任务按字节组装一行，遇到 `\n` 时从固定内存池申请一个槽位存放该行，
//! 再把槽位经通道移交给打印任务; 打印任务输出后丢弃槽位，槽位随之归还。
//! 池耗尽时打印 `Memory allocation failed!` 并丢弃这一行，不重试。

use core::fmt::Write;

use embassy_time::Timer;

use crate::config::{CLI_POLL_INTERVAL, LINE_POOL_SLOTS, LINE_QUEUE_LEN, SEND_TIMEOUT_MS};
use crate::error::CoordResult;
use crate::io::{write_bytes, ByteSource};
use crate::mem::{MemoryPool, PoolBox};
use crate::sync::{BoundedChannel, Wait};
use crate::tasks::cli::{Feed, Line, LineAssembler};
use crate::tasks::task::TaskHandle;
use crate::util::log::*;

/// 行缓冲内存池
pub type LinePool = MemoryPool<Line, LINE_POOL_SLOTS>;

/// 池内的一行
pub type LineSlot = PoolBox<Line, LINE_POOL_SLOTS>;

/// 行交接通道
pub type LineChannel = BoundedChannel<LineSlot, LINE_QUEUE_LEN>;

/// 读行任务
pub struct LineReader<'a, S, W> {
    input: S,
    console: W,
    pool: &'static LinePool,
    lines: &'a LineChannel,
    line: LineAssembler,
}

impl<'a, S, W> LineReader<'a, S, W>
where
    S: ByteSource,
    W: Write,
{
    /// 创建
    pub fn new(input: S, console: W, pool: &'static LinePool, lines: &'a LineChannel) -> Self {
        Self {
            input,
            console,
            pool,
            lines,
            line: LineAssembler::newline_only(),
        }
    }

    /// 处理至多一个输入字节
    ///
    /// 整行就绪且交接失败时返回对应错误 (已报告，行已丢弃)
    pub async fn poll(&mut self, task: &TaskHandle<'_>) -> CoordResult<()> {
        let Some(byte) = self.input.read_byte() else {
            return Ok(());
        };
        if self.line.push(byte) != Feed::Complete {
            return Ok(());
        }

        let result = self.submit(task).await;
        self.line.clear();
        result
    }

    async fn submit(&mut self, task: &TaskHandle<'_>) -> CoordResult<()> {
        let mut text = Line::new();
        // 两者容量相同，不会失败
        let _ = text.extend_from_slice(self.line.line());

        let slot = match self.pool.alloc(text) {
            Ok(slot) => slot,
            Err(e) => {
                let _ = writeln!(self.console, "Memory allocation failed!");
                return Err(e);
            }
        };

        let _ = self.console.write_str("Update send string message: ");
        let _ = write_bytes(&mut self.console, &slot);
        let _ = self.console.write_str("\n");

        // 发送失败时槽位随消息一起丢弃并归还
        task.suspend(self.lines.send(slot, Wait::millis(SEND_TIMEOUT_MS)))
            .await
            .inspect_err(|e| log_skipped!("line handoff", e))
    }

    /// 任务主循环
    pub async fn run(mut self, task: TaskHandle<'_>) -> ! {
        if let Err(e) = task.start() {
            task.halt(e).await
        }
        task.signal_ready();
        log_info!("line reader running, {} pool slots", LINE_POOL_SLOTS);
        loop {
            // 失败已在 submit 中报告，这一行被丢弃
            let _ = self.poll(&task).await;
            task.suspend(Timer::after(CLI_POLL_INTERVAL)).await;
        }
    }
}

/// 等待下一行并打印，打印后槽位归还
pub async fn print_next_line<W: Write>(
    lines: &LineChannel,
    console: &mut W,
    task: &TaskHandle<'_>,
) -> CoordResult<()> {
    let slot = task.suspend(lines.receive(Wait::Forever)).await?;
    let _ = console.write_str("Received string message: ");
    let _ = write_bytes(console, &slot);
    let _ = console.write_str("\n");
    Ok(())
}

/// 行打印任务
pub async fn line_printer<W: Write>(lines: &LineChannel, mut console: W, task: TaskHandle<'_>) -> ! {
    if let Err(e) = task.start() {
        task.halt(e).await
    }
    task.signal_ready();
    loop {
        if let Err(e) = print_next_line(lines, &mut console, &task).await {
            task.halt(e).await
        }
    }
}
