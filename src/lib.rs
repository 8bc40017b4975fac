//! coordrtos - ESP32-S3 有界消息队列任务协调内核
//!
//! 本库提供以下核心功能:
//! - 有界 FIFO 消息队列、带所有者的互斥锁、计数信号量
//! - 任务描述、状态机与启动屏障
//! - 延迟中断锁存器 (中断只记录，任务做处理)
//! - 命令行 / LED 闪烁等演示任务 (通过 `io` trait 与硬件解耦)
//! - 条件编译日志系统
//!
//! 库本身不持有全局句柄: 所有原语放在 [`Supervisor`] 的上下文里，
//! 以引用传给各任务。板级入口 (`src/main.rs`) 把唯一的 Supervisor 放进 `static`。

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod error;
pub mod io;
pub mod mem;
pub mod message;
pub mod supervisor;
pub mod sync;
pub mod tasks;
pub mod util;

// ===== 重导出常用类型 =====
pub use error::{CoordError, CoordResult};
pub use message::Message;
pub use supervisor::{Context, Supervisor};
pub use sync::{BoundedChannel, CountingSemaphore, InterruptLatch, MutualExclusionLock, Wait};
pub use tasks::{Priority, TaskHandle, TaskId, TaskSpec, TaskState};

// ===== 版本信息 =====
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
