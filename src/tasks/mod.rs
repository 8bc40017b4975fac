//! 任务模块
//!
//! - `task`: 任务描述、状态机、任务表
//! - `multicore`: 钉核偏好
//! - `cli` / `blink`: 命令行与 LED 闪烁 (延时命令经队列传递)
//! - `producer`: 整数队列演示
//! - `counter`: 互斥锁保护的计数器
//! - `handoff`: 启动参数交接 (锁 / 二值信号量 / 计数信号量)
//! - `deferred`: 延迟中断消费者
//! - `echo`: 经内存池交接的行回显
//!
//! 任务例程都是普通 `async fn`，只借用 [`crate::supervisor::Context`] 中的原语；
//! 由板级入口包装成执行器任务。

pub mod blink;
pub mod cli;
pub mod counter;
pub mod deferred;
pub mod echo;
pub mod handoff;
pub mod multicore;
pub mod producer;
pub mod task;

pub use multicore::{CoreAssignment, CoreId, Workload};
pub use task::{Placement, Priority, TaskHandle, TaskId, TaskSpec, TaskState, TaskTable};
