//! 同步原语模块
//!
//! 任务之间只通过这里的原语通信，不存在未受保护的共享内存:
//! - `BoundedChannel`: 有界 FIFO 消息队列
//! - `MutualExclusionLock`: 带所有者的互斥锁
//! - `CountingSemaphore`: 计数/二值信号量
//! - `IsrSpinlock`: 任务/中断共享临界区
//! - `InterruptLatch`: 延迟中断锁存器
//!
//! 所有阻塞调用都接收显式的 [`Wait`] 上限。

pub mod channel;
pub mod critical;
pub mod latch;
pub mod lock;
pub mod semaphore;
pub mod wait;

pub use channel::BoundedChannel;
pub use critical::IsrSpinlock;
pub use latch::{InterruptLatch, IsrOutcome};
pub use lock::{LockGuard, MutualExclusionLock};
pub use semaphore::CountingSemaphore;
pub use wait::Wait;
