//! 内存管理模块
//!
//! 系统不提供通用堆分配器。需要"动态"缓冲区的地方 (例如变长输入行)
//! 使用编译期确定容量的 [`MemoryPool`]，耗尽时以 `AllocationFailure` 报告。

pub mod pool;

pub use pool::{MemoryPool, PoolBox};
