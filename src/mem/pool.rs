//! 固定槽位内存池
//!
//! 没有通用堆分配器时的"动态"缓冲区: 编译期确定槽位数，
//! 用原子位图追踪占用，O(1) 分配和释放。
//!
//! - 池耗尽: `AllocationFailure`，调用方丢弃触发分配的数据，不重试
//! - 重复释放: `InvariantViolation`
//!
//! 分配得到的 [`PoolBox`] 可以经通道移动到另一个任务，drop 时归还槽位。
//!
//! # 示例
//!
//! ```rust,ignore
//! static LINES: MemoryPool<Line, 4> = MemoryPool::new();
//!
//! let slot = LINES.alloc(line)?;   // 池满时 AllocationFailure
//! queue.send(slot, Wait::millis(10)).await?;
//! ```

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ops::{Deref, DerefMut};

// Xtensa 不原生支持 AtomicU64，使用 portable_atomic
use portable_atomic::{AtomicU64, Ordering};

use crate::error::{CoordError, CoordResult};
use crate::util::log::*;

/// 位图追踪器 (最多 64 个槽位)
struct Bitmap64 {
    bits: AtomicU64,
}

impl Bitmap64 {
    const fn new() -> Self {
        Self {
            bits: AtomicU64::new(0),
        }
    }

    /// 在前 `limit` 位中占用一个空闲位
    fn alloc(&self, limit: usize) -> Option<usize> {
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            let free_bit = (!current).trailing_zeros() as usize;
            if free_bit >= limit {
                return None;
            }

            match self.bits.compare_exchange_weak(
                current,
                current | (1u64 << free_bit),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(free_bit),
                Err(actual) => current = actual,
            }
        }
    }

    /// 归还一个位; 该位本来就空闲时报告重复释放
    fn free(&self, index: usize) -> CoordResult<()> {
        if index >= 64 {
            return Err(CoordError::InvariantViolation("pool slot out of range"));
        }
        let mask = 1u64 << index;
        let previous = self.bits.fetch_and(!mask, Ordering::AcqRel);
        if previous & mask == 0 {
            return Err(CoordError::InvariantViolation("pool slot freed twice"));
        }
        Ok(())
    }

    fn count(&self) -> usize {
        self.bits.load(Ordering::Relaxed).count_ones() as usize
    }
}

/// 内存池
///
/// # 类型参数
///
/// - `T`: 槽位中存放的数据类型
/// - `N`: 槽位数量 (1..=64)
pub struct MemoryPool<T, const N: usize> {
    slots: [UnsafeCell<MaybeUninit<T>>; N],
    bitmap: Bitmap64,
}

impl<T, const N: usize> MemoryPool<T, N> {
    /// 创建空内存池
    pub const fn new() -> Self {
        assert!(N > 0 && N <= 64, "pool size must be 1..=64");

        Self {
            slots: [const { UnsafeCell::new(MaybeUninit::uninit()) }; N],
            bitmap: Bitmap64::new(),
        }
    }

    /// 归还槽位
    ///
    /// # Safety
    /// 调用方保证槽位中的值已经析构，且之后不再通过旧的 `PoolBox` 访问
    unsafe fn release(&self, index: usize) -> CoordResult<()> {
        self.bitmap.free(index)
    }

    /// 已分配数量
    pub fn allocated(&self) -> usize {
        self.bitmap.count()
    }

    /// 空闲数量
    pub fn available(&self) -> usize {
        N - self.allocated()
    }

    /// 总容量
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T: 'static, const N: usize> MemoryPool<T, N> {
    /// 分配一个槽位并写入 `value`
    ///
    /// 池耗尽时返回 `AllocationFailure`，`value` 被丢弃
    pub fn alloc(&'static self, value: T) -> CoordResult<PoolBox<T, N>> {
        let Some(index) = self.bitmap.alloc(N) else {
            log_warn!("pool exhausted ({} slots)", N);
            return Err(CoordError::AllocationFailure);
        };

        // Safety: 位图保证该槽位此刻只属于本次分配
        unsafe {
            (*self.slots[index].get()).write(value);
        }
        Ok(PoolBox { pool: self, index })
    }
}

impl<T, const N: usize> Default for MemoryPool<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: 每个槽位同一时刻只被一个 PoolBox 访问，占用关系由原子位图维护
unsafe impl<T: Send, const N: usize> Send for MemoryPool<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for MemoryPool<T, N> {}

/// 池内对象的独占指针，drop 时析构并归还槽位
pub struct PoolBox<T: 'static, const N: usize> {
    pool: &'static MemoryPool<T, N>,
    index: usize,
}

impl<T: 'static, const N: usize> PoolBox<T, N> {
    /// 槽位下标
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T: 'static, const N: usize> Deref for PoolBox<T, N> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: 槽位在 alloc 时已初始化，且只属于本 PoolBox
        unsafe { (*self.pool.slots[self.index].get()).assume_init_ref() }
    }
}

impl<T: 'static, const N: usize> DerefMut for PoolBox<T, N> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: 同上
        unsafe { (*self.pool.slots[self.index].get()).assume_init_mut() }
    }
}

impl<T: 'static, const N: usize> Drop for PoolBox<T, N> {
    fn drop(&mut self) {
        // Safety: 值只在这里析构一次，之后槽位归还
        let released = unsafe {
            (*self.pool.slots[self.index].get()).assume_init_drop();
            self.pool.release(self.index)
        };
        if let Err(e) = released {
            log_error!("pool slot {}: {}", self.index, e);
        }
    }
}

// Safety: PoolBox 独占其槽位
unsafe impl<T: Send + 'static, const N: usize> Send for PoolBox<T, N> {}
unsafe impl<T: Sync + 'static, const N: usize> Sync for PoolBox<T, N> {}
