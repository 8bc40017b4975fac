//! 中断安全临界区
//!
//! 任务与 ISR 共享的数据不能只靠互斥锁保护 (ISR 不能阻塞)，
//! 这里提供一对语义不同的进入方式，二者共用同一把自旋锁:
//! - 任务侧 [`IsrSpinlock::enter`]: 先屏蔽中断 (critical-section)，再取自旋锁
//! - ISR 侧 [`IsrSpinlock::enter_from_isr`]: 已在中断上下文，只取自旋锁，
//!   绝不挂起; 另一核心持锁时短暂自旋
//!
//! 临界区内不能执行任何异步操作或长时间计算

use core::hint::spin_loop;

use critical_section::RestoreState;
use portable_atomic::{AtomicBool, Ordering};

/// 任务/中断共享自旋锁 (对应 ESP-IDF 的 portMUX)
pub struct IsrSpinlock {
    locked: AtomicBool,
}

impl IsrSpinlock {
    /// 创建未上锁的自旋锁
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    #[inline(always)]
    fn spin_acquire(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
    }

    #[inline(always)]
    fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// 任务侧进入临界区: 屏蔽中断后取锁
    pub fn enter(&self) -> TaskCritical<'_> {
        // Safety: restore 状态由守卫持有，并在 Drop 中按获取顺序的逆序归还
        let restore = unsafe { critical_section::acquire() };
        self.spin_acquire();
        TaskCritical {
            lock: self,
            restore,
        }
    }

    /// ISR 侧进入临界区: 只取自旋锁
    pub fn enter_from_isr(&self) -> IsrCritical<'_> {
        self.spin_acquire();
        IsrCritical { lock: self }
    }

    /// ISR 侧尝试进入，锁被占用时立即返回 `None`
    pub fn try_enter_from_isr(&self) -> Option<IsrCritical<'_>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| IsrCritical { lock: self })
    }

    /// 任务侧在临界区内执行闭包
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        let _section = self.enter();
        f()
    }

    /// ISR 侧在临界区内执行闭包
    #[inline]
    pub fn with_from_isr<R>(&self, f: impl FnOnce() -> R) -> R {
        let _section = self.enter_from_isr();
        f()
    }

    /// 当前是否被占用
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for IsrSpinlock {
    fn default() -> Self {
        Self::new()
    }
}

/// 任务侧临界区守卫 (中断已屏蔽)
pub struct TaskCritical<'a> {
    lock: &'a IsrSpinlock,
    restore: RestoreState,
}

impl Drop for TaskCritical<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
        // Safety: restore 来自 enter 中配对的 acquire
        unsafe { critical_section::release(self.restore) };
    }
}

/// ISR 侧临界区守卫
pub struct IsrCritical<'a> {
    lock: &'a IsrSpinlock,
}

impl Drop for IsrCritical<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_and_isr_sections_exclude_each_other() {
        let lock = IsrSpinlock::new();

        {
            let _task = lock.enter();
            assert!(lock.is_locked());
            assert!(lock.try_enter_from_isr().is_none());
        }
        assert!(!lock.is_locked());

        let isr = lock.try_enter_from_isr();
        assert!(isr.is_some());
        drop(isr);
        assert_eq!(lock.with(|| 5), 5);
        assert_eq!(lock.with_from_isr(|| 6), 6);
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_concurrent_increments_are_exact() {
        use portable_atomic::AtomicU32;

        static LOCK: IsrSpinlock = IsrSpinlock::new();
        static VALUE: AtomicU32 = AtomicU32::new(0);

        let isr = std::thread::spawn(|| {
            for _ in 0..1000 {
                LOCK.with_from_isr(|| {
                    let v = VALUE.load(Ordering::Relaxed);
                    VALUE.store(v + 1, Ordering::Relaxed);
                });
            }
        });
        for _ in 0..1000 {
            LOCK.with(|| {
                let v = VALUE.load(Ordering::Relaxed);
                VALUE.store(v + 1, Ordering::Relaxed);
            });
        }
        isr.join().unwrap();

        assert_eq!(VALUE.load(Ordering::Relaxed), 2000);
    }
}
