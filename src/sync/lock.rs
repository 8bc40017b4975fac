//! 互斥锁
//!
//! 二值所有权原语: 状态为 `Free` 或 `Held(owner)`，同一时刻至多一个任务持有。
//!
//! - [`MutualExclusionLock::acquire`] 返回 RAII 守卫，守卫析构时释放
//! - `MutualExclusionLock<()>` 额外提供显式 `take` / `release`，
//!   用于"创建者预先占锁、子任务拷贝参数后释放"的参数交接模式
//!
//! 不做优先级继承: 持锁期间应尽量短

use core::cell::{RefCell, UnsafeCell};
use core::future::poll_fn;
use core::ops::{Deref, DerefMut};
use core::task::Poll;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::waitqueue::MultiWakerRegistration;

use crate::config::SYNC_MAX_WAITERS;
use crate::error::{CoordError, CoordResult};
use crate::sync::wait::Wait;
use crate::tasks::TaskId;
use crate::util::log::*;

struct LockState {
    holder: Option<TaskId>,
    waiters: MultiWakerRegistration<SYNC_MAX_WAITERS>,
}

/// 互斥锁，保护类型为 `T` 的共享值
///
/// # Example
/// ```ignore
/// static COUNTER: MutualExclusionLock<u32> = MutualExclusionLock::new(0);
///
/// if let Ok(mut guard) = COUNTER.try_acquire(me) {
///     *guard += 1;
/// } // 守卫析构时自动释放
/// ```
pub struct MutualExclusionLock<T> {
    state: BlockingMutex<CriticalSectionRawMutex, RefCell<LockState>>,
    value: UnsafeCell<T>,
}

// Safety: value 只能通过持锁后得到的守卫访问
unsafe impl<T: Send> Send for MutualExclusionLock<T> {}
unsafe impl<T: Send> Sync for MutualExclusionLock<T> {}

impl<T> MutualExclusionLock<T> {
    /// 创建处于 `Free` 状态的锁
    pub const fn new(value: T) -> Self {
        Self {
            state: BlockingMutex::new(RefCell::new(LockState {
                holder: None,
                waiters: MultiWakerRegistration::new(),
            })),
            value: UnsafeCell::new(value),
        }
    }

    fn try_take(&self, owner: TaskId) -> bool {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            if s.holder.is_none() {
                s.holder = Some(owner);
                true
            } else {
                false
            }
        })
    }

    async fn take_within(&self, owner: TaskId, wait: Wait) -> CoordResult<()> {
        if self.try_take(owner) {
            return Ok(());
        }
        if wait.is_no_wait() {
            return Err(CoordError::Timeout);
        }

        let take = poll_fn(|cx| {
            self.state.lock(|s| {
                let mut s = s.borrow_mut();
                if s.holder.is_none() {
                    s.holder = Some(owner);
                    Poll::Ready(())
                } else {
                    s.waiters.register(cx.waker());
                    Poll::Pending
                }
            })
        });

        wait.bound(take).await.ok_or(CoordError::Timeout)
    }

    fn release_inner(&self) -> CoordResult<TaskId> {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            match s.holder.take() {
                Some(owner) => {
                    s.waiters.wake();
                    Ok(owner)
                }
                None => Err(CoordError::InvariantViolation("release of unheld lock")),
            }
        })
    }

    /// 获取锁，最多等待 `wait`
    pub async fn acquire(&self, owner: TaskId, wait: Wait) -> CoordResult<LockGuard<'_, T>> {
        self.take_within(owner, wait).await?;
        Ok(LockGuard { lock: self })
    }

    /// 非阻塞获取，锁被占用时返回 `Timeout`
    pub fn try_acquire(&self, owner: TaskId) -> CoordResult<LockGuard<'_, T>> {
        if self.try_take(owner) {
            Ok(LockGuard { lock: self })
        } else {
            Err(CoordError::Timeout)
        }
    }

    /// 当前持有者
    pub fn holder(&self) -> Option<TaskId> {
        self.state.lock(|s| s.borrow().holder)
    }

    /// 是否被占用
    pub fn is_locked(&self) -> bool {
        self.holder().is_some()
    }
}

impl MutualExclusionLock<()> {
    /// 显式占锁 (不返回守卫)
    ///
    /// 只对不携带数据的锁开放，锁内没有可被绕过守卫访问的值
    pub async fn take(&self, owner: TaskId, wait: Wait) -> CoordResult<()> {
        self.take_within(owner, wait).await
    }

    /// 显式释放
    ///
    /// 任何任务都可以释放 (参数交接中由子任务释放创建者占有的锁)，
    /// 但释放未被持有的锁返回 `InvariantViolation`
    pub fn release(&self) -> CoordResult<()> {
        self.release_inner().map(|_| ())
    }
}

/// 持锁守卫
///
/// 只有持有守卫的任务能读写被保护的值
pub struct LockGuard<'a, T> {
    lock: &'a MutualExclusionLock<T>,
}

impl<T> Deref for LockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: 守卫存在期间锁处于 Held 状态
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for LockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: 同上，且守卫独占
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for LockGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release_inner() {
            // 只可能发生在 `()` 锁被显式 release 之后
            log_error!("lock guard dropped on free lock: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use embassy_time::Timer;

    const A: TaskId = TaskId(1);
    const B: TaskId = TaskId(2);

    #[test]
    fn test_second_acquire_times_out() {
        let lock = MutualExclusionLock::new(0u32);

        let guard = lock.try_acquire(A).unwrap();
        assert_eq!(lock.holder(), Some(A));
        assert!(matches!(lock.try_acquire(B), Err(CoordError::Timeout)));
        assert!(matches!(block_on(lock.acquire(B, Wait::millis(5))), Err(CoordError::Timeout)));

        drop(guard);
        assert!(!lock.is_locked());
        assert!(lock.try_acquire(B).is_ok());
    }

    #[test]
    fn test_waiter_gets_lock_after_release() {
        let lock = MutualExclusionLock::new(0u32);
        let guard = lock.try_acquire(A).unwrap();

        let (b, _) = block_on(join(
            async {
                let mut g = lock.acquire(B, Wait::Forever).await?;
                *g += 1;
                Ok::<u32, CoordError>(*g)
            },
            async {
                Timer::after_millis(5).await;
                drop(guard);
            },
        ));

        assert_eq!(b, Ok(1));
    }

    #[test]
    fn test_release_unheld_is_violation() {
        let lock = MutualExclusionLock::new(());
        assert!(matches!(lock.release(), Err(CoordError::InvariantViolation(_))));

        block_on(lock.take(A, Wait::NoWait)).unwrap();
        assert_eq!(lock.release(), Ok(()));
        assert!(lock.release().is_err());
    }

    #[test]
    fn test_no_lost_updates_under_contention() {
        let lock = MutualExclusionLock::new(0u32);

        let worker = |me: TaskId| {
            let lock = &lock;
            async move {
                for _ in 0..20 {
                    let mut g = lock.acquire(me, Wait::Forever).await.unwrap();
                    let local = *g;
                    // 持锁期间让出，另一任务必须挂起等待
                    embassy_futures::yield_now().await;
                    *g = local + 1;
                }
            }
        };

        block_on(join(worker(A), worker(B)));
        assert_eq!(*lock.try_acquire(A).unwrap(), 40);
    }
}
