//! 计数信号量
//!
//! `0 <= count <= max` 始终成立:
//! - `acquire` 只在 `count > 0` 时减一，否则按 [`Wait`] 挂起
//! - `release` 加一，达到 `max` 后不再增长
//!
//! 两种典型用法:
//! - 二值信号 (max = 1): ISR → 任务的延迟中断通知
//! - 汇聚屏障: 创建者等待 N 个子任务各自 `release` 一次

use core::cell::{Cell, RefCell};
use core::future::poll_fn;
use core::task::Poll;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::waitqueue::MultiWakerRegistration;

use crate::config::SYNC_MAX_WAITERS;
use crate::error::{CoordError, CoordResult};
use crate::sync::wait::Wait;

struct SemState {
    count: u32,
    /// 挂起在 acquire 上的等待者数 (超时或被丢弃时减一)
    waiting: u32,
    waiters: MultiWakerRegistration<SYNC_MAX_WAITERS>,
}

/// 计数信号量 (无所有权语义)
pub struct CountingSemaphore {
    state: BlockingMutex<CriticalSectionRawMutex, RefCell<SemState>>,
    max: u32,
}

impl CountingSemaphore {
    /// 创建信号量
    ///
    /// `initial` 超过 `max` 时截断到 `max`
    pub const fn new(max: u32, initial: u32) -> Self {
        assert!(max > 0, "semaphore max must be at least 1");
        let count = if initial > max { max } else { initial };
        Self {
            state: BlockingMutex::new(RefCell::new(SemState {
                count,
                waiting: 0,
                waiters: MultiWakerRegistration::new(),
            })),
            max,
        }
    }

    /// 二值信号量，初始为 0 (未发出信号)
    pub const fn binary() -> Self {
        Self::new(1, 0)
    }

    /// 非阻塞获取，计数为 0 时返回 `Timeout`
    pub fn try_acquire(&self) -> CoordResult<()> {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            if s.count > 0 {
                s.count -= 1;
                Ok(())
            } else {
                Err(CoordError::Timeout)
            }
        })
    }

    /// 获取一个计数，最多等待 `wait`
    pub async fn acquire(&self, wait: Wait) -> CoordResult<()> {
        if self.try_acquire().is_ok() {
            return Ok(());
        }
        if wait.is_no_wait() {
            return Err(CoordError::Timeout);
        }

        let waiter = Waiter {
            sem: self,
            registered: Cell::new(false),
        };
        let take = poll_fn(|cx| {
            self.state.lock(|s| {
                let mut s = s.borrow_mut();
                if s.count > 0 {
                    s.count -= 1;
                    if waiter.registered.replace(false) {
                        s.waiting -= 1;
                    }
                    Poll::Ready(())
                } else {
                    if !waiter.registered.replace(true) {
                        s.waiting += 1;
                    }
                    s.waiters.register(cx.waker());
                    Poll::Pending
                }
            })
        });

        // 超时后 waiter 随本 future 一起析构，撤销登记
        wait.bound(take).await.ok_or(CoordError::Timeout)
    }

    /// 释放一个计数
    ///
    /// # Returns
    /// - `true`: 计数增加
    /// - `false`: 已达上限，本次释放被忽略
    pub fn release(&self) -> bool {
        self.release_inner().0
    }

    /// 中断上下文中释放 (永不阻塞)
    ///
    /// 返回值表示是否唤醒了挂起的任务，ISR 据此决定退出前是否让出 CPU
    #[inline]
    pub fn release_from_isr(&self) -> bool {
        self.release_inner().1
    }

    fn release_inner(&self) -> (bool, bool) {
        self.state.lock(|s| {
            let mut s = s.borrow_mut();
            let incremented = if s.count < self.max {
                s.count += 1;
                true
            } else {
                false
            };
            let woken = incremented && s.waiting > 0;
            if woken {
                s.waiters.wake();
            }
            (incremented, woken)
        })
    }

    /// 当前计数
    pub fn count(&self) -> u32 {
        self.state.lock(|s| s.borrow().count)
    }

    /// 计数上限
    #[inline(always)]
    pub const fn max(&self) -> u32 {
        self.max
    }

    /// 当前挂起的等待者数
    pub fn waiting(&self) -> u32 {
        self.state.lock(|s| s.borrow().waiting)
    }
}

/// acquire 中的一个登记等待者
struct Waiter<'a> {
    sem: &'a CountingSemaphore,
    registered: Cell<bool>,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if self.registered.get() {
            self.sem.state.lock(|s| s.borrow_mut().waiting -= 1);
        }
    }
}
