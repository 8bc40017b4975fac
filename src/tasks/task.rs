//! 任务描述与状态机
//!
//! 每个任务由入口例程、栈预算、优先级和钉核偏好描述，
//! 状态按下列路径迁移，非法迁移属于 `InvariantViolation`:
//!
//! ```text
//! Created → Ready → Running ⇄ Blocked → Ready → Running ...
//!                      └──→ Terminated (一次性任务)
//! ```
//!
//! 挂起只发生在通道/锁/信号量的等待点 (以及显式延时)，
//! 任务通过 [`TaskHandle::suspend`] 包裹这些等待点上报 Blocked。

use core::cell::Cell;
use core::future::Future;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_time::Timer;
use portable_atomic::{AtomicU8, Ordering};

use crate::config::{
    DEFAULT_STACK_SIZE, HALT_LOG_PERIOD, HIGH_PRIORITY, LOW_PRIORITY, MAX_TASKS, MID_PRIORITY, MIN_STACK_SIZE,
};
use crate::error::{CoordError, CoordResult};
use crate::sync::semaphore::CountingSemaphore;
use crate::tasks::multicore::{CoreAssignment, CoreId, Workload};
use crate::util::log::*;

/// 任务标识 (任务表下标)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub struct TaskId(pub u8);

/// 任务优先级，数值越大越优先
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub struct Priority(pub u8);

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TaskState {
    /// 已登记，尚未交给执行器
    Created = 1,
    /// 可运行
    Ready = 2,
    /// 正在运行
    Running = 3,
    /// 挂起在等待点上
    Blocked = 4,
    /// 已结束
    Terminated = 5,
}

impl TaskState {
    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(TaskState::Created),
            2 => Some(TaskState::Ready),
            3 => Some(TaskState::Running),
            4 => Some(TaskState::Blocked),
            5 => Some(TaskState::Terminated),
            _ => None,
        }
    }

    /// 迁移是否合法
    pub fn can_become(self, next: TaskState) -> bool {
        use TaskState::*;

        matches!(
            (self, next),
            (Created, Ready)
                | (Created, Terminated)
                | (Ready, Running)
                | (Running, Blocked)
                | (Running, Ready)
                | (Running, Terminated)
                | (Blocked, Ready)
        )
    }
}

/// 任务所在的执行器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum Placement {
    /// Core1 线程模式执行器
    Core1,
    /// 高优先级中断执行器
    High,
    /// 中优先级中断执行器
    Mid,
    /// Core0 线程模式执行器
    Low,
}

/// 任务描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSpec {
    /// 任务名
    pub name: &'static str,
    /// 栈预算 (字节)
    pub stack_size: usize,
    /// 优先级
    pub priority: Priority,
    /// 钉核偏好
    pub affinity: CoreAssignment,
    /// 负载类型 (自动钉核时使用)
    pub workload: Workload,
}

impl TaskSpec {
    /// 默认栈、低优先级、自动钉核
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            stack_size: DEFAULT_STACK_SIZE,
            priority: LOW_PRIORITY,
            affinity: CoreAssignment::auto(),
            workload: Workload::General,
        }
    }

    /// 设置优先级
    pub const fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// 设置栈预算
    pub const fn stack(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// 钉核
    pub const fn pinned(mut self, core: CoreId) -> Self {
        self.affinity = CoreAssignment::pinned(core);
        self
    }

    /// 设置负载类型
    pub const fn workload(mut self, workload: Workload) -> Self {
        self.workload = workload;
        self
    }

    /// 解析后的目标核心
    pub fn core(&self) -> CoreId {
        self.affinity.resolve(self.workload)
    }

    /// 执行器选择: 解析到 Core1 的任务进 Core1 执行器，其余按优先级
    pub fn placement(&self) -> Placement {
        if self.core() == CoreId::Core1 {
            Placement::Core1
        } else if self.priority >= HIGH_PRIORITY {
            Placement::High
        } else if self.priority >= MID_PRIORITY {
            Placement::Mid
        } else {
            Placement::Low
        }
    }

    /// 检查栈预算
    pub fn validate(&self) -> CoordResult<()> {
        if self.stack_size < MIN_STACK_SIZE {
            return Err(CoordError::InvariantViolation("task stack below minimum"));
        }
        Ok(())
    }
}

const VACANT: u8 = 0;

struct TaskSlot {
    state: AtomicU8,
    spec: BlockingMutex<CriticalSectionRawMutex, Cell<Option<TaskSpec>>>,
}

impl TaskSlot {
    const fn new() -> Self {
        Self {
            state: AtomicU8::new(VACANT),
            spec: BlockingMutex::new(Cell::new(None)),
        }
    }
}

/// 固定容量任务表
///
/// 同时持有启动屏障信号量: 子任务完成一次性初始化后发信号，
/// 创建者据此确认所有子任务进入安全状态
pub struct TaskTable {
    slots: [TaskSlot; MAX_TASKS],
    startup: CountingSemaphore,
}

impl TaskTable {
    /// 创建空任务表
    pub const fn new() -> Self {
        Self {
            slots: [const { TaskSlot::new() }; MAX_TASKS],
            startup: CountingSemaphore::new(MAX_TASKS as u32, 0),
        }
    }

    /// 登记任务，状态为 `Created`
    ///
    /// 优先使用空槽位，其次回收已结束任务的槽位 (旧句柄随之失效);
    /// 任务表已满返回 `AllocationFailure`
    pub fn register(&self, spec: TaskSpec) -> CoordResult<TaskHandle<'_>> {
        spec.validate()?;

        for reclaimable in [VACANT, TaskState::Terminated as u8] {
            for (index, slot) in self.slots.iter().enumerate() {
                if slot
                    .state
                    .compare_exchange(reclaimable, TaskState::Created as u8, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    slot.spec.lock(|s| s.set(Some(spec)));
                    log_debug!("task '{}' registered as #{}", spec.name, index);
                    return Ok(TaskHandle {
                        id: TaskId(index as u8),
                        table: self,
                    });
                }
            }
        }

        log_error!("task table full, '{}' rejected", spec.name);
        Err(CoordError::AllocationFailure)
    }

    /// 释放槽位 (只用于从未运行过的任务)
    fn vacate(&self, id: TaskId) {
        let slot = &self.slots[id.0 as usize];
        slot.spec.lock(|s| s.set(None));
        slot.state.store(VACANT, Ordering::Release);
    }

    /// 查询任务状态
    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.slots
            .get(id.0 as usize)
            .and_then(|slot| TaskState::from_u8(slot.state.load(Ordering::Acquire)))
    }

    /// 查询任务描述
    pub fn spec(&self, id: TaskId) -> Option<TaskSpec> {
        self.slots
            .get(id.0 as usize)
            .and_then(|slot| slot.spec.lock(|s| s.get()))
    }

    /// 处于指定状态的任务数
    pub fn count_in(&self, state: TaskState) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state.load(Ordering::Acquire) == state as u8)
            .count()
    }

    /// 等待 `n` 个任务发出启动信号
    pub async fn await_startup(&self, n: usize, wait: crate::sync::Wait) -> CoordResult<()> {
        for _ in 0..n {
            self.startup.acquire(wait).await?;
        }
        Ok(())
    }

    fn transition(&self, id: TaskId, next: TaskState) -> CoordResult<()> {
        let slot = &self.slots[id.0 as usize];
        let mut current = slot.state.load(Ordering::Acquire);
        loop {
            let legal = TaskState::from_u8(current).is_some_and(|s| s.can_become(next));
            if !legal {
                return Err(CoordError::InvariantViolation("illegal task state transition"));
            }
            match slot
                .state
                .compare_exchange(current, next as u8, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
impl TaskTable {
    /// 登记并直接进入 Running (测试用)
    pub(crate) fn running(&self, name: &'static str) -> TaskHandle<'_> {
        let task = self.register(TaskSpec::new(name)).unwrap();
        task.transition(TaskState::Ready).unwrap();
        task.start().unwrap();
        task
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

/// 任务句柄 (非拥有)
///
/// 任务用它上报状态、发出启动信号，以及在致命错误时停机
#[derive(Clone, Copy)]
pub struct TaskHandle<'a> {
    id: TaskId,
    table: &'a TaskTable,
}

impl<'a> TaskHandle<'a> {
    /// 任务标识
    #[inline(always)]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// 任务名
    pub fn name(&self) -> &'static str {
        self.table.spec(self.id).map(|s| s.name).unwrap_or("?")
    }

    /// 当前状态
    pub fn state(&self) -> Option<TaskState> {
        self.table.state(self.id)
    }

    /// 迁移到 `next`，非法迁移记录错误并返回 `InvariantViolation`
    pub fn transition(&self, next: TaskState) -> CoordResult<()> {
        self.table.transition(self.id, next).inspect_err(|e| {
            log_error!("task #{}: {} ({:?} -> {:?})", self.id.0, e, self.state(), next);
        })
    }

    /// 任务入口处调用: Ready → Running
    pub fn start(&self) -> CoordResult<()> {
        self.transition(TaskState::Running)
    }

    /// 包裹一个等待点: Running → Blocked → Ready → Running
    ///
    /// 任何一步迁移非法都说明任务状态已被破坏，任务就地停机
    pub async fn suspend<F: Future>(&self, fut: F) -> F::Output {
        if let Err(e) = self.transition(TaskState::Blocked) {
            self.halt(e).await
        }
        let out = fut.await;
        if let Err(e) = self
            .transition(TaskState::Ready)
            .and_then(|()| self.transition(TaskState::Running))
        {
            self.halt(e).await
        }
        out
    }

    /// 一次性初始化完成，通知创建者
    pub fn signal_ready(&self) {
        self.table.startup.release();
    }

    /// 一次性任务结束: Running → Terminated
    pub fn terminate(&self) -> CoordResult<()> {
        log_debug!("task '{}' terminated", self.name());
        self.transition(TaskState::Terminated)
    }

    /// 遇到致命错误后可见地停机: 永不返回，周期性记录错误
    pub async fn halt(&self, err: CoordError) -> ! {
        loop {
            log_error!("task '{}' halted: {}", self.name(), err);
            Timer::after(HALT_LOG_PERIOD).await;
        }
    }

    pub(crate) fn abandon(self) {
        self.table.vacate(self.id);
    }
}
