//! 启动协调
//!
//! [`Supervisor`] 在任何任务之前构造全部原语 ([`Context`])，
//! 按依赖顺序登记并启动任务，可选地等待所有任务完成一次性初始化后
//! 让启动上下文退出。
//!
//! 任务只拿到 `Context` 中原语的引用，库内没有全局句柄。

use core::fmt::Write;

use crate::config::{DEFAULT_DELAY_MS, FAN_OUT_TASKS, MAX_TASKS};
use crate::error::{CoordError, CoordResult};
use crate::message::{Message, MessageChannel, NumberChannel, RateChannel};
use crate::sync::{CountingSemaphore, InterruptLatch, MutualExclusionLock, Wait};
use crate::tasks::blink::SharedDelayRate;
use crate::tasks::echo::{LineChannel, LinePool};
use crate::tasks::handoff::{fan_out, hand_off, hand_off_signalled};
use crate::tasks::task::{TaskHandle, TaskSpec, TaskState, TaskTable};
use crate::util::log::*;

/// 全部共享原语
pub struct Context {
    /// 延时命令 (CLI → 闪烁)
    pub rates: RateChannel,
    /// 反馈消息 (闪烁 → CLI)
    pub messages: MessageChannel,
    /// 整数演示队列
    pub numbers: NumberChannel,
    /// 共享半周期 (队列之外的另一种方式)
    pub shared_rate: SharedDelayRate,
    /// 计数器演示的共享值
    pub counter: MutualExclusionLock<u32>,
    /// 参数交接锁
    pub handoff: MutualExclusionLock<()>,
    /// 参数交接完成信号 (二值)
    pub handoff_done: CountingSemaphore,
    /// 扇出完成计数
    pub fan_out_done: CountingSemaphore,
    /// 采样锁存器
    pub samples: InterruptLatch,
    /// 计数锁存器
    pub counts: InterruptLatch,
    /// 行缓冲内存池
    pub line_pool: LinePool,
    /// 行交接通道
    pub lines: LineChannel,
}

impl Context {
    /// 构造全部原语
    pub const fn new() -> Self {
        Self {
            rates: RateChannel::new(),
            messages: MessageChannel::new(),
            numbers: NumberChannel::new(),
            shared_rate: SharedDelayRate::new(DEFAULT_DELAY_MS),
            counter: MutualExclusionLock::new(0),
            handoff: MutualExclusionLock::new(()),
            handoff_done: CountingSemaphore::binary(),
            fan_out_done: CountingSemaphore::new(FAN_OUT_TASKS as u32, 0),
            samples: InterruptLatch::new(),
            counts: InterruptLatch::new(),
            line_pool: LinePool::new(),
            lines: LineChannel::new(),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// 启动协调者
pub struct Supervisor {
    context: Context,
    tasks: TaskTable,
}

impl Supervisor {
    /// 创建
    pub const fn new() -> Self {
        Self {
            context: Context::new(),
            tasks: TaskTable::new(),
        }
    }

    /// 共享原语
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// 任务表
    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    /// 把启动上下文本身登记为任务 (直接进入 Running)
    pub fn launcher(&self) -> CoordResult<TaskHandle<'_>> {
        let task = self.tasks.register(TaskSpec::new("launcher"))?;
        task.transition(TaskState::Ready)?;
        task.start()?;
        Ok(task)
    }

    /// 登记并启动一个任务
    ///
    /// 任务先进入 `Ready` 再交给 `launch`，高优先级执行器立即运行它时也能合法地 `start`。
    /// `launch` 失败时撤销登记并返回 `AllocationFailure`。
    pub fn spawn<'a, E>(
        &'a self,
        spec: TaskSpec,
        launch: impl FnOnce(TaskHandle<'a>) -> Result<(), E>,
    ) -> CoordResult<TaskHandle<'a>> {
        let task = self.tasks.register(spec)?;
        task.transition(TaskState::Ready)?;

        match launch(task) {
            Ok(()) => {
                log_info!(
                    "spawned '{}' (priority {}, core {})",
                    spec.name,
                    spec.priority.0,
                    spec.core() as u8
                );
                Ok(task)
            }
            Err(_) => {
                log_error!("executor rejected '{}'", spec.name);
                task.abandon();
                Err(CoordError::AllocationFailure)
            }
        }
    }

    /// 等待 `n` 个任务发出启动信号
    pub async fn await_startup(&self, n: usize) -> CoordResult<()> {
        self.tasks.await_startup(n, Wait::Forever).await
    }

    /// 启动上下文退出
    pub fn retire(&self, launcher: TaskHandle<'_>) -> CoordResult<()> {
        let live: usize = [TaskState::Ready, TaskState::Running, TaskState::Blocked]
            .into_iter()
            .map(|state| self.tasks.count_in(state))
            .sum();
        log_info!("launcher retiring, {} of {} task slots live", live, MAX_TASKS);
        launcher.terminate()
    }

    /// 经互斥锁把创建者持有的 `arg` 交给新启动的子任务
    ///
    /// `launch` 把子任务交给执行器，子任务应运行
    /// [`delay_receiver`](crate::tasks::handoff::delay_receiver)。
    /// 返回时子任务已复制参数
    pub async fn handoff_demo<'a, W: Write, E>(
        &'a self,
        creator: &TaskHandle<'_>,
        arg: &'a u32,
        console: &mut W,
        launch: impl FnOnce(TaskHandle<'a>, &'a u32) -> Result<(), E>,
    ) -> CoordResult<()> {
        let _ = writeln!(console, "Sending: {}", arg);
        creator
            .suspend(hand_off(&self.context.handoff, creator.id(), arg, |arg| {
                self.spawn(TaskSpec::new("handoff"), |task| launch(task, arg))
                    .map(|_| ())
            }))
            .await?;
        let _ = writeln!(console, "Done!");
        Ok(())
    }

    /// 同上，经二值信号量; 子任务应运行
    /// [`signalled_receiver`](crate::tasks::handoff::signalled_receiver)
    pub async fn signalled_handoff_demo<'a, W: Write, E>(
        &'a self,
        creator: &TaskHandle<'_>,
        arg: &'a u32,
        console: &mut W,
        launch: impl FnOnce(TaskHandle<'a>, &'a u32) -> Result<(), E>,
    ) -> CoordResult<()> {
        let _ = writeln!(console, "Sending: {}", arg);
        creator
            .suspend(hand_off_signalled(&self.context.handoff_done, arg, |arg| {
                self.spawn(TaskSpec::new("signalled"), |task| launch(task, arg))
                    .map(|_| ())
            }))
            .await?;
        let _ = writeln!(console, "Done!");
        Ok(())
    }

    /// 启动 `FAN_OUT_TASKS` 个一次性子任务读取同一个 `msg`
    ///
    /// 子任务应运行 [`fan_out_reader`](crate::tasks::handoff::fan_out_reader)，
    /// 自行结束。全部复制完成后打印 `All tasks created`
    pub async fn fan_out_demo<'a, W: Write, E>(
        &'a self,
        creator: &TaskHandle<'_>,
        msg: &'a Message,
        console: &mut W,
        mut launch: impl FnMut(TaskHandle<'a>, &'a Message) -> Result<(), E>,
    ) -> CoordResult<()> {
        creator
            .suspend(fan_out(&self.context.fan_out_done, msg, FAN_OUT_TASKS, |msg| {
                self.spawn(TaskSpec::new("fan-out"), |task| launch(task, msg))
                    .map(|_| ())
            }))
            .await?;
        let _ = writeln!(console, "All tasks created");
        Ok(())
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::handoff::{delay_receiver, fan_out_reader, signalled_receiver};
    use embassy_futures::block_on;
    use embassy_futures::join::join;
    use embassy_time::{Duration, Timer};
    use portable_atomic::{AtomicU32, Ordering};
    use std::string::String;
    use std::sync::Mutex;
    use std::thread;

    #[test]
    fn test_spawn_moves_task_to_ready() {
        let sup = Supervisor::new();
        let task = sup.spawn(TaskSpec::new("cli"), |_| Ok::<(), ()>(())).unwrap();
        assert_eq!(task.state(), Some(TaskState::Ready));
        task.start().unwrap();
    }

    #[test]
    fn test_rejected_spawn_frees_slot() {
        let sup = Supervisor::new();
        let err = sup.spawn(TaskSpec::new("blink"), |_| Err("busy")).err();
        assert_eq!(err, Some(CoordError::AllocationFailure));
        assert_eq!(sup.tasks().count_in(TaskState::Ready), 0);
        assert_eq!(sup.tasks().count_in(TaskState::Created), 0);
    }

    #[test]
    fn test_startup_barrier_then_retire() {
        let sup = Supervisor::new();
        let launcher = sup.launcher().unwrap();
        let a = sup.spawn(TaskSpec::new("a"), |_| Ok::<(), ()>(())).unwrap();
        let b = sup.spawn(TaskSpec::new("b"), |_| Ok::<(), ()>(())).unwrap();

        let (ready, _) = block_on(join(sup.await_startup(2), async {
            Timer::after_millis(2).await;
            a.start().unwrap();
            a.signal_ready();
            b.start().unwrap();
            b.signal_ready();
        }));
        assert_eq!(ready, Ok(()));

        sup.retire(launcher).unwrap();
        assert_eq!(launcher.state(), Some(TaskState::Terminated));
    }

    #[test]
    fn test_handoff_demo_output() {
        let sup = Supervisor::new();
        let launcher = sup.launcher().unwrap();
        let ctx = sup.context();
        let arg = 750u32;
        let child_out = Mutex::new(String::new());
        let mut out = String::new();

        thread::scope(|s| {
            block_on(sup.handoff_demo(&launcher, &arg, &mut out, |task, arg| {
                let child_out = &child_out;
                s.spawn(move || {
                    let mut console = String::new();
                    block_on(delay_receiver(task, arg, &ctx.handoff, &ctx.rates, &mut console)).unwrap();
                    child_out.lock().unwrap().push_str(&console);
                });
                Ok::<(), ()>(())
            }))
            .unwrap();
        });

        assert_eq!(out, "Sending: 750\nDone!\n");
        assert_eq!(*child_out.lock().unwrap(), "Received: 750\n");
        assert_eq!(ctx.rates.try_receive(), Some(750));
        assert_eq!(launcher.state(), Some(TaskState::Running));
    }

    #[test]
    fn test_signalled_handoff_demo() {
        let sup = Supervisor::new();
        let launcher = sup.launcher().unwrap();
        let ctx = sup.context();
        let copied = AtomicU32::new(0);

        thread::scope(|s| {
            block_on(sup.signalled_handoff_demo(&launcher, &250, &mut String::new(), |task, arg| {
                let copied = &copied;
                s.spawn(move || {
                    let got = block_on(signalled_receiver(task, arg, &ctx.handoff_done, String::new())).unwrap();
                    copied.store(got, Ordering::SeqCst);
                });
                Ok::<(), ()>(())
            }))
            .unwrap();
        });

        assert_eq!(copied.load(Ordering::SeqCst), 250);
        assert_eq!(sup.tasks().count_in(TaskState::Terminated), 1);
    }

    /// 子任务在独立线程上运行 fan_out_reader
    fn run_fan_out<'a>(sup: &'a Supervisor, launcher: &TaskHandle<'_>, msg: &'a Message) -> (String, String) {
        let ctx = sup.context();
        let child_out = Mutex::new(String::new());
        let mut out = String::new();

        thread::scope(|s| {
            block_on(sup.fan_out_demo(launcher, msg, &mut out, |task, msg| {
                let child_out = &child_out;
                s.spawn(move || {
                    let mut console = String::new();
                    block_on(fan_out_reader(task, msg, &ctx.fan_out_done, &mut console, Duration::from_millis(2)))
                        .unwrap();
                    child_out.lock().unwrap().push_str(&console);
                });
                Ok::<(), ()>(())
            }))
            .unwrap();
        });

        let child_out = child_out.into_inner().unwrap();
        (out, child_out)
    }

    #[test]
    fn test_fan_out_demo() {
        let sup = Supervisor::new();
        let launcher = sup.launcher().unwrap();
        let msg = Message::new("All your base", 13);

        let (out, children) = run_fan_out(&sup, &launcher, &msg);

        assert_eq!(out, "All tasks created\n");
        assert_eq!(children.matches("Received: All your base | len: 13\n").count(), FAN_OUT_TASKS);
        assert_eq!(sup.tasks().count_in(TaskState::Terminated), FAN_OUT_TASKS);
    }

    #[test]
    fn test_fan_out_demo_repeats_with_full_resident_set() {
        let sup = Supervisor::new();
        let launcher = sup.launcher().unwrap();
        for _ in 0..8 {
            sup.spawn(TaskSpec::new("resident"), |_| Ok::<(), ()>(())).unwrap();
        }
        let msg = Message::new("All your base", 13);

        // 四轮共需 20 个子任务槽位，超过空槽数，只能靠回收已结束的槽位
        for _ in 0..4 {
            let (out, _) = run_fan_out(&sup, &launcher, &msg);
            assert_eq!(out, "All tasks created\n");
        }
        assert_eq!(sup.tasks().count_in(TaskState::Ready), 8);
        assert_eq!(sup.context().fan_out_done.count(), 0);
    }

    #[test]
    fn test_fan_out_demo_stops_at_rejected_spawn() {
        let sup = Supervisor::new();
        let launcher = sup.launcher().unwrap();
        let msg = Message::new("All your base", 13);
        let ctx = sup.context();
        let mut launched = 0;

        let result = thread::scope(|s| {
            block_on(sup.fan_out_demo(&launcher, &msg, &mut String::new(), |task, msg| {
                if launched == 2 {
                    return Err("pool exhausted");
                }
                launched += 1;
                s.spawn(move || {
                    block_on(fan_out_reader(task, msg, &ctx.fan_out_done, String::new(), Duration::from_millis(1)))
                        .unwrap();
                });
                Ok(())
            }))
        });

        assert_eq!(result, Err(CoordError::AllocationFailure));
        // 已启动的两个子任务复制完毕并自行结束，被拒绝的那个已撤销
        assert_eq!(sup.tasks().count_in(TaskState::Terminated), 2);
        assert_eq!(sup.tasks().count_in(TaskState::Ready), 0);
    }
}
