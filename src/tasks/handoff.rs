//! 启动参数交接
//!
//! 创建者把自己持有的参数的引用交给新启动的子任务，必须保证子任务复制完成之前
//! 该参数不被覆盖或离开作用域。创建者侧和子任务侧各有一半:
//!
//! | 创建者 | 子任务 | 同步方式 |
//! |---|---|---|
//! | [`hand_off`] | [`read_argument`] | 互斥锁: 创建者先占锁，启动子任务后以无限等待再次占锁; 子任务复制后释放 |
//! | [`hand_off_signalled`] | [`copy_and_signal`] | 二值信号量 (初值 0): 子任务复制后释放，创建者等待 |
//! | [`fan_out`] | [`copy_and_signal`] | 计数信号量: N 个子任务各自复制后释放一次，创建者获取 N 次 |
//!
//! 子任务由 `launch` 交给执行器独立调度，创建者只在同步原语上等待。
//! 创建者侧函数返回后参数可以被覆盖。

use core::fmt::Write;

use embassy_time::{Duration, Timer};

use crate::config::SEND_TIMEOUT_MS;
use crate::error::{CoordError, CoordResult};
use crate::message::{Message, RateChannel};
use crate::sync::{CountingSemaphore, MutualExclusionLock, Wait};
use crate::tasks::task::{TaskHandle, TaskId};
use crate::util::log::*;

/// 子任务侧: 复制参数，然后释放创建者持有的锁
pub fn read_argument<T: Copy>(arg: &T, lock: &MutualExclusionLock<()>) -> CoordResult<T> {
    let value = *arg;
    lock.release()?;
    Ok(value)
}

/// 子任务侧: 复制参数，然后释放一次信号量
pub fn copy_and_signal<T: Clone>(arg: &T, done: &CountingSemaphore) -> T {
    let value = arg.clone();
    done.release();
    value
}

/// 经互斥锁交接参数
///
/// `launch` 把子任务交给执行器; 子任务必须调用 [`read_argument`]。
/// 返回时子任务已持有副本
pub async fn hand_off<'a, T>(
    lock: &MutualExclusionLock<()>,
    creator: TaskId,
    arg: &'a T,
    launch: impl FnOnce(&'a T) -> CoordResult<()>,
) -> CoordResult<()> {
    // 预先占锁; 锁已被占用说明另一次交接尚未完成
    lock.take(creator, Wait::NoWait)
        .await
        .map_err(|_| CoordError::InvariantViolation("handoff lock busy"))?;

    if let Err(e) = launch(arg) {
        lock.release()?;
        return Err(e);
    }

    // 子任务释放锁之前这里一直挂起
    lock.take(creator, Wait::Forever).await?;
    lock.release()?;
    log_debug!("argument handed off by task #{}", creator.0);
    Ok(())
}

/// 经二值信号量交接参数 (无需预先占有)
///
/// 子任务必须调用 [`copy_and_signal`]
pub async fn hand_off_signalled<'a, T>(
    done: &CountingSemaphore,
    arg: &'a T,
    launch: impl FnOnce(&'a T) -> CoordResult<()>,
) -> CoordResult<()> {
    launch(arg)?;
    done.acquire(Wait::Forever).await
}

/// 把同一个参数交给 `n` 个子任务
///
/// 信号量上限必须不小于 `n`，否则多余的释放被吞掉，创建者永远等不齐。
/// 中途启动失败时仍等待已启动的子任务复制完毕，再返回该错误
pub async fn fan_out<'a, T>(
    done: &CountingSemaphore,
    arg: &'a T,
    n: usize,
    mut launch: impl FnMut(&'a T) -> CoordResult<()>,
) -> CoordResult<()> {
    if (done.max() as usize) < n {
        return Err(CoordError::InvariantViolation("fan-out semaphore max below task count"));
    }

    let mut launched = 0;
    let mut failure = None;
    for _ in 0..n {
        match launch(arg) {
            Ok(()) => launched += 1,
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    for _ in 0..launched {
        done.acquire(Wait::Forever).await?;
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// ===== 子任务例程 =====

/// 经锁交接收到延时后转交闪烁任务的一次性子任务
///
/// 复制参数、打印 `Received: <n>`、把延时发到速率通道，然后结束
pub async fn delay_receiver<W: Write>(
    task: TaskHandle<'_>,
    arg: &u32,
    lock: &MutualExclusionLock<()>,
    rates: &RateChannel,
    mut console: W,
) -> CoordResult<u32> {
    task.start()?;
    let delay = read_argument(arg, lock)?;
    let _ = writeln!(console, "Received: {}", delay);

    if let Err(e) = task.suspend(rates.send(delay, Wait::millis(SEND_TIMEOUT_MS))).await {
        log_skipped!("handed-off delay", e);
    }
    task.terminate()?;
    Ok(delay)
}

/// 经二值信号量接收参数的一次性子任务
pub async fn signalled_receiver<W: Write>(
    task: TaskHandle<'_>,
    arg: &u32,
    done: &CountingSemaphore,
    mut console: W,
) -> CoordResult<u32> {
    task.start()?;
    let value = copy_and_signal(arg, done);
    let _ = writeln!(console, "Received: {}", value);
    task.terminate()?;
    Ok(value)
}

/// 扇出演示的一次性子任务
///
/// 复制消息后立即释放信号量，打印副本，停留 `linger` 后结束
pub async fn fan_out_reader<W: Write>(
    task: TaskHandle<'_>,
    msg: &Message,
    done: &CountingSemaphore,
    mut console: W,
    linger: Duration,
) -> CoordResult<Message> {
    task.start()?;
    let copy = copy_and_signal(msg, done);
    let _ = writeln!(console, "Received: {} | len: {}", copy.body(), copy.count);
    task.suspend(Timer::after(linger)).await;
    task.terminate()?;
    Ok(copy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RATE_QUEUE_LEN;
    use crate::tasks::task::{TaskSpec, TaskState, TaskTable};
    use embassy_futures::block_on;
    use portable_atomic::{AtomicU32, Ordering};
    use std::string::String;
    use std::sync::Mutex;
    use std::thread;
    use std::vec::Vec;

    const CREATOR: TaskId = TaskId(0);

    /// 登记并置为 Ready，与 Supervisor::spawn 一致
    fn ready<'t>(table: &'t TaskTable, name: &'static str) -> TaskHandle<'t> {
        let task = table.register(TaskSpec::new(name)).unwrap();
        task.transition(TaskState::Ready).unwrap();
        task
    }

    #[test]
    fn test_child_copies_before_creator_resumes() {
        let table = TaskTable::new();
        let lock = MutualExclusionLock::new(());
        let rates = RateChannel::new();
        let copied = AtomicU32::new(0);
        let local = 750u32;

        thread::scope(|s| {
            block_on(hand_off(&lock, CREATOR, &local, |arg| {
                let child = ready(&table, "handoff");
                let (lock, rates, copied) = (&lock, &rates, &copied);
                s.spawn(move || {
                    // 子任务晚于创建者开始运行
                    thread::sleep(std::time::Duration::from_millis(20));
                    let got = block_on(delay_receiver(child, arg, lock, rates, String::new())).unwrap();
                    copied.store(got, Ordering::SeqCst);
                });
                Ok(())
            }))
            .unwrap();

            // 创建者恢复时子任务一定已经复制
            assert!(!lock.is_locked());
        });

        assert_eq!(copied.load(Ordering::SeqCst), 750);
        assert_eq!(rates.try_receive(), Some(750));
        assert_eq!(table.count_in(TaskState::Terminated), 1);
    }

    #[test]
    fn test_creator_blocks_until_release() {
        let lock = MutualExclusionLock::new(());
        let events = Mutex::new(Vec::new());
        let arg = 42u32;

        thread::scope(|s| {
            block_on(hand_off(&lock, CREATOR, &arg, |arg| {
                let (lock, events) = (&lock, &events);
                s.spawn(move || {
                    thread::sleep(std::time::Duration::from_millis(10));
                    events.lock().unwrap().push("child copied");
                    read_argument(arg, lock).unwrap();
                });
                Ok(())
            }))
            .unwrap();
            events.lock().unwrap().push("creator resumed");
        });

        assert_eq!(*events.lock().unwrap(), ["child copied", "creator resumed"]);
    }

    #[test]
    fn test_failed_launch_releases_lock() {
        let lock = MutualExclusionLock::new(());
        let result = block_on(hand_off(&lock, CREATOR, &1u8, |_| Err(CoordError::AllocationFailure)));
        assert_eq!(result, Err(CoordError::AllocationFailure));
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_handoff_rejects_busy_lock() {
        let lock = MutualExclusionLock::new(());
        block_on(lock.take(TaskId(9), Wait::NoWait)).unwrap();
        assert!(matches!(
            block_on(hand_off(&lock, CREATOR, &1u8, |_| Ok(()))),
            Err(CoordError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_signalled_handoff() {
        let table = TaskTable::new();
        let done = CountingSemaphore::binary();
        let out = Mutex::new(String::new());

        thread::scope(|s| {
            block_on(hand_off_signalled(&done, &250u32, |arg| {
                let child = ready(&table, "signalled");
                let (done, out) = (&done, &out);
                s.spawn(move || {
                    let mut console = String::new();
                    block_on(signalled_receiver(child, arg, done, &mut console)).unwrap();
                    out.lock().unwrap().push_str(&console);
                });
                Ok(())
            }))
            .unwrap();
        });

        assert_eq!(*out.lock().unwrap(), "Received: 250\n");
        assert_eq!(done.count(), 0);
    }

    #[test]
    fn test_fan_out_copies_to_all() {
        let table = TaskTable::new();
        let done = CountingSemaphore::new(5, 0);
        let msg = Message::new("All your base", 13);
        let copies = Mutex::new(Vec::new());

        thread::scope(|s| {
            block_on(fan_out(&done, &msg, 5, |arg| {
                let child = ready(&table, "fan-out");
                let (done, copies) = (&done, &copies);
                s.spawn(move || {
                    let copy =
                        block_on(fan_out_reader(child, arg, done, String::new(), Duration::from_millis(5)))
                            .unwrap();
                    copies.lock().unwrap().push(copy);
                });
                Ok(())
            }))
            .unwrap();
        });

        let copies = copies.lock().unwrap();
        assert_eq!(copies.len(), 5);
        assert!(copies.iter().all(|m| *m == msg));
        assert_eq!(done.count(), 0);
        assert_eq!(table.count_in(TaskState::Terminated), 5);
    }

    #[test]
    fn test_fan_out_waits_for_launched_children_on_failure() {
        let done = CountingSemaphore::new(3, 0);
        let mut launched = 0;

        let result = block_on(fan_out(&done, &7u32, 3, |arg| {
            if launched == 2 {
                return Err(CoordError::AllocationFailure);
            }
            launched += 1;
            copy_and_signal(arg, &done);
            Ok(())
        }));

        assert_eq!(result, Err(CoordError::AllocationFailure));
        assert_eq!(done.count(), 0);
    }

    #[test]
    fn test_fan_out_needs_enough_permits() {
        let done = CountingSemaphore::new(2, 0);
        assert!(block_on(fan_out(&done, &1u32, 3, |_| Ok(()))).is_err());
    }

    #[test]
    fn test_full_rate_queue_does_not_block_receiver() {
        let table = TaskTable::new();
        let lock = MutualExclusionLock::new(());
        let rates = RateChannel::new();
        for n in 0..RATE_QUEUE_LEN as u32 {
            rates.try_send(n).unwrap();
        }

        let child = ready(&table, "handoff");
        block_on(lock.take(CREATOR, Wait::NoWait)).unwrap();
        let got = block_on(delay_receiver(child, &500, &lock, &rates, String::new())).unwrap();

        assert_eq!(got, 500);
        assert!(!lock.is_locked());
        assert_eq!(child.state(), Some(TaskState::Terminated));
    }
}
