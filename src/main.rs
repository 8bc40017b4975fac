//! coordrtos - ESP32-S3 固件入口
//!
//! 启动顺序:
//! 1. 硬件初始化，启动 esp-rtos 时间驱动
//! 2. 启动 Core1 执行器和高/中优先级 InterruptExecutor
//! 3. 按依赖顺序登记并启动各演示任务，按优先级和钉核放到对应执行器
//! 4. 等待全部任务完成初始化，运行参数交接和扇出演示
//! 5. 启动上下文退出
//!
//! 硬件目标: ESP32-S3
//! - LED: GPIO2 (队列驱动), GPIO4 (共享半周期驱动)
//! - UART0 (GPIO44/43): `delay <n>` 命令行
//! - UART1 (GPIO18/17): 纯整数命令行
//! - UART2 (GPIO16/15): 行回显

#![no_std]
#![no_main]

use core::cell::RefCell;

use critical_section::Mutex;
use embassy_executor::{SendSpawner, SpawnError, SpawnToken, Spawner};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Delay;
use esp_hal::{
    gpio::{Level, Output, OutputConfig},
    handler,
    interrupt::{software::SoftwareInterruptControl, InterruptHandler, Priority as IrqPriority},
    system::Stack,
    time::Duration as HalDuration,
    timer::{timg::TimerGroup, AnyTimer, OneShotTimer, PeriodicTimer},
    uart::{Config as UartConfig, Uart, UartRx},
    Blocking,
};
use esp_println::Printer;
use esp_rtos::embassy::{Executor, InterruptExecutor};
use static_cell::StaticCell;

use coordrtos::config::{
    TimerConfig, TimerMode, COUNTER_TIMER, HIGH_PRIORITY, LOW_PRIORITY, MID_PRIORITY, ONE_SHOT_LINGER,
    SAMPLE_TIMER,
};
use coordrtos::io::ByteSource;
use coordrtos::message::Message;
use coordrtos::tasks::blink::Blinker;
use coordrtos::tasks::cli::{CommandLine, Syntax};
use coordrtos::tasks::counter::Counter;
use coordrtos::tasks::deferred::{count_drainer, count_isr, sample_isr, sample_printer, SimulatedAdc};
use coordrtos::tasks::echo::{line_printer, LineReader};
use coordrtos::tasks::handoff::{delay_receiver, fan_out_reader, signalled_receiver};
use coordrtos::tasks::multicore::{CoreId, Workload};
use coordrtos::tasks::producer::{consumer, producer};
use coordrtos::tasks::Placement;
use coordrtos::{CoordError, CoordResult, Supervisor, TaskHandle, TaskSpec};
use coordrtos::{log_error, log_info};

esp_bootloader_esp_idf::esp_app_desc!();

// ===== Panic Handler =====
#[cfg(feature = "log-defmt")]
use defmt_rtt as _;

#[cfg(any(feature = "dev", feature = "log-println"))]
use esp_backtrace as _;

#[cfg(not(any(feature = "dev", feature = "log-println")))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

// ===== 静态分配 =====
/// 全部共享原语和任务表
static SUPERVISOR: Supervisor = Supervisor::new();

/// 高优先级执行器 - 中断延迟处理
static HIGH_PRIO_EXECUTOR: StaticCell<InterruptExecutor<2>> = StaticCell::new();

/// 中优先级执行器 - 命令行与闪烁
static MID_PRIO_EXECUTOR: StaticCell<InterruptExecutor<3>> = StaticCell::new();

/// Core1 执行器及其栈
static CORE1_EXECUTOR: StaticCell<Executor> = StaticCell::new();
static CORE1_STACK: StaticCell<Stack<8192>> = StaticCell::new();

/// Core1 执行器启动后把 spawner 交回 Core0
static CORE1_SPAWNER: Signal<CriticalSectionRawMutex, SendSpawner> = Signal::new();

/// 采样中断源
static ADC: SimulatedAdc = SimulatedAdc::new(0x1234_5678);

/// 硬件定时器 (ISR 中清除中断标志)
static SAMPLE_ALARM: Mutex<RefCell<Option<Alarm>>> = Mutex::new(RefCell::new(None));
static COUNT_ALARM: Mutex<RefCell<Option<Alarm>>> = Mutex::new(RefCell::new(None));

/// 交接和扇出演示的参数 (子任务参数必须是 'static)
static HANDOFF_ARG: StaticCell<u32> = StaticCell::new();
static SIGNALLED_ARG: StaticCell<u32> = StaticCell::new();
static FAN_OUT_MSG: StaticCell<Message> = StaticCell::new();

/// 交接演示的参数值
const HANDOFF_VALUE: u32 = 750;
const SIGNALLED_VALUE: u32 = 250;

/// 扇出演示的消息
const FAN_OUT_TEXT: &str = "All your base";

/// spawn_all 启动的常驻任务数
const RESIDENT_TASKS: usize = 12;

// ===== 硬件定时器 =====
/// 按 `auto_reload` 选择的定时器
enum Alarm {
    Periodic(PeriodicTimer<'static, Blocking>),
    OneShot(OneShotTimer<'static, Blocking>),
}

impl Alarm {
    fn clear_interrupt(&mut self) {
        match self {
            Alarm::Periodic(timer) => timer.clear_interrupt(),
            Alarm::OneShot(timer) => timer.clear_interrupt(),
        }
    }
}

// ===== 中断处理: 只清标志并记入锁存器 =====
#[handler(priority = IrqPriority::Priority2)]
fn on_sample_alarm() {
    critical_section::with(|cs| {
        if let Some(alarm) = SAMPLE_ALARM.borrow_ref_mut(cs).as_mut() {
            alarm.clear_interrupt();
        }
    });
    sample_isr(&SUPERVISOR.context().samples, &ADC);
}

#[handler(priority = IrqPriority::Priority2)]
fn on_count_alarm() {
    critical_section::with(|cs| {
        if let Some(alarm) = COUNT_ALARM.borrow_ref_mut(cs).as_mut() {
            alarm.clear_interrupt();
        }
    });
    count_isr(&SUPERVISOR.context().counts);
}

/// 启动定时器并交给 ISR 保管
///
/// `auto_reload` 为 false 时只触发一次
fn arm_alarm(
    slot: &'static Mutex<RefCell<Option<Alarm>>>,
    timer: AnyTimer<'static>,
    config: TimerConfig,
    isr: InterruptHandler,
) -> CoordResult<()> {
    let period = config.period()?;
    let timeout = HalDuration::from_micros(period.as_micros());
    let out_of_range = |_| CoordError::InvariantViolation("timer period out of range");

    let alarm = match config.mode() {
        TimerMode::Periodic => {
            let mut timer = PeriodicTimer::new(timer);
            timer.set_interrupt_handler(isr);
            timer.listen();
            timer.start(timeout).map_err(out_of_range)?;
            Alarm::Periodic(timer)
        }
        TimerMode::OneShot => {
            let mut timer = OneShotTimer::new(timer);
            timer.set_interrupt_handler(isr);
            timer.listen();
            timer.schedule(timeout).map_err(out_of_range)?;
            Alarm::OneShot(timer)
        }
    };
    critical_section::with(|cs| slot.borrow_ref_mut(cs).replace(alarm));
    log_info!("timer armed ({:?}), period {} us", config.mode(), period.as_micros());
    Ok(())
}

// ===== UART 输入 =====
/// 非阻塞读取 UART 接收端
struct UartInput(UartRx<'static, Blocking>);

impl ByteSource for UartInput {
    fn read_byte(&mut self) -> Option<u8> {
        if !self.0.read_ready() {
            return None;
        }
        let mut byte = [0u8; 1];
        match self.0.read(&mut byte) {
            Ok(1) => Some(byte[0]),
            _ => None,
        }
    }
}

/// 打开一个 UART，只保留接收端 (输出经 esp-println)
fn open_uart<'d>(
    uart: impl esp_hal::uart::Instance + 'd,
    rx: impl esp_hal::gpio::interconnect::PeripheralInput<'d>,
    tx: impl esp_hal::gpio::interconnect::PeripheralOutput<'d>,
) -> CoordResult<UartRx<'d, Blocking>> {
    let uart = Uart::new(uart, UartConfig::default())
        .map_err(|_| CoordError::InvariantViolation("uart config rejected"))?
        .with_rx(rx)
        .with_tx(tx);
    let (rx, _tx) = uart.split();
    Ok(rx)
}

// ===== 执行器放置 =====
/// 各执行器的 spawner
#[derive(Clone, Copy)]
struct Executors {
    core1: SendSpawner,
    high: SendSpawner,
    mid: SendSpawner,
    low: SendSpawner,
}

impl Executors {
    fn placement(&self, spec: &TaskSpec) -> SendSpawner {
        match spec.placement() {
            Placement::Core1 => self.core1,
            Placement::High => self.high,
            Placement::Mid => self.mid,
            Placement::Low => self.low,
        }
    }

    /// 登记任务并交给对应执行器
    fn spawn<S: Send>(
        &self,
        spec: TaskSpec,
        task: impl FnOnce(TaskHandle<'static>) -> Result<SpawnToken<S>, SpawnError>,
    ) -> CoordResult<TaskHandle<'static>> {
        let spawner = self.placement(&spec);
        SUPERVISOR.spawn(spec, |handle| task(handle).map(|token| spawner.spawn(token)))
    }
}

// ===== 常驻任务 =====
#[embassy_executor::task]
async fn cli_task(task: TaskHandle<'static>, input: UartInput) {
    let ctx = SUPERVISOR.context();
    CommandLine::new(input, Printer, &ctx.rates)
        .with_messages(&ctx.messages)
        .run(task)
        .await
}

#[embassy_executor::task]
async fn blink_task(task: TaskHandle<'static>, led: Output<'static>) {
    let ctx = SUPERVISOR.context();
    Blinker::new(led, Delay, &ctx.rates)
        .with_messages(&ctx.messages)
        .run(task)
        .await
}

/// 纯整数命令行，写共享半周期
#[embassy_executor::task]
async fn number_cli_task(task: TaskHandle<'static>, input: UartInput) {
    CommandLine::new(input, Printer, &SUPERVISOR.context().shared_rate)
        .with_syntax(Syntax::PlainNumber)
        .run(task)
        .await
}

/// 每个周期读一次共享半周期
#[embassy_executor::task]
async fn shared_blink_task(task: TaskHandle<'static>, led: Output<'static>) {
    Blinker::new(led, Delay, &SUPERVISOR.context().shared_rate)
        .run(task)
        .await
}

#[embassy_executor::task]
async fn line_reader_task(task: TaskHandle<'static>, input: UartInput) {
    let ctx = SUPERVISOR.context();
    LineReader::new(input, Printer, &ctx.line_pool, &ctx.lines)
        .run(task)
        .await
}

#[embassy_executor::task]
async fn line_printer_task(task: TaskHandle<'static>) {
    line_printer(&SUPERVISOR.context().lines, Printer, task).await
}

#[embassy_executor::task(pool_size = 2)]
async fn counter_task(task: TaskHandle<'static>, seed: u32) {
    Counter::new(&SUPERVISOR.context().counter, Delay, Printer, seed)
        .run(task)
        .await
}

#[embassy_executor::task]
async fn producer_task(task: TaskHandle<'static>) {
    producer(&SUPERVISOR.context().numbers, Printer, task).await
}

#[embassy_executor::task]
async fn consumer_task(task: TaskHandle<'static>) {
    consumer(&SUPERVISOR.context().numbers, Printer, task).await
}

#[embassy_executor::task]
async fn sample_task(task: TaskHandle<'static>) {
    sample_printer(&SUPERVISOR.context().samples, Printer, task).await
}

#[embassy_executor::task]
async fn drain_task(task: TaskHandle<'static>) {
    count_drainer(&SUPERVISOR.context().counts, Printer, task).await
}

// ===== 一次性子任务 =====
/// 经锁交接收到延时，转交闪烁任务后结束
#[embassy_executor::task]
async fn handoff_task(task: TaskHandle<'static>, arg: &'static u32) {
    let ctx = SUPERVISOR.context();
    if let Err(e) = delay_receiver(task, arg, &ctx.handoff, &ctx.rates, Printer).await {
        task.halt(e).await
    }
}

#[embassy_executor::task]
async fn signalled_task(task: TaskHandle<'static>, arg: &'static u32) {
    if let Err(e) = signalled_receiver(task, arg, &SUPERVISOR.context().handoff_done, Printer).await {
        task.halt(e).await
    }
}

/// 池大小与 FAN_OUT_TASKS 一致
#[embassy_executor::task(pool_size = 5)]
async fn fan_out_task(task: TaskHandle<'static>, msg: &'static Message) {
    let done = &SUPERVISOR.context().fan_out_done;
    if let Err(e) = fan_out_reader(task, msg, done, Printer, ONE_SHOT_LINGER).await {
        task.halt(e).await
    }
}

/// 常驻任务的外设
struct Board {
    led: Output<'static>,
    shared_led: Output<'static>,
    commands: UartInput,
    numbers: UartInput,
    echo: UartInput,
}

/// 按依赖顺序启动常驻任务，返回启动数量
///
/// 消费者先于生产者，闪烁任务先于命令行，行打印先于行读取
fn spawn_all(exec: &Executors, board: Board) -> CoordResult<usize> {
    let mut started = 0;
    let mut count = |r: CoordResult<TaskHandle<'static>>| r.map(|_| started += 1);

    count(exec.spawn(TaskSpec::new("samples").priority(HIGH_PRIORITY), sample_task))?;
    count(exec.spawn(TaskSpec::new("drain").priority(LOW_PRIORITY), drain_task))?;
    count(exec.spawn(TaskSpec::new("blink").priority(MID_PRIORITY), |task| {
        blink_task(task, board.led)
    }))?;
    count(exec.spawn(TaskSpec::new("cli").priority(MID_PRIORITY), |task| {
        cli_task(task, board.commands)
    }))?;
    count(exec.spawn(
        TaskSpec::new("shared-blink").workload(Workload::Io),
        |task| shared_blink_task(task, board.shared_led),
    ))?;
    count(exec.spawn(
        TaskSpec::new("number-cli").pinned(CoreId::Core1),
        |task| number_cli_task(task, board.numbers),
    ))?;
    count(exec.spawn(
        TaskSpec::new("line-printer").workload(Workload::Io),
        line_printer_task,
    ))?;
    count(exec.spawn(
        TaskSpec::new("line-reader").workload(Workload::Io),
        |task| line_reader_task(task, board.echo),
    ))?;
    count(exec.spawn(TaskSpec::new("consumer").priority(LOW_PRIORITY), consumer_task))?;
    count(exec.spawn(TaskSpec::new("producer").priority(LOW_PRIORITY), producer_task))?;
    for (name, seed) in [("counter-a", 0x2545_f491), ("counter-b", 0x9e37_79b9)] {
        count(exec.spawn(TaskSpec::new(name).priority(LOW_PRIORITY), |task| {
            counter_task(task, seed)
        }))?;
    }

    if started != RESIDENT_TASKS {
        return Err(CoordError::InvariantViolation("resident task count mismatch"));
    }
    Ok(started)
}

/// 依次运行锁交接、信号量交接和扇出演示
async fn run_demos(exec: &Executors, launcher: &TaskHandle<'static>) -> CoordResult<()> {
    let arg: &'static u32 = HANDOFF_ARG.init(HANDOFF_VALUE);
    SUPERVISOR
        .handoff_demo(launcher, arg, &mut Printer, |task, arg| {
            exec.placement(&task_spec(&task)).spawn(handoff_task(task, arg)?);
            Ok::<(), SpawnError>(())
        })
        .await?;

    let arg: &'static u32 = SIGNALLED_ARG.init(SIGNALLED_VALUE);
    SUPERVISOR
        .signalled_handoff_demo(launcher, arg, &mut Printer, |task, arg| {
            exec.placement(&task_spec(&task)).spawn(signalled_task(task, arg)?);
            Ok::<(), SpawnError>(())
        })
        .await?;

    let msg: &'static Message = FAN_OUT_MSG.init(Message::new(FAN_OUT_TEXT, FAN_OUT_TEXT.len() as u32));
    SUPERVISOR
        .fan_out_demo(launcher, msg, &mut Printer, |task, msg| {
            exec.placement(&task_spec(&task)).spawn(fan_out_task(task, msg)?);
            Ok::<(), SpawnError>(())
        })
        .await
}

/// 已登记任务的描述
fn task_spec(task: &TaskHandle<'static>) -> TaskSpec {
    SUPERVISOR
        .tasks()
        .spec(task.id())
        .unwrap_or(TaskSpec::new("one-shot"))
}

// ===== 主入口点 =====
#[esp_rtos::main]
async fn main(spawner: Spawner) {
    let peripherals = esp_hal::init(esp_hal::Config::default());

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_ints = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_ints.software_interrupt0);

    log_info!("{} v{} starting on ESP32-S3", coordrtos::NAME, coordrtos::VERSION);

    let launcher = match SUPERVISOR.launcher() {
        Ok(task) => task,
        Err(e) => {
            log_error!("launcher registration failed: {}", e);
            return;
        }
    };

    // 外设
    let consoles = open_uart(peripherals.UART0, peripherals.GPIO44, peripherals.GPIO43).and_then(|commands| {
        let numbers = open_uart(peripherals.UART1, peripherals.GPIO18, peripherals.GPIO17)?;
        let echo = open_uart(peripherals.UART2, peripherals.GPIO16, peripherals.GPIO15)?;
        Ok((commands, numbers, echo))
    });
    let (commands, numbers, echo) = match consoles {
        Ok(rx) => rx,
        Err(e) => launcher.halt(e).await,
    };
    let board = Board {
        led: Output::new(peripherals.GPIO2, Level::Low, OutputConfig::default()),
        shared_led: Output::new(peripherals.GPIO4, Level::Low, OutputConfig::default()),
        commands: UartInput(commands),
        numbers: UartInput(numbers),
        echo: UartInput(echo),
    };

    // Core1 执行器
    let stack = CORE1_STACK.init(Stack::new());
    esp_rtos::start_second_core(peripherals.CPU_CTRL, sw_ints.software_interrupt1, stack, || {
        let executor = CORE1_EXECUTOR.init(Executor::new());
        executor.run(|spawner| CORE1_SPAWNER.signal(spawner.make_send()));
    });
    let core1 = CORE1_SPAWNER.wait().await;
    log_info!("Core1 executor started");

    // 高/中优先级执行器
    let high_prio_executor = HIGH_PRIO_EXECUTOR.init(InterruptExecutor::new(sw_ints.software_interrupt2));
    let high = high_prio_executor.start(IrqPriority::Priority3);
    log_info!("High priority executor started (Priority3)");

    let mid_prio_executor = MID_PRIO_EXECUTOR.init(InterruptExecutor::new(sw_ints.software_interrupt3));
    let mid = mid_prio_executor.start(IrqPriority::Priority2);
    log_info!("Mid priority executor started (Priority2)");

    let exec = Executors {
        core1,
        high,
        mid,
        low: spawner.make_send(),
    };

    let started = match spawn_all(&exec, board) {
        Ok(n) => n,
        Err(e) => launcher.halt(e).await,
    };

    // 任务就绪后才开始产生中断
    if let Err(e) = SUPERVISOR.await_startup(started).await {
        launcher.halt(e).await
    }
    let timg1 = TimerGroup::new(peripherals.TIMG1);
    let armed = arm_alarm(&SAMPLE_ALARM, timg1.timer0.into(), SAMPLE_TIMER, on_sample_alarm)
        .and_then(|()| arm_alarm(&COUNT_ALARM, timg1.timer1.into(), COUNTER_TIMER, on_count_alarm));
    if let Err(e) = armed {
        launcher.halt(e).await
    }

    if let Err(e) = run_demos(&exec, &launcher).await {
        launcher.halt(e).await
    }

    if let Err(e) = SUPERVISOR.retire(launcher) {
        log_error!("launcher retire failed: {}", e);
    }
}
