//! 双核亲和性
//!
//! 任务的"钉核"偏好。ESP32-S3 有两个核心:
//! - Core0 (PRO_CPU): 主逻辑、命令行
//! - Core1 (APP_CPU): IO 密集型、周期性演示任务
//!
//! 任务表只记录偏好并解析出目标核心，真正的执行器放置由板级入口完成。

/// CPU 核心标识
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum CoreId {
    /// Core0 (PRO_CPU) - 主核心
    Core0 = 0,
    /// Core1 (APP_CPU) - 应用核心
    Core1 = 1,
}

impl CoreId {
    /// 获取当前运行的核心
    #[cfg(feature = "board")]
    pub fn current() -> Self {
        use esp_hal::system::Cpu;

        match Cpu::current() {
            Cpu::ProCpu => CoreId::Core0,
            _ => CoreId::Core1,
        }
    }

    /// 获取当前运行的核心 (主机构建只有一个执行上下文)
    #[cfg(not(feature = "board"))]
    pub fn current() -> Self {
        CoreId::Core0
    }

    /// 获取另一个核心
    pub fn other(&self) -> Self {
        match self {
            CoreId::Core0 => CoreId::Core1,
            CoreId::Core1 => CoreId::Core0,
        }
    }
}

/// 任务负载类型 (用于自动分配)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum Workload {
    /// IO 密集型 (串口、GPIO)
    Io,
    /// 延迟敏感 (中断锁存消费者)
    Realtime,
    /// 后台演示
    Background,
    /// 通用
    General,
}

impl Workload {
    /// 是否为 IO 密集型
    pub fn is_io_intensive(&self) -> bool {
        matches!(self, Workload::Io)
    }
}

/// 钉核策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum CoreAssignment {
    /// 自动分配: 根据负载类型决定
    Auto {
        /// IO 密集型任务是否分配到 Core1
        io_on_core1: bool,
    },
    /// 手动指定核心
    Manual(CoreId),
    /// 任意核心 (调度器决定)
    Any,
}

impl Default for CoreAssignment {
    fn default() -> Self {
        CoreAssignment::Auto { io_on_core1: true }
    }
}

impl CoreAssignment {
    /// 自动分配 (IO 密集型任务在 Core1)
    pub const fn auto() -> Self {
        CoreAssignment::Auto { io_on_core1: true }
    }

    /// 钉在指定核心
    pub const fn pinned(core: CoreId) -> Self {
        CoreAssignment::Manual(core)
    }

    /// 解析为目标核心
    pub fn resolve(&self, workload: Workload) -> CoreId {
        match self {
            CoreAssignment::Auto { io_on_core1 } => {
                if workload.is_io_intensive() && *io_on_core1 {
                    CoreId::Core1
                } else {
                    CoreId::Core0
                }
            }
            CoreAssignment::Manual(core) => *core,
            CoreAssignment::Any => CoreId::current(),
        }
    }
}
