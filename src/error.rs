//! 协调内核错误类型
//!
//! 所有原语共用同一个错误枚举，按处理策略分为两类:
//! - 可恢复: `Full` / `Empty` / `Timeout`，调用任务记录日志或跳过本轮循环
//! - 致命: `AllocationFailure` 丢弃触发消息; `InvariantViolation` 属于编程缺陷,
//!   受影响的任务必须可见地停止 (见 [`crate::tasks::TaskHandle::halt`])

use core::fmt;

/// 协调原语错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum CoordError {
    /// 通道已满，发送在超时内没有等到空位
    Full,
    /// 通道为空，接收在超时内没有等到数据
    Empty,
    /// 锁或信号量在超时内未获取
    Timeout,
    /// 固定容量资源 (内存池槽位、任务表、执行器任务池) 耗尽
    AllocationFailure,
    /// 违反不变量，例如释放未持有的锁
    InvariantViolation(&'static str),
}

impl CoordError {
    /// 是否为预期内、可在任务循环中直接跳过的错误
    #[inline]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, CoordError::Full | CoordError::Empty | CoordError::Timeout)
    }

    /// 是否为编程缺陷
    #[inline]
    pub const fn is_defect(&self) -> bool {
        matches!(self, CoordError::InvariantViolation(_))
    }
}

impl fmt::Display for CoordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordError::Full => f.write_str("channel full"),
            CoordError::Empty => f.write_str("channel empty"),
            CoordError::Timeout => f.write_str("wait timed out"),
            CoordError::AllocationFailure => f.write_str("allocation failed"),
            CoordError::InvariantViolation(what) => write!(f, "invariant violated: {}", what),
        }
    }
}

/// 协调内核结果别名
pub type CoordResult<T> = Result<T, CoordError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(CoordError::Full.is_recoverable());
        assert!(CoordError::Empty.is_recoverable());
        assert!(CoordError::Timeout.is_recoverable());
        assert!(!CoordError::AllocationFailure.is_recoverable());
        assert!(!CoordError::InvariantViolation("x").is_recoverable());
        assert!(CoordError::InvariantViolation("x").is_defect());
    }

    #[test]
    fn test_display() {
        let mut out: heapless::String<64> = heapless::String::new();
        core::fmt::write(&mut out, format_args!("{}", CoordError::InvariantViolation("unheld release")))
            .unwrap();
        assert_eq!(out.as_str(), "invariant violated: unheld release");
    }
}
