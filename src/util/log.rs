//! 条件编译日志系统
//!
//! 根据 feature 选择不同的日志后端:
//! - `log-defmt`: 使用 defmt (高效二进制日志)
//! - `dev` / `log-println`: 使用 esp-println (文本日志)
//! - 主机测试: 输出到 std 标准输出
//! - 默认 (release): 不产生任何输出，但参数仍参与类型检查
//!
//! # 日志级别
//! - `log_error!`: 错误信息 (InvariantViolation 等缺陷)
//! - `log_warn!`: 警告信息 (丢弃消息、超时)
//! - `log_info!`: 一般信息
//! - `log_debug!`: 调试信息
//! - `log_trace!`: 详细跟踪

// ===================================================================
// defmt 后端 (feature = "log-defmt")
// ===================================================================
#[cfg(feature = "log-defmt")]
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { defmt::info!($($arg)*) };
}

#[cfg(feature = "log-defmt")]
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { defmt::debug!($($arg)*) };
}

#[cfg(feature = "log-defmt")]
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { defmt::warn!($($arg)*) };
}

#[cfg(feature = "log-defmt")]
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { defmt::error!($($arg)*) };
}

#[cfg(feature = "log-defmt")]
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => { defmt::trace!($($arg)*) };
}

// ===================================================================
// esp-println 后端 (feature = "dev" 或 "log-println")
// ===================================================================
#[cfg(all(any(feature = "dev", feature = "log-println"), not(feature = "log-defmt")))]
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { esp_println::println!("[INFO] {}", format_args!($($arg)*)) };
}

#[cfg(all(any(feature = "dev", feature = "log-println"), not(feature = "log-defmt")))]
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { esp_println::println!("[DEBUG] {}", format_args!($($arg)*)) };
}

#[cfg(all(any(feature = "dev", feature = "log-println"), not(feature = "log-defmt")))]
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { esp_println::println!("[WARN] {}", format_args!($($arg)*)) };
}

#[cfg(all(any(feature = "dev", feature = "log-println"), not(feature = "log-defmt")))]
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { esp_println::println!("[ERROR] {}", format_args!($($arg)*)) };
}

#[cfg(all(any(feature = "dev", feature = "log-println"), not(feature = "log-defmt")))]
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => { esp_println::println!("[TRACE] {}", format_args!($($arg)*)) };
}

// ===================================================================
// 主机测试后端
// ===================================================================
#[cfg(all(test, not(any(feature = "dev", feature = "log-defmt", feature = "log-println"))))]
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { std::println!("[INFO] {}", format_args!($($arg)*)) };
}

#[cfg(all(test, not(any(feature = "dev", feature = "log-defmt", feature = "log-println"))))]
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { std::println!("[DEBUG] {}", format_args!($($arg)*)) };
}

#[cfg(all(test, not(any(feature = "dev", feature = "log-defmt", feature = "log-println"))))]
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { std::println!("[WARN] {}", format_args!($($arg)*)) };
}

#[cfg(all(test, not(any(feature = "dev", feature = "log-defmt", feature = "log-println"))))]
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { std::println!("[ERROR] {}", format_args!($($arg)*)) };
}

#[cfg(all(test, not(any(feature = "dev", feature = "log-defmt", feature = "log-println"))))]
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => { std::println!("[TRACE] {}", format_args!($($arg)*)) };
}

// ===================================================================
// 空实现 (release 模式，无日志 feature)
// ===================================================================
#[cfg(not(any(test, feature = "dev", feature = "log-defmt", feature = "log-println")))]
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

#[cfg(not(any(test, feature = "dev", feature = "log-defmt", feature = "log-println")))]
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

#[cfg(not(any(test, feature = "dev", feature = "log-defmt", feature = "log-println")))]
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

#[cfg(not(any(test, feature = "dev", feature = "log-defmt", feature = "log-println")))]
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

#[cfg(not(any(test, feature = "dev", feature = "log-defmt", feature = "log-println")))]
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{ let _ = format_args!($($arg)*); }};
}

// ===================================================================
// 便捷重导出
// ===================================================================
pub use crate::{log_debug, log_error, log_info, log_trace, log_warn};

// ===================================================================
// 可恢复错误的统一记录
// ===================================================================

/// 记录一次可恢复的失败 (Full / Empty / Timeout)，任务随后继续循环
#[macro_export]
macro_rules! log_skipped {
    ($what:expr, $err:expr) => {
        $crate::log_warn!("{}: {} (skipped)", $what, $err)
    };
}

pub use crate::log_skipped;
