//! 外部接口
//!
//! 任务只依赖这里的抽象，不直接触碰外设:
//! - 字节输入: [`ByteSource`]，非阻塞地"有就读一个字节"
//! - 文本输出: `core::fmt::Write`
//! - 数字输出: `embedded_hal::digital::OutputPin`
//! - 延时: `embedded_hal_async::delay::DelayNs`

/// 非阻塞字节输入
pub trait ByteSource {
    /// 读取一个字节; 没有可用数据时返回 `None`
    fn read_byte(&mut self) -> Option<u8>;
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn read_byte(&mut self) -> Option<u8> {
        (**self).read_byte()
    }
}

/// 按字节写入控制台 (回显原始输入)
pub fn write_bytes<W: core::fmt::Write>(out: &mut W, bytes: &[u8]) -> core::fmt::Result {
    for &b in bytes {
        out.write_char(b as char)?;
    }
    Ok(())
}
