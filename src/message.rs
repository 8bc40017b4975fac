//! 队列消息类型
//!
//! 消息按值移动进出队列，发送方之后对本地副本的修改不影响已入队的内容。

use heapless::String;

use crate::config::{MSG_BODY_LEN, MSG_QUEUE_LEN, NUMBER_QUEUE_LEN, RATE_QUEUE_LEN};
use crate::sync::BoundedChannel;

/// 反馈消息: 固定长度正文 + 计数
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// 正文 (超长部分被截断)
    pub body: String<MSG_BODY_LEN>,
    /// 附带的计数
    pub count: u32,
}

impl Message {
    /// 创建消息，正文按字符边界截断到 `MSG_BODY_LEN` 字节
    pub fn new(body: &str, count: u32) -> Self {
        let mut text = String::new();
        for c in body.chars() {
            if text.push(c).is_err() {
                break;
            }
        }
        Self { body: text, count }
    }

    /// 正文
    pub fn body(&self) -> &str {
        self.body.as_str()
    }
}

/// 延时命令队列 (CLI → 闪烁任务)，单位毫秒
pub type RateChannel = BoundedChannel<u32, RATE_QUEUE_LEN>;

/// 反馈消息队列 (闪烁任务 → CLI)
pub type MessageChannel = BoundedChannel<Message, MSG_QUEUE_LEN>;

/// 整数演示队列
pub type NumberChannel = BoundedChannel<u32, NUMBER_QUEUE_LEN>;
