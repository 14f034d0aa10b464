//! TCP 段类型
//!
//! 定义仿真中传输的 TCP 段。段可以携带数据或 ACK；载荷只以
//! 字节数建模，不携带实际数据。

use super::id::NodeId;
use std::cmp::Ordering;

/// TCP 段。创建后不再修改（接收端缓存乱序段时克隆一份）。
///
/// 不变式：`is_ack ⇔ ack_seq >= 0`。
#[derive(Debug, Clone)]
pub struct Segment {
    /// 目的节点
    pub dst: NodeId,
    /// 数据序号：本段第一个字节的序号（从 0 计），无数据时为 -1
    pub seq: i64,
    /// 数据长度（字节）
    pub len: i64,
    /// 确认序号：接收端期待的下一个字节，非 ACK 时为 -1
    pub ack_seq: i64,
    /// 是否携带 ACK
    pub is_ack: bool,
    /// 发送方通告的接收窗口（字节）
    pub rcv_window: i64,
    /// 发出时刻（tick）。重传段置为 -1，对重传段不做 RTT 采样。
    pub timestamp: f64,
    /// 段是否被损坏（路由器按丢包率设置；接收端静默丢弃）
    pub in_error: bool,
}

impl Segment {
    /// 纯数据段
    pub fn data(dst: NodeId, rcv_window: i64, seq: i64, len: i64) -> Self {
        Self {
            dst,
            seq,
            len,
            ack_seq: -1,
            is_ack: false,
            rcv_window,
            timestamp: -1.0,
            in_error: false,
        }
    }

    /// 纯确认段（零长度载荷）
    pub fn ack(dst: NodeId, rcv_window: i64, ack_seq: i64) -> Self {
        Self {
            dst,
            seq: -1,
            len: 0,
            ack_seq,
            is_ack: true,
            rcv_window,
            timestamp: -1.0,
            in_error: false,
        }
    }
}

// 段按数据序号排序，接收端据此在乱序缓冲中补洞。
impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seq.cmp(&other.seq)
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Segment {}
