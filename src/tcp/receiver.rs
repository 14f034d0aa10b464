//! TCP 接收端
//!
//! 按序到达的段推进 `next_byte_expected` 并合并进一个累积 ACK，
//! 由延迟 ACK 计时器在本 tick 结束时发出；乱序到达的段进入
//! 乱序缓冲并立即触发一个重复 ACK。带损坏标记的段静默丢弃，
//! 这正是丢包的建模方式。
//!
//! 因为时钟粒度是一个 RTT，延迟 ACK 计时器不按真实 TCP 的
//! 200ms 实现：同一 tick 内按序到达的所有段合并成一个累积 ACK。

use tracing::{debug, trace, warn};

use crate::net::{Link, NodeId, Segment};
use crate::sim::{SimClock, Timer, TimerHandle, TimerKind, TimerOwner, TimerRole};

/// TCP 接收端协议模块
#[derive(Debug)]
pub struct Receiver {
    /// 本端节点
    node: NodeId,
    /// 对端（ACK 的目的地）
    remote: NodeId,
    /// 为乱序缓冲分配的最大接收窗口（字节）
    max_rcv_window: i64,
    /// 当前接收窗口（字节），随乱序缓冲占用变化
    current_rcv_window: i64,
    /// 乱序段缓冲
    rcv_buffer: Vec<Segment>,
    /// 待发出的累积 ACK（至多一个）
    cumulative_ack: Option<Segment>,
    /// 延迟 ACK 计时器句柄
    delayed_ack_handle: Option<TimerHandle>,
    /// 按序收到的最后一个字节，字节从 0 编号
    last_byte_recvd: i64,
    /// 期待的下一个字节
    next_byte_expected: i64,
}

impl Receiver {
    pub fn new(node: NodeId, remote: NodeId, rcv_window: i64) -> Self {
        Self {
            node,
            remote,
            max_rcv_window: rcv_window,
            current_rcv_window: rcv_window,
            rcv_buffer: Vec::new(),
            cumulative_ack: None,
            delayed_ack_handle: None,
            last_byte_recvd: -1,
            next_byte_expected: 0,
        }
    }

    /// 当前接收窗口（字节）
    pub fn current_rcv_window(&self) -> i64 {
        self.current_rcv_window
    }

    pub fn max_rcv_window(&self) -> i64 {
        self.max_rcv_window
    }

    pub fn next_byte_expected(&self) -> i64 {
        self.next_byte_expected
    }

    pub fn last_byte_received(&self) -> i64 {
        self.last_byte_recvd
    }

    /// 当前缓冲的乱序段（供调试与测试使用）
    pub fn buffered_segments(&self) -> &[Segment] {
        &self.rcv_buffer
    }

    fn owner(&self) -> TimerOwner {
        TimerOwner {
            node: self.node,
            role: TimerRole::Receiver,
        }
    }

    /// 处理从发送端收到的数据段。
    ///
    /// 按序段并入累积 ACK；乱序段先冲掉挂起的累积 ACK，
    /// 然后缓冲并立即回一个重复 ACK。损坏的段静默丢弃。
    pub fn handle(&mut self, segment: Segment, clock: &mut SimClock, link: &mut Link) {
        if segment.in_error {
            debug!(seq = segment.seq, "丢弃损坏的段");
            return;
        }

        if segment.seq == self.next_byte_expected {
            // 按序到达
            self.next_byte_expected = segment.seq + segment.len;
            if self.rcv_buffer.is_empty() {
                self.last_byte_recvd = segment.seq + segment.len - 1;
            } else {
                // 本段可能补上了缺口，检查缓冲里的段是否跟着变为按序
                self.drain_buffered();
            }

            if let Some(ack) = self.cumulative_ack.as_mut() {
                // 已有累积 ACK 在等，只更新它的参数
                ack.rcv_window = self.current_rcv_window;
                ack.ack_seq = self.next_byte_expected;
                ack.timestamp = segment.timestamp;
            } else {
                let mut ack =
                    Segment::ack(self.remote, self.current_rcv_window, self.next_byte_expected);
                // 把数据段的时间戳原样带回，供发送端做 RTT 采样
                ack.timestamp = segment.timestamp;
                self.cumulative_ack = Some(ack);

                // 计时器定在当前时刻：时钟粒度是一个 RTT，
                // 到期检查发生在本 tick 末尾。
                let timer = Timer {
                    owner: self.owner(),
                    kind: TimerKind::DelayedAck,
                    fire_at: clock.now(),
                };
                match clock.set_timeout_at(timer) {
                    Ok(handle) => self.delayed_ack_handle = Some(handle),
                    Err(e) => warn!(error = %e, "延迟 ACK 计时器注册失败"),
                }
            }
        } else {
            // 乱序到达：延迟 ACK 计时器可能还没到期，
            // 先把挂起的累积 ACK 发出去……
            self.send_cumulative_ack(clock, link);
            // ……再立即发一个重复 ACK
            let dup_ack = self.buffer_out_of_order(segment);
            link.send(self.node, dup_ack);
        }

        debug!(
            last_byte_recvd = self.last_byte_recvd,
            next_byte_expected = self.next_byte_expected,
            current_rcv_window = self.current_rcv_window,
            "接收端状态"
        );
    }

    /// 计时器到期回调。接收端只运行延迟 ACK 计时器。
    pub fn timer_expired(&mut self, kind: TimerKind, clock: &mut SimClock, link: &mut Link) {
        match kind {
            TimerKind::DelayedAck => {
                self.delayed_ack_handle = None;
                self.send_cumulative_ack(clock, link);
            }
            _ => warn!(kind = ?kind, "接收端收到意外的计时器种类"),
        }
    }

    /// 发出挂起的累积 ACK（若有），并取消还在运行的延迟 ACK 计时器。
    fn send_cumulative_ack(&mut self, clock: &mut SimClock, link: &mut Link) {
        if let Some(handle) = self.delayed_ack_handle.take() {
            if let Err(e) = clock.cancel_timeout(handle) {
                warn!(error = %e, "取消延迟 ACK 计时器失败");
            }
        }
        if let Some(ack) = self.cumulative_ack.take() {
            trace!(ack_seq = ack.ack_seq, rcv_window = ack.rcv_window, "发出累积 ACK");
            link.send(self.node, ack);
        }
    }

    /// 缓冲一个乱序段并生成对应的重复 ACK。
    ///
    /// 序号落在已交付范围内的迟到副本、以及已缓冲段的重复副本
    /// 不再占用缓冲，只触发重复 ACK；这样缓冲中的段两两不相交
    /// 且序号都在 `next_byte_expected` 之后。
    fn buffer_out_of_order(&mut self, segment: Segment) -> Segment {
        let fresh = segment.seq > self.next_byte_expected
            && !self.rcv_buffer.iter().any(|s| s.seq == segment.seq);
        if fresh {
            // 不能假设已缓冲的段序号都比这个小
            self.last_byte_recvd = self.last_byte_recvd.max(segment.seq + segment.len - 1);
            self.rcv_buffer.push(segment.clone());
            // 缓冲占了内存，缩小接收窗口。不能只减掉本段长度：
            // 本段可能逻辑上位于某个已缓冲段之前，内存早已被计入。
            self.current_rcv_window = (self.max_rcv_window
                - (self.last_byte_recvd - self.next_byte_expected))
                .clamp(0, self.max_rcv_window);
            trace!(
                seq = segment.seq,
                buffered = self.rcv_buffer.len(),
                "乱序段进入缓冲"
            );
        } else {
            trace!(seq = segment.seq, "乱序段是重复副本，不缓冲");
        }
        // 重复 ACK，立即发出；时间戳保持 -1
        Segment::ack(self.remote, self.current_rcv_window, self.next_byte_expected)
    }

    /// 检查先前乱序缓冲的段是否已变为按序，按序的前缀全部交付，
    /// 同时回收缓冲内存、扩大接收窗口。
    fn drain_buffered(&mut self) {
        self.rcv_buffer.sort();
        while let Some(front) = self.rcv_buffer.first() {
            if front.seq != self.next_byte_expected {
                // 剩下的都还是乱序的
                break;
            }
            self.next_byte_expected = front.seq + front.len;
            self.current_rcv_window = (self.max_rcv_window
                - (self.last_byte_recvd - self.next_byte_expected))
                .clamp(0, self.max_rcv_window);
            self.rcv_buffer.remove(0);
        }
    }
}
