//! TCP 端点
//!
//! 把一个发送端和一个接收端组合成端点，并负责入站段的分发：
//! 带 ACK 标志的段交给发送端，带数据的段交给接收端（两者可以
//! 同时成立，ACK 允许捎带在数据段上）。

use tracing::trace;

use super::receiver::Receiver;
use super::sender::{Sender, SenderMetrics, TcpVariant};
use crate::net::{Link, NodeId, Segment};
use crate::sim::{SimClock, TimerOwner, TimerRole};

/// TCP 端点：一个发送端 + 一个接收端
#[derive(Debug)]
pub struct Endpoint {
    node: NodeId,
    sender: Sender,
    receiver: Receiver,
}

impl Endpoint {
    pub fn new(node: NodeId, remote: NodeId, variant: TcpVariant, rcv_window: i64) -> Self {
        Self {
            node,
            sender: Sender::new(node, remote, variant),
            receiver: Receiver::new(node, remote, rcv_window),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn sender_mut(&mut self) -> &mut Sender {
        &mut self.sender
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    /// 本端接收窗口，由接收端维护；发出的段带上它作为窗口通告
    pub fn local_rcv_window(&self) -> i64 {
        self.receiver.current_rcv_window()
    }

    /// 应用层提交一段字节流，立即尝试发送第一批段
    pub fn app_send(
        &mut self,
        bytes: i64,
        clock: &mut SimClock,
        link: &mut Link,
    ) -> Option<SenderMetrics> {
        let local_rcv_window = self.local_rcv_window();
        self.sender.send(Some(bytes), clock, link, local_rcv_window)
    }

    /// 处理从链路送达的段：ACK 交给发送端，数据交给接收端
    pub fn handle(&mut self, segment: Segment, clock: &mut SimClock, link: &mut Link) {
        trace!(
            seq = segment.seq,
            ack_seq = segment.ack_seq,
            is_ack = segment.is_ack,
            "端点收到段"
        );
        if segment.is_ack {
            let local_rcv_window = self.local_rcv_window();
            self.sender.handle(&segment, clock, link, local_rcv_window);
        }
        if segment.len > 0 {
            self.receiver.handle(segment, clock, link);
        }
    }

    /// 发送端的一轮处理：先触发到期的发送端计时器，再尝试发送
    /// 新的一批段（上一轮收到的 ACK 可能已把窗口张开）。
    pub fn process_sender(&mut self, clock: &mut SimClock, link: &mut Link) -> Option<SenderMetrics> {
        let owner = TimerOwner {
            node: self.node,
            role: TimerRole::Sender,
        };
        for kind in clock.check_expired_timers(owner) {
            let local_rcv_window = self.local_rcv_window();
            self.sender.timer_expired(kind, clock, link, local_rcv_window);
        }

        let local_rcv_window = self.local_rcv_window();
        self.sender.send(None, clock, link, local_rcv_window)
    }

    /// 接收端的一轮处理：触发到期的延迟 ACK 计时器
    pub fn process_receiver(&mut self, clock: &mut SimClock, link: &mut Link) {
        let owner = TimerOwner {
            node: self.node,
            role: TimerRole::Receiver,
        };
        for kind in clock.check_expired_timers(owner) {
            self.receiver.timer_expired(kind, clock, link);
        }
    }
}
