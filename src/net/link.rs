//! 链路类型
//!
//! 连接两个节点的全双工链路。段从一端喂入，经过相应的时延后在
//! 另一端送出。链路有传输时延与传播时延（均以 tick 的小数计，
//! 且假设所有段的传输时延相同）。

use std::collections::VecDeque;

use super::id::NodeId;
use super::segment::Segment;
use crate::sim::SimTime;
use tracing::{debug, error, trace};

/// 链路的处理方向。三种模式各自维护独立的上次处理时刻。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// 双向
    Both,
    /// 仅 node1 → node2
    N1ToN2,
    /// 仅 node2 → node1
    N2ToN1,
}

/// 到达链路另一端、待交付给节点的段
#[derive(Debug)]
pub struct Delivery {
    pub to: NodeId,
    pub segment: Segment,
}

/// 在途的段及其剩余时延
#[derive(Debug, Clone)]
struct Transit {
    segment: Segment,
    remaining: f64,
}

/// 网络链路
#[derive(Debug)]
pub struct Link {
    node1: NodeId,
    node2: NodeId,
    transmission_time: f64,
    propagation_time: f64,
    in_flight_1to2: VecDeque<Transit>,
    in_flight_2to1: VecDeque<Transit>,
    last_process_both: f64,
    last_process_1to2: f64,
    last_process_2to1: f64,
}

impl Link {
    /// 创建新链路
    pub fn new(node1: NodeId, node2: NodeId, transmission_time: f64, propagation_time: f64) -> Self {
        Self {
            node1,
            node2,
            transmission_time,
            propagation_time,
            in_flight_1to2: VecDeque::new(),
            in_flight_2to1: VecDeque::new(),
            last_process_both: 0.0,
            last_process_1to2: 0.0,
            last_process_2to1: 0.0,
        }
    }

    /// 每段的传输时延（tick）
    pub fn transmission_time(&self) -> f64 {
        self.transmission_time
    }

    pub fn propagation_time(&self) -> f64 {
        self.propagation_time
    }

    /// 接收一个新段，按 `src` 端排入相应方向的队尾。
    ///
    /// 入队时计算该段的时延：若前一段的剩余时延已小于
    /// 传播+传输时延，则按队头处理（粗粒度的串行化近似）；
    /// 否则继承前一段的时延，保证同方向时延单调不减。
    pub fn send(&mut self, src: NodeId, segment: Segment) {
        let base = self.propagation_time + self.transmission_time;
        let queue = if src == self.node1 {
            &mut self.in_flight_1to2
        } else if src == self.node2 {
            &mut self.in_flight_2to1
        } else {
            error!(src = ?src, "不可能的段来源");
            return;
        };
        let remaining = queue.back().map_or(base, |t| t.remaining.max(base));
        trace!(
            seq = segment.seq,
            ack_seq = segment.ack_seq,
            remaining,
            in_flight = queue.len() + 1,
            "段进入链路"
        );
        queue.push_back(Transit { segment, remaining });
    }

    /// 让时间流逝：交付自该模式上次处理以来时延已耗尽的段。
    /// 同方向时延单调不减，因此交付顺序等于入队顺序。
    pub fn process(&mut self, mode: LinkMode, now: SimTime) -> Vec<Delivery> {
        let mut out = Vec::new();
        match mode {
            LinkMode::Both => {
                let elapsed = now.0 - self.last_process_both;
                drain(&mut self.in_flight_1to2, elapsed, self.node2, &mut out);
                drain(&mut self.in_flight_2to1, elapsed, self.node1, &mut out);
                self.last_process_both = now.0;
            }
            LinkMode::N1ToN2 => {
                let elapsed = now.0 - self.last_process_1to2;
                drain(&mut self.in_flight_1to2, elapsed, self.node2, &mut out);
                self.last_process_1to2 = now.0;
            }
            LinkMode::N2ToN1 => {
                let elapsed = now.0 - self.last_process_2to1;
                drain(&mut self.in_flight_2to1, elapsed, self.node1, &mut out);
                self.last_process_2to1 = now.0;
            }
        }
        if !out.is_empty() {
            debug!(now = now.0, delivered = out.len(), mode = ?mode, "链路交付段");
        }
        out
    }

    /// 指定方向在途的段数（供调试与测试使用）
    pub fn in_flight(&self, mode: LinkMode) -> usize {
        match mode {
            LinkMode::Both => self.in_flight_1to2.len() + self.in_flight_2to1.len(),
            LinkMode::N1ToN2 => self.in_flight_1to2.len(),
            LinkMode::N2ToN1 => self.in_flight_2to1.len(),
        }
    }
}

/// 把队列中所有段的剩余时延减去流逝的时间，并从队头开始交付
/// 时延已耗尽的段。
fn drain(queue: &mut VecDeque<Transit>, elapsed: f64, to: NodeId, out: &mut Vec<Delivery>) {
    for transit in queue.iter_mut() {
        transit.remaining -= elapsed;
    }
    while let Some(front) = queue.front() {
        if front.remaining > 0.0 {
            break;
        }
        if let Some(transit) = queue.pop_front() {
            out.push(Delivery {
                to,
                segment: transit.segment,
            });
        }
    }
}
