//! 瓶颈路由器
//!
//! 尾丢弃转发器。路由器的瓶颈资源是内存：共享缓冲按字节容量
//! 排队，放不下的段直接丢弃。每个输出端口同时最多发送一个段，
//! 入链路比出链路快时由失配计数器对放行节奏做整形。
//!
//! 路由器还按给定的丢包率把途经的数据段标记为损坏（确认段
//! 从不损坏），用来为仿真注入丢包。

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use super::buffer::DropTailBuffer;
use super::id::{LinkId, NodeId};
use super::link::Link;
use super::segment::Segment;
use super::stats::RouterStats;
use crate::error::SimError;
use crate::sim::SimTime;

/// 输出端口：持有至多一个正在发送的段和对应的失配计数
#[derive(Debug)]
struct OutputPort {
    /// 正在输出链路上发送的段
    in_transmission: Option<Segment>,
    /// 输出链路相对所有入链路的最大速率失配比
    max_mismatch_ratio: f64,
    /// 还要再收多少个段才放行一个。每次到达按
    /// `max_mismatch_ratio / ratio` 递减，可能越过零。
    mismatch_count: f64,
}

impl OutputPort {
    fn new() -> Self {
        Self {
            in_transmission: None,
            // 默认无失配：段直接穿过路由器，不排队
            max_mismatch_ratio: 1.0,
            mismatch_count: 0.0,
        }
    }
}

/// 瓶颈路由器
#[derive(Debug)]
pub struct Router {
    node: NodeId,
    /// 转发表：目的节点 → 输出链路
    forwarding: HashMap<NodeId, LinkId>,
    /// 输出端口，按输出链路索引
    ports: HashMap<LinkId, OutputPort>,
    /// 共享的段缓冲（尾丢弃）
    buffer: DropTailBuffer,
    loss_rate: f32,
    rng: StdRng,
    /// 测试钩子：还要强制损坏的数据段个数
    forced_errors: u32,
    last_process_time: f64,
    pub stats: RouterStats,
}

impl Router {
    /// 创建路由器。`seed` 用于可重复的丢包序列。
    pub fn new(node: NodeId, buffer_capacity: i64, loss_rate: f32, seed: Option<u64>) -> Self {
        Self {
            node,
            forwarding: HashMap::new(),
            ports: HashMap::new(),
            buffer: DropTailBuffer::new(buffer_capacity),
            loss_rate,
            rng: seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64),
            forced_errors: 0,
            last_process_time: 0.0,
            stats: RouterStats::default(),
        }
    }

    /// 路由器内存容量（字节）
    pub fn buffer_capacity(&self) -> i64 {
        self.buffer.capacity_bytes()
    }

    /// 当前内存占用（字节）
    pub fn buffer_occupancy(&self) -> i64 {
        self.buffer.bytes()
    }

    /// 当前缓冲中的段数
    pub fn buffered_segments(&self) -> usize {
        self.buffer.len()
    }

    /// 当前缓冲中的段（供调试与测试使用）
    pub fn buffered(&self) -> impl Iterator<Item = &Segment> {
        self.buffer.segments()
    }

    /// 测试钩子：让接下来的 `n` 个数据段被标记为损坏
    pub fn force_error_next(&mut self, n: u32) {
        self.forced_errors = self.forced_errors.saturating_add(n);
    }

    /// 添加一条转发表项，并为该输出链路创建端口。
    ///
    /// 对每个已有端口的链路 `L'`，新端口的失配比为
    /// `tx_time(本端口链路) / tx_time(L')`，取所有 `L'` 上的最大值；
    /// 同时用倒数更新对侧端口的最大失配比。
    pub fn add_forwarding_entry(&mut self, dst: NodeId, link: LinkId, links: &[Link]) {
        let mut port = OutputPort::new();
        let out_tx = links[link.0].transmission_time();
        for (&other_link, other_port) in self.ports.iter_mut() {
            if other_link == link {
                continue;
            }
            let other_tx = links[other_link.0].transmission_time();
            let ratio = mismatch_ratio(other_tx, out_tx);
            if port.max_mismatch_ratio < ratio {
                port.max_mismatch_ratio = ratio;
            }
            if other_port.max_mismatch_ratio < 1.0 / ratio {
                other_port.max_mismatch_ratio = 1.0 / ratio;
            }
        }
        debug!(
            dst = ?dst,
            link = ?link,
            max_mismatch_ratio = port.max_mismatch_ratio,
            "新增转发表项"
        );
        self.ports.insert(link, port);
        self.forwarding.insert(dst, link);
    }

    /// 处理从 `src_link` 到达的段。
    ///
    /// 查表得到输出链路。若端口空闲且入/出链路无失配，段直接
    /// 穿过；有失配时该段成为在发送段，由失配计数整形放行节奏。
    /// 端口忙时段进入共享缓冲，容量不足则尾丢弃。
    pub fn handle(
        &mut self,
        src_link: LinkId,
        mut segment: Segment,
        links: &mut [Link],
    ) -> Result<(), SimError> {
        if segment.len > 0 && !segment.in_error {
            let forced = self.forced_errors > 0;
            if forced || (self.loss_rate > 0.0 && self.rng.gen::<f32>() < self.loss_rate) {
                if forced {
                    self.forced_errors -= 1;
                }
                segment.in_error = true;
                self.stats.corrupted_pkts += 1;
                debug!(seq = segment.seq, "路由器损坏数据段");
            }
        }

        let out = *self
            .forwarding
            .get(&segment.dst)
            .ok_or(SimError::NoRoute(segment.dst))?;
        let ratio = mismatch_ratio(
            links[src_link.0].transmission_time(),
            links[out.0].transmission_time(),
        );

        // 暂时把端口取出来，避免与缓冲和转发表的借用重叠。
        let mut port = self
            .ports
            .remove(&out)
            .ok_or(SimError::NoRoute(segment.dst))?;

        if port.in_transmission.is_none() {
            if ratio <= 1.0 {
                // 无失配：直接交给输出链路
                trace!(seq = segment.seq, ack_seq = segment.ack_seq, "段直接穿过路由器");
                self.stats.forwarded_pkts += 1;
                links[out.0].send(self.node, segment);
            } else {
                // 该段的发送刚刚开始，后续到达的段需要排队
                trace!(seq = segment.seq, "段进入发送位");
                port.mismatch_count = port.max_mismatch_ratio - port.max_mismatch_ratio / ratio;
                port.in_transmission = Some(segment);
            }
        } else {
            // 端口忙：尝试进入共享缓冲，放不下则尾丢弃
            match self.buffer.enqueue(segment) {
                Ok(()) => trace!(
                    occupancy = self.buffer.bytes(),
                    capacity = self.buffer.capacity_bytes(),
                    "段进入路由器缓冲"
                ),
                Err(dropped) => {
                    self.stats.dropped_pkts += 1;
                    self.stats.dropped_bytes += dropped.len as u64;
                    debug!(
                        seq = dropped.seq,
                        dropped_pkts = self.stats.dropped_pkts,
                        "缓冲已满，路由器丢弃段"
                    );
                }
            }

            // 失配计数耗尽：放行在发送段，补位下一个去往同一端口的段
            if port.mismatch_count < 1.0 {
                if let Some(done) = port.in_transmission.take() {
                    self.stats.forwarded_pkts += 1;
                    links[out.0].send(self.node, done);
                }
                let forwarding = &self.forwarding;
                port.in_transmission = self
                    .buffer
                    .take_first(|s| forwarding.get(&s.dst).copied() == Some(out));
                port.mismatch_count = port.max_mismatch_ratio;
            }
            // 每次到达都向放行推进一步
            port.mismatch_count -= port.max_mismatch_ratio / ratio;
        }

        self.ports.insert(out, port);
        Ok(())
    }

    /// 时间流逝的信号：把各端口的在发送段交给输出链路，并在
    /// 流逝时间允许的传输预算内顺带转发缓冲中去往同一端口的段。
    pub fn process(&mut self, links: &mut [Link], now: SimTime) {
        let link_ids: Vec<LinkId> = self.ports.keys().copied().collect();
        for id in link_ids {
            let Some(mut port) = self.ports.remove(&id) else {
                continue;
            };
            if let Some(segment) = port.in_transmission.take() {
                let mut budget = now.0 - self.last_process_time;
                trace!(link = ?id, budget, "端口放行在发送段");
                self.stats.forwarded_pkts += 1;
                links[id.0].send(self.node, segment);

                // 预算内继续转发缓冲中的同端口段
                while budget > 0.0 {
                    let forwarding = &self.forwarding;
                    let Some(next) = self
                        .buffer
                        .take_first(|s| forwarding.get(&s.dst).copied() == Some(id))
                    else {
                        break;
                    };
                    self.stats.forwarded_pkts += 1;
                    links[id.0].send(self.node, next);
                    budget -= links[id.0].transmission_time();
                }
            }
            self.ports.insert(id, port);
        }
        self.last_process_time = now.0;
    }
}

/// 入链路与出链路的失配比：`tx_time(出) / tx_time(入)`。
/// 任一时延为零时视为无失配（段直接穿过，不排队）。
fn mismatch_ratio(incoming_tx: f64, outgoing_tx: f64) -> f64 {
    if incoming_tx != 0.0 && outgoing_tx != 0.0 {
        outgoing_tx / incoming_tx
    } else {
        1.0
    }
}
