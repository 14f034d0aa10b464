//! 仿真会话
//!
//! 搭建固定的三节点拓扑（发送端主机 ↔ 瓶颈路由器 ↔ 接收端
//! 主机），按轮推进仿真并在每轮结束时收集拥塞指标。一轮是一个
//! 时钟 tick，约等于一个 RTT。
//!
//! 每轮内的处理顺序是固定的：link1 先把上一轮的 ACK 送达发送
//! 端，发送端触发计时器并发出新的一批段，link1 把它们送到路由
//! 器，路由器转发，link2 把数据送达接收端，接收端触发延迟 ACK
//! 计时器并发出 ACK，link2 把 ACK 送回路由器，路由器再转发一
//! 次。于是第 k 轮到达的数据所产生的 ACK 最早在第 k+1 轮被发
//! 送端看到，这正是一个 RTT 的来回。

use serde::Serialize;
use tracing::{debug, info};

use crate::error::SimError;
use crate::net::{Delivery, Link, LinkId, LinkMode, NodeId, Router};
use crate::sim::SimClock;
use crate::tcp::{Endpoint, Receiver, Sender, TcpVariant, MSS};

/// 发送端主机
pub const SENDER_NODE: NodeId = NodeId(0);
/// 接收端主机
pub const RECEIVER_NODE: NodeId = NodeId(1);
/// 瓶颈路由器
pub const ROUTER_NODE: NodeId = NodeId(2);

/// 发送端 ↔ 路由器
pub const LINK1: LinkId = LinkId(0);
/// 接收端 ↔ 路由器
pub const LINK2: LinkId = LinkId(1);

/// 会话参数
#[derive(Debug, Clone)]
pub struct SessionOpts {
    /// TCP 发送端变体
    pub variant: TcpVariant,
    /// 仿真轮数
    pub iterations: u32,
    /// 丢包率 [0, 1]
    pub loss_rate: f32,
    /// 路由器缓冲容量（字节）
    pub buffer_capacity: i64,
    /// 接收窗口（字节）
    pub rcv_window: i64,
    /// link1 的传输时延（tick 的小数）；link2 固定为其 10 倍
    pub latency: f64,
    /// 应用层要发送的字节总数
    pub total_bytes: i64,
    /// 随机数种子，用于可重复的丢包序列
    pub rng_seed: Option<u64>,
}

impl Default for SessionOpts {
    fn default() -> Self {
        Self {
            variant: TcpVariant::Tahoe,
            iterations: 100,
            loss_rate: 0.0,
            // 默认缓冲：六个整段，再加一点给 ACK
            buffer_capacity: 6 * MSS + 100,
            rcv_window: 65536,
            latency: 0.001,
            total_bytes: 10_000_000,
            rng_seed: None,
        }
    }
}

/// 一轮的拥塞指标，会话收集后可写成 JSON
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TickMetrics {
    pub time: f64,
    pub cong_window: i64,
    pub effective_window: i64,
    pub flight_size: i64,
    pub ss_thresh: i64,
    pub rto_interval: f64,
}

/// 会话结束时的发送端利用率报告
#[derive(Debug, Clone, Copy)]
pub struct SessionReport {
    /// 实际成功送达的字节数
    pub actual_bytes: i64,
    /// 瓶颈容量允许的字节数（缓冲容量加上正在发送的一个段，
    /// 乘以轮数）
    pub potential_bytes: i64,
    /// 利用率（四舍五入的百分数）
    pub utilization_percent: i64,
}

/// 仿真会话：拓扑 + 时钟 + 按轮推进的运行器
#[derive(Debug)]
pub struct Session {
    clock: SimClock,
    links: Vec<Link>,
    router: Router,
    sender_ep: Endpoint,
    receiver_ep: Endpoint,
    opts: SessionOpts,
    metrics: Vec<TickMetrics>,
    started: bool,
}

impl Session {
    /// 搭建拓扑。link1 的传输与传播时延都远小于一个 tick；
    /// link2 的传输时延是 link1 的 10 倍，构成速率失配。
    pub fn new(opts: SessionOpts) -> Self {
        let link1 = Link::new(SENDER_NODE, ROUTER_NODE, opts.latency, 0.001);
        let link2 = Link::new(RECEIVER_NODE, ROUTER_NODE, 10.0 * opts.latency, 0.001);
        let links = vec![link1, link2];

        let mut router = Router::new(
            ROUTER_NODE,
            opts.buffer_capacity,
            opts.loss_rate,
            opts.rng_seed,
        );
        router.add_forwarding_entry(SENDER_NODE, LINK1, &links);
        router.add_forwarding_entry(RECEIVER_NODE, LINK2, &links);

        let sender_ep = Endpoint::new(SENDER_NODE, RECEIVER_NODE, opts.variant, opts.rcv_window);
        // 接收端点只回 ACK 不发数据，它内部的发送端变体无关紧要
        let receiver_ep = Endpoint::new(RECEIVER_NODE, SENDER_NODE, TcpVariant::Tahoe, opts.rcv_window);

        Self {
            clock: SimClock::default(),
            links,
            router,
            sender_ep,
            receiver_ep,
            opts,
            metrics: Vec::new(),
            started: false,
        }
    }

    pub fn opts(&self) -> &SessionOpts {
        &self.opts
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn sender(&self) -> &Sender {
        self.sender_ep.sender()
    }

    pub fn receiver(&self) -> &Receiver {
        self.receiver_ep.receiver()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    /// 已收集的每轮指标
    pub fn metrics(&self) -> &[TickMetrics] {
        &self.metrics
    }

    /// 把整个字节流一次性交给发送端点。仿真器同时扮演使用 TCP
    /// 服务的应用：只在开头提供一次输入，此后由收到的 ACK 驱动
    /// 发送端把剩余数据逐批发完。
    fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let total = self.opts.total_bytes;
        debug!(total_bytes = total, "应用层提交字节流");
        self.sender_ep
            .app_send(total, &mut self.clock, &mut self.links[LINK1.0]);
    }

    /// 推进一轮仿真，返回这一轮的拥塞指标
    /// （发送端字节流耗尽时为 `None`）。
    pub fn tick(&mut self) -> Result<Option<TickMetrics>, SimError> {
        self.start();
        let now = self.clock.now();
        debug!(tick = now.0, "轮开始 ................");

        // link1 先动：把上一轮经路由器回来的 ACK 送达发送端
        let deliveries = self.links[LINK1.0].process(LinkMode::N2ToN1, now);
        self.dispatch_all(LINK1, deliveries)?;

        // 发送端处理：触发到期计时器，ACK 张开的窗口允许的话再
        // 发一批新段
        let sender_metrics = self
            .sender_ep
            .process_sender(&mut self.clock, &mut self.links[LINK1.0]);

        // link1 再动：把新发的数据段送到路由器
        let deliveries = self.links[LINK1.0].process(LinkMode::N1ToN2, now);
        self.dispatch_all(LINK1, deliveries)?;

        // 路由器转发，可能有段被交到出链路上
        self.router.process(&mut self.links, now);

        // link2 把数据段送达接收端，接收端生成 ACK
        let deliveries = self.links[LINK2.0].process(LinkMode::N2ToN1, now);
        self.dispatch_all(LINK2, deliveries)?;

        // 接收端处理：延迟 ACK 计时器到期，累积 ACK 发出
        self.receiver_ep
            .process_receiver(&mut self.clock, &mut self.links[LINK2.0]);

        // link2 把 ACK 送回路由器
        let deliveries = self.links[LINK2.0].process(LinkMode::N1ToN2, now);
        self.dispatch_all(LINK2, deliveries)?;

        // 路由器再转发一次，ACK 上路
        self.router.process(&mut self.links, now);

        debug!(tick = now.0, "轮结束 ----------------");
        // 一轮结束，时钟前进一个 tick
        self.clock.advance();

        Ok(sender_metrics.map(|m| {
            let tick_metrics = TickMetrics {
                time: now.0,
                cong_window: m.cong_window,
                effective_window: m.effective_window,
                flight_size: m.flight_size,
                ss_thresh: m.ss_thresh,
                rto_interval: m.rto_interval,
            };
            self.metrics.push(tick_metrics);
            tick_metrics
        }))
    }

    /// 运行整个会话并打印报表。
    ///
    /// 注意轮数与原始行为一致：循环跑 `iterations + 1` 轮，而
    /// 利用率按 `iterations` 折算。
    pub fn run(&mut self) -> Result<SessionReport, SimError> {
        println!("================================================================");
        println!("          Running TCP {} sender.\n", self.opts.variant);
        self.start();

        println!("Time\tCongWindow\tEffctWindow\tFlightSize\tSSThresh\tRTOinterval");
        println!("===================================================================================");

        for _ in 0..=self.opts.iterations {
            if let Some(m) = self.tick()? {
                println!(
                    "{}\t{}\t\t{}\t\t{}\t\t{}\t\t{}",
                    m.time, m.cong_window, m.effective_window, m.flight_size, m.ss_thresh, m.rto_interval
                );
            }
        }

        println!("     ====================  E N D   O F   S E S S I O N  ====================");
        let report = self.report();
        info!(
            actual_bytes = report.actual_bytes,
            potential_bytes = report.potential_bytes,
            "✅ 会话结束"
        );
        println!("Sender utilization: {} %", report.utilization_percent);
        Ok(report)
    }

    /// 发送端利用率：实际送达的字节数除以瓶颈容量允许的字节数。
    /// 容量按每轮"缓冲容量 + 一个正在发送的段"计。
    pub fn report(&self) -> SessionReport {
        let actual_bytes = self.sender_ep.sender().total_bytes_transmitted();
        let potential_bytes =
            (self.router.buffer_capacity() + MSS) * i64::from(self.opts.iterations);
        let utilization_percent =
            (100.0 * actual_bytes as f64 / potential_bytes as f64).round() as i64;
        SessionReport {
            actual_bytes,
            potential_bytes,
            utilization_percent,
        }
    }

    fn dispatch_all(&mut self, from: LinkId, deliveries: Vec<Delivery>) -> Result<(), SimError> {
        for delivery in deliveries {
            self.dispatch(from, delivery)?;
        }
        Ok(())
    }

    /// 把链路交付的段送进目的节点
    fn dispatch(&mut self, from: LinkId, delivery: Delivery) -> Result<(), SimError> {
        let Delivery { to, segment } = delivery;
        if to == ROUTER_NODE {
            self.router.handle(from, segment, &mut self.links)
        } else if to == SENDER_NODE {
            self.sender_ep
                .handle(segment, &mut self.clock, &mut self.links[LINK1.0]);
            Ok(())
        } else {
            self.receiver_ep
                .handle(segment, &mut self.clock, &mut self.links[LINK2.0]);
            Ok(())
        }
    }
}
