//! TCP 发送端状态机
//!
//! 慢启动 / 拥塞避免 / 快速恢复三个状态，以及 Tahoe、Reno、
//! NewReno 三个变体。变体之间的差异集中在 RTO 超时与三次重复
//! ACK 的反应上；状态差异集中在新 ACK 到达后的拥塞窗口计算与
//! 状态迁移上。
//!
//! 实现依据 RFC 5681 / RFC 2581（快速重传、快速恢复）与
//! RFC 6298（重传计时器）。不实现持续计时器（零窗口探测）、
//! Nagle 算法与 SACK。

use std::fmt;
use std::str::FromStr;

use tracing::{debug, error, trace, warn};

use super::rto::RtoEstimator;
use crate::error::SimError;
use crate::net::{Link, NodeId, Segment};
use crate::sim::{SimClock, SimTime, Timer, TimerHandle, TimerKind, TimerOwner, TimerRole};

/// 最大段长（字节），两端一致
pub const MSS: i64 = 128;

/// 快速重传的重复 ACK 门限
pub const DUP_ACK_THRESHOLD: u32 = 3;

/// TCP 发送端变体
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpVariant {
    Tahoe,
    Reno,
    NewReno,
}

impl FromStr for TcpVariant {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Tahoe" => Ok(TcpVariant::Tahoe),
            "Reno" => Ok(TcpVariant::Reno),
            "NewReno" => Ok(TcpVariant::NewReno),
            other => Err(SimError::UnknownVariant(other.to_string())),
        }
    }
}

impl fmt::Display for TcpVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TcpVariant::Tahoe => write!(f, "Tahoe"),
            TcpVariant::Reno => write!(f, "Reno"),
            TcpVariant::NewReno => write!(f, "NewReno"),
        }
    }
}

/// 发送端当前状态。快速恢复只出现在 Reno / NewReno。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderStateKind {
    SlowStart,
    CongestionAvoidance,
    FastRecovery,
}

/// 一轮的拥塞控制参数快照，由运行器打印成指标行
#[derive(Debug, Clone, Copy)]
pub struct SenderMetrics {
    pub cong_window: i64,
    pub effective_window: i64,
    pub flight_size: i64,
    pub ss_thresh: i64,
    pub rto_interval: f64,
}

/// 发送端统计信息
#[derive(Debug, Default, Clone)]
pub struct SenderStats {
    /// 重传的段数（快速重传、部分 ACK、RTO 超时之和）
    pub retransmissions: u64,
    /// RTO 超时次数
    pub rto_timeouts: u64,
}

/// TCP 发送端协议模块
#[derive(Debug)]
pub struct Sender {
    /// 本端节点
    node: NodeId,
    /// 对端（数据段的目的地）
    remote: NodeId,
    variant: TcpVariant,
    state: SenderStateKind,
    /// 应用层已提交的字节总数（载荷只以字节数建模）
    total_bytes: i64,
    /// 已发送的最后一个字节，字节从 0 编号
    last_byte_sent: i64,
    /// 已确认的最后一个字节
    last_byte_acked: i64,
    /// 收到三次重复 ACK 时 `last_byte_sent` 的快照。只有当时
    /// 在外的数据全部被确认，发送端才算从丢包中完全恢复；
    /// 未处于恢复过程时为 -1。
    last_byte_sent_before_3dup: i64,
    /// 拥塞窗口（字节）
    cong_window: i64,
    /// 慢启动阈值（字节）：越过它便从慢启动转入拥塞避免
    ss_thresh: i64,
    /// 重复 ACK 计数
    dup_ack_count: u32,
    /// 对端最近通告的接收窗口（字节）
    rcv_window: i64,
    /// 快速恢复中是否还没出现过部分 ACK。保留此标记是为了
    /// 在一处切换 NewReno 的 Impatient 计时器策略。
    first_partial_ack: bool,
    rto_estimator: RtoEstimator,
    rto_handle: Option<TimerHandle>,
    idle_handle: Option<TimerHandle>,
    pub stats: SenderStats,
}

impl Sender {
    pub fn new(node: NodeId, remote: NodeId, variant: TcpVariant) -> Self {
        Self {
            node,
            remote,
            variant,
            // 发送端总是从慢启动开始
            state: SenderStateKind::SlowStart,
            total_bytes: 0,
            last_byte_sent: -1,
            last_byte_acked: -1,
            last_byte_sent_before_3dup: -1,
            cong_window: MSS,
            ss_thresh: 65535,
            dup_ack_count: 0,
            rcv_window: 65536,
            first_partial_ack: true,
            rto_estimator: RtoEstimator::new(1.0),
            rto_handle: None,
            idle_handle: None,
            stats: SenderStats::default(),
        }
    }

    pub fn variant(&self) -> TcpVariant {
        self.variant
    }

    pub fn state(&self) -> SenderStateKind {
        self.state
    }

    pub fn cong_window(&self) -> i64 {
        self.cong_window
    }

    pub fn ss_thresh(&self) -> i64 {
        self.ss_thresh
    }

    pub fn dup_ack_count(&self) -> u32 {
        self.dup_ack_count
    }

    pub fn last_byte_sent(&self) -> i64 {
        self.last_byte_sent
    }

    pub fn last_byte_acked(&self) -> i64 {
        self.last_byte_acked
    }

    pub fn rcv_window(&self) -> i64 {
        self.rcv_window
    }

    /// 三次重复 ACK 时在外数据的恢复标记；未在恢复中为 -1
    pub fn last_byte_sent_before_3dup(&self) -> i64 {
        self.last_byte_sent_before_3dup
    }

    /// 快速恢复中是否还没出现过部分 ACK
    pub fn first_partial_ack(&self) -> bool {
        self.first_partial_ack
    }

    pub fn rto_estimator(&self) -> &RtoEstimator {
        &self.rto_estimator
    }

    /// 本次会话累计成功送达的字节数。
    /// 第一个字节的序号为 0，所以计数等于已确认序号加一。
    pub fn total_bytes_transmitted(&self) -> i64 {
        self.last_byte_acked + 1
    }

    /// 在外未确认的字节数
    fn flight_size(&self) -> i64 {
        self.last_byte_sent - self.last_byte_acked
    }

    /// 字节流中还没发出的字节数
    fn remaining_bytes(&self) -> i64 {
        self.total_bytes - (self.last_byte_sent + 1)
    }

    fn owner(&self) -> TimerOwner {
        TimerOwner {
            node: self.node,
            role: TimerRole::Sender,
        }
    }

    /// 把段交给网络层发送。发送端在任何状态下都用同一个
    /// `send`；状态只影响 ACK 的处理，而 ACK 处理设置的参数
    /// 决定这里能发多少。
    ///
    /// `new_data` 是应用层新提交的字节数；每轮时钟驱动的调用
    /// 传 `None`。只发整数个 MSS 的段（不实现 Nagle 算法）。
    /// 返回本轮的拥塞参数快照；字节流耗尽时返回 `None`。
    pub fn send(
        &mut self,
        new_data: Option<i64>,
        clock: &mut SimClock,
        link: &mut Link,
        local_rcv_window: i64,
    ) -> Option<SenderMetrics> {
        if new_data.is_none() && self.remaining_bytes() == 0 {
            debug!("字节流已空，没有可发送的数据");
            // 没有数据在外时启动空闲连接计时器，等下一次调用
            self.start_idle_timer(clock);
            return None;
        }

        if let Some(bytes) = new_data {
            // 有新数据进来，取消空闲连接计时器
            self.cancel_idle_timer(clock);
            self.total_bytes += bytes;
        }

        if self.remaining_bytes() < MSS {
            // 注意：只有剩余字节为零才启动空闲计时器，这里不启动
            debug!(remaining = self.remaining_bytes(), "剩余数据不足一个整段");
            return None;
        }

        // 计算发送参数：在外的字节数与可用窗口
        let flight_size = self.flight_size();
        let effective_window = (self.cong_window.min(self.rcv_window) - flight_size).max(0);
        let metrics = SenderMetrics {
            cong_window: self.cong_window,
            effective_window,
            flight_size,
            ss_thresh: self.ss_thresh,
            rto_interval: self.rto_estimator.get_timeout_interval(),
        };
        debug!(
            cong_window = self.cong_window,
            effective_window,
            flight_size,
            ss_thresh = self.ss_thresh,
            rto_interval = metrics.rto_interval,
            "发送端参数"
        );

        let burst = (effective_window / MSS).min(self.remaining_bytes() / MSS);
        for _ in 0..burst {
            let mut segment =
                Segment::data(self.remote, local_rcv_window, self.last_byte_sent + 1, MSS);
            // 记录发出时刻，确认段会把它带回来
            segment.timestamp = clock.now().0;
            trace!(seq = segment.seq, "发送数据段");
            link.send(self.node, segment);
            self.last_byte_sent += MSS;
        }

        // 为刚发出的段启动 RTO 计时器（若还没在运行）
        if burst > 0 && self.rto_handle.is_none() {
            self.start_rto_timer(clock);
        }
        Some(metrics)
    }

    /// 处理接收端发来的确认段。新 ACK（确认了此前未确认的
    /// 数据）可能使窗口张开，后续这一轮的 `send` 会继续发送；
    /// 重复 ACK 交给当前状态处理。
    pub fn handle(
        &mut self,
        ack: &Segment,
        clock: &mut SimClock,
        link: &mut Link,
        local_rcv_window: i64,
    ) {
        // 更新对端通告的接收窗口
        self.rcv_window = ack.rcv_window;

        if ack.ack_seq > self.last_byte_acked + 1 {
            self.handle_new_ack(ack, clock, link, local_rcv_window);

            // 三次重复 ACK 时在外的数据已全部确认，恢复完成
            if self.last_byte_sent_before_3dup <= self.last_byte_acked {
                self.last_byte_sent_before_3dup = -1;
            }
        } else {
            self.handle_dup_ack(link, local_rcv_window);
        }
    }

    /// 计时器到期回调。发送端运行两个计时器：
    /// 重传（RTO）计时器与空闲连接计时器。
    pub fn timer_expired(
        &mut self,
        kind: TimerKind,
        clock: &mut SimClock,
        link: &mut Link,
        local_rcv_window: i64,
    ) {
        match kind {
            TimerKind::Rto => {
                debug!("***** RTO 计时器超时 *****");
                self.rto_handle = None;
                self.stats.rto_timeouts += 1;

                // 各变体自己决定如何收缩参数；所有变体超时后都
                // 重传最老的未确认段并回到慢启动
                self.on_expired_rto(clock);
                self.retransmit_oldest(link, local_rcv_window);
                self.state = SenderStateKind::SlowStart;
            }
            TimerKind::IdleConnection => {
                debug!("%%%%% 空闲连接计时器超时 %%%%%");
                self.idle_handle = None;
                // RFC 5681 §4.1：空闲超过一个 RTO 后重新从慢启动开始
                self.reset_to_slow_start();
                self.state = SenderStateKind::SlowStart;
            }
            TimerKind::DelayedAck => warn!("发送端收到意外的计时器种类"),
        }
    }

    /// 把拥塞参数复位到慢启动。不改动 `ss_thresh`。
    fn reset_to_slow_start(&mut self) {
        self.cong_window = MSS;
        self.dup_ack_count = 0;
        self.last_byte_sent_before_3dup = -1;
    }

    // ------------------------------------------------------------------
    // 新 ACK

    fn handle_new_ack(
        &mut self,
        ack: &Segment,
        clock: &mut SimClock,
        link: &mut Link,
        local_rcv_window: i64,
    ) {
        let prev_last_acked = self.last_byte_acked;
        self.last_byte_acked = ack.ack_seq - 1;

        // 一个累积 ACK 可能一次确认多个段。为了不拖慢 RTT 估计
        // 的收敛，按确认的段数重复采样（至少一次）。
        let mut acked_segments = (self.last_byte_acked - prev_last_acked) / MSS;
        if acked_segments < 1 {
            acked_segments = 1;
        }
        for _ in 0..acked_segments {
            self.rto_estimator.update_rtt(clock.now().0, ack.timestamp);
        }

        // 按当前状态重算拥塞窗口，并视情况重启/取消 RTO 计时器
        self.cong_window =
            self.calc_cwnd_on_new_ack(ack.ack_seq, prev_last_acked, clock, link, local_rcv_window);

        self.dup_ack_count = 0;
        self.state = self.next_state_after_new_ack();
    }

    /// 新 ACK 到达后的拥塞窗口计算，依当前状态而不同。
    fn calc_cwnd_on_new_ack(
        &mut self,
        ack_seq: i64,
        prev_last_acked: i64,
        clock: &mut SimClock,
        link: &mut Link,
        local_rcv_window: i64,
    ) -> i64 {
        match self.state {
            SenderStateKind::SlowStart => {
                if self.last_byte_sent_before_3dup == -1 {
                    // 初始慢启动：窗口按累积确认的全部字节增长
                    self.restart_or_cancel_rto(clock);
                    self.cong_window + (ack_seq - prev_last_acked - 1)
                } else {
                    // 丢包后的慢启动：在当时在外的数据全部确认之前，
                    // 累积 ACK 只按一个 MSS 计
                    self.cong_window + MSS
                }
            }
            SenderStateKind::CongestionAvoidance => {
                self.restart_or_cancel_rto(clock);
                // RFC 5681：拥塞避免期间每个 RTT 至多增长一个 MSS
                if ack_seq - prev_last_acked >= self.cong_window {
                    self.cong_window + MSS
                } else {
                    self.cong_window + MSS * MSS / self.cong_window
                }
            }
            SenderStateKind::FastRecovery => {
                self.calc_cwnd_in_fast_recovery(ack_seq, prev_last_acked, clock, link, local_rcv_window)
            }
        }
    }

    /// 快速恢复中的新 ACK：老 Reno 一律视为完全 ACK 并退出；
    /// NewReno 区分部分/完全 ACK（RFC 3782），部分 ACK 重传
    /// 最老的未确认段并留在快速恢复。
    fn calc_cwnd_in_fast_recovery(
        &mut self,
        ack_seq: i64,
        prev_last_acked: i64,
        clock: &mut SimClock,
        link: &mut Link,
        local_rcv_window: i64,
    ) -> i64 {
        if self.last_byte_sent_before_3dup == -1 {
            // 只有经由三次重复 ACK 才能进入本状态
            error!("快速恢复状态缺少恢复标记");
            return self.cong_window;
        }

        if self.variant == TcpVariant::NewReno && ack_seq < self.last_byte_sent_before_3dup {
            // 部分 ACK：先重传最老的未确认段
            debug!(ack_seq, "快速恢复中的部分 ACK");
            self.retransmit_oldest(link, local_rcv_window);

            // 按新确认的字节数紧缩窗口；若确认了至少一个 MSS，
            // 补回一个 MSS 以反映离开网络的那个段
            let newly_acked = ack_seq - prev_last_acked;
            let mut cong_window_tmp = self.cong_window - newly_acked;
            if newly_acked >= MSS {
                cong_window_tmp += MSS;
            }

            // Slow-but-Steady 变体（RFC 3782）：每个部分 ACK 都
            // 重置 RTO 计时器。Impatient 变体只对第一个重置。
            self.restart_or_cancel_rto(clock);
            self.first_partial_ack = false;
            cong_window_tmp
        } else {
            // 完全 ACK：当时在外的数据全部确认，恢复结束
            debug!(ack_seq, "快速恢复中的完全 ACK");
            self.last_byte_sent_before_3dup = -1;
            self.first_partial_ack = true;
            self.restart_or_cancel_rto(clock);
            // 窗口缩回慢启动阈值（所谓"deflating"）
            self.ss_thresh
        }
    }

    /// 新 ACK 处理完后查找下一个状态。
    fn next_state_after_new_ack(&mut self) -> SenderStateKind {
        match self.state {
            SenderStateKind::SlowStart => {
                if self.cong_window < self.ss_thresh {
                    SenderStateKind::SlowStart
                } else {
                    debug!("############## 发送端进入拥塞避免");
                    SenderStateKind::CongestionAvoidance
                }
            }
            SenderStateKind::CongestionAvoidance => {
                if self.cong_window < self.ss_thresh {
                    // 正常不会走到这里，保险起见
                    debug!("############## 发送端回到慢启动");
                    self.reset_to_slow_start();
                    SenderStateKind::SlowStart
                } else {
                    SenderStateKind::CongestionAvoidance
                }
            }
            SenderStateKind::FastRecovery => {
                if self.variant == TcpVariant::NewReno
                    && self.last_byte_acked < self.last_byte_sent_before_3dup
                {
                    // 部分 ACK：留在快速恢复
                    SenderStateKind::FastRecovery
                } else {
                    debug!("############## 快速恢复结束，发送端进入拥塞避免");
                    SenderStateKind::CongestionAvoidance
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // 重复 ACK

    fn handle_dup_ack(&mut self, link: &mut Link, local_rcv_window: i64) {
        if self.state == SenderStateKind::FastRecovery {
            // 快速恢复中不数重复 ACK，每个重复 ACK 把窗口再
            // 撑大一个 MSS，反映又一个段离开了网络
            self.cong_window += MSS;
            trace!(cong_window = self.cong_window, "快速恢复中的重复 ACK");
            return;
        }

        self.dup_ack_count += 1;
        trace!(dup_ack_count = self.dup_ack_count, "重复 ACK");

        if self.dup_ack_count >= DUP_ACK_THRESHOLD {
            debug!("..... 收到三个（或更多）重复 ACK .....");
            self.on_three_duplicate_acks(link, local_rcv_window);

            // 三次重复 ACK 后去哪个状态由变体决定
            self.state = match self.variant {
                TcpVariant::Tahoe => SenderStateKind::SlowStart,
                TcpVariant::Reno | TcpVariant::NewReno => {
                    debug!("############## 发送端进入快速恢复");
                    SenderStateKind::FastRecovery
                }
            };
        }
        // 否则什么都不做：还不能断定段已丢失
    }

    /// 快速重传：三次重复 ACK 后最老的在外段大概率已丢失。
    fn on_three_duplicate_acks(&mut self, link: &mut Link, local_rcv_window: i64) {
        match self.variant {
            TcpVariant::Tahoe => {
                // Tahoe 忽略前三个之外的重复 ACK
                if self.dup_ack_count != DUP_ACK_THRESHOLD {
                    return;
                }
                // 用旧的拥塞窗口收缩慢启动阈值，取整到 MSS 的倍数
                let mut ss_thresh = self.cong_window / 2;
                ss_thresh -= ss_thresh % MSS;
                self.ss_thresh = ss_thresh.max(2 * MSS);
                self.cong_window = MSS;
                // 注意：不重置重复 ACK 计数，后面可能还有重复 ACK
                // 到达；计数在下一个新 ACK 处理时清零。
                self.retransmit_oldest(link, local_rcv_window);
            }
            TcpVariant::Reno | TcpVariant::NewReno => {
                // 记下此刻最后发送的字节；当时在外的数据全部被
                // 确认（"recovery ACK"）时快速恢复才结束
                if self.last_byte_sent_before_3dup < 0 {
                    self.last_byte_sent_before_3dup = self.last_byte_sent;
                }
                // 用在外字节数收缩慢启动阈值（与 Tahoe 不同）
                let flight_size = self.flight_size();
                let mut ss_thresh = flight_size / 2;
                ss_thresh -= ss_thresh % MSS;
                self.ss_thresh = ss_thresh.max(2 * MSS);
                // 窗口 = 在外字节的一半 + 三个已离开网络的段
                self.cong_window = (flight_size / 2).max(2 * MSS) + 3 * MSS;
                self.retransmit_oldest(link, local_rcv_window);
            }
        }
    }

    // ------------------------------------------------------------------
    // RTO 超时

    /// RTO 超时后的参数收缩，依变体而不同：Tahoe 用旧拥塞窗口
    /// 折半，Reno / NewReno 用在外字节数折半。
    fn on_expired_rto(&mut self, clock: &mut SimClock) {
        match self.variant {
            TcpVariant::Tahoe => {
                self.ss_thresh = (self.cong_window / 2).max(2 * MSS);
            }
            TcpVariant::Reno | TcpVariant::NewReno => {
                self.ss_thresh = (self.flight_size() / 2).max(2 * MSS);
            }
        }
        // 指数退避，并为在外的段重启计时器
        self.rto_estimator.timer_backoff();
        self.start_rto_timer(clock);
        self.reset_to_slow_start();
    }

    // ------------------------------------------------------------------
    // 辅助

    /// 重传最老的未确认段。重传段的时间戳置 -1，
    /// 不用它做 RTT 采样。
    fn retransmit_oldest(&mut self, link: &mut Link, local_rcv_window: i64) {
        let segment = Segment::data(self.remote, local_rcv_window, self.last_byte_acked + 1, MSS);
        debug!(seq = segment.seq, "重传最老的未确认段");
        self.stats.retransmissions += 1;
        link.send(self.node, segment);
    }

    /// 还有在外的段则重启 RTO 计时器，否则取消它。
    fn restart_or_cancel_rto(&mut self, clock: &mut SimClock) {
        if self.last_byte_acked < self.last_byte_sent {
            self.start_rto_timer(clock);
        } else {
            self.cancel_rto_timer(clock);
        }
    }

    /// 启动（或重启）RTO 计时器。
    fn start_rto_timer(&mut self, clock: &mut SimClock) {
        // 已在运行则先取消
        self.cancel_rto_timer(clock);

        let fire_at = SimTime(clock.now().0 + self.rto_estimator.get_timeout_interval());
        let timer = Timer {
            owner: self.owner(),
            kind: TimerKind::Rto,
            fire_at,
        };
        match clock.set_timeout_at(timer) {
            Ok(handle) => {
                self.rto_handle = Some(handle);
                debug!(fire_at = fire_at.0, "RTO 计时器启动");
            }
            Err(e) => warn!(error = %e, "RTO 计时器注册失败"),
        }
    }

    fn cancel_rto_timer(&mut self, clock: &mut SimClock) {
        if let Some(handle) = self.rto_handle.take() {
            if let Err(e) = clock.cancel_timeout(handle) {
                warn!(error = %e, "取消 RTO 计时器失败");
            }
        }
    }

    /// 启动空闲连接计时器。只有零字节待发送且在外数据
    /// 全部确认时才启动。
    fn start_idle_timer(&mut self, clock: &mut SimClock) {
        if self.idle_handle.is_some() || self.last_byte_acked < self.last_byte_sent {
            return;
        }
        let fire_at = SimTime(clock.now().0 + self.rto_estimator.get_timeout_interval());
        let timer = Timer {
            owner: self.owner(),
            kind: TimerKind::IdleConnection,
            fire_at,
        };
        match clock.set_timeout_at(timer) {
            Ok(handle) => self.idle_handle = Some(handle),
            Err(e) => warn!(error = %e, "空闲连接计时器注册失败"),
        }
    }

    fn cancel_idle_timer(&mut self, clock: &mut SimClock) {
        if let Some(handle) = self.idle_handle.take() {
            if let Err(e) = clock.cancel_timeout(handle) {
                warn!(error = %e, "取消空闲连接计时器失败");
            }
        }
    }
}
