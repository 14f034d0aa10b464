//! 模拟计时器
//!
//! 仿真组件不能使用系统计时器，计时器必须运行在仿真时间上。
//! 组件以值的形式构造 [`Timer`] 描述；时钟在注册时保存自己的拷贝，
//! 并返回一个不透明句柄用于取消。

use super::time::SimTime;
use crate::net::NodeId;

/// 计时器归属的协议模块
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerRole {
    Sender,
    Receiver,
}

/// 计时器的归属：节点 + 模块
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerOwner {
    pub node: NodeId,
    pub role: TimerRole,
}

/// 计时器种类，供归属组件区分同时运行的多个计时器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// 重传超时（RTO）
    Rto,
    /// 连接空闲超时
    IdleConnection,
    /// 延迟 ACK
    DelayedAck,
}

/// 计时器描述（值类型）
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    pub owner: TimerOwner,
    pub kind: TimerKind,
    /// 到期时间
    pub fire_at: SimTime,
}

/// 取消句柄（不透明 id）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(pub(crate) u64);
