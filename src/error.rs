//! 错误类型
//!
//! 定义仿真器的统一错误枚举。编程错误（路由缺失、未知 TCP 变体）
//! 会中止运行；计时器登记错误由发送端/接收端记录日志后继续。

use crate::net::NodeId;

/// 仿真器错误
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// 计时器登记错误：重复注册或取消一个不存在的句柄
    #[error("invalid timer: {0}")]
    InvalidTimer(&'static str),

    /// 转发表中没有该目的节点的表项
    #[error("no route for destination {0:?}")]
    NoRoute(NodeId),

    /// 未知的 TCP 发送端变体
    #[error("unknown TCP sender variant: {0:?} (expected Tahoe, Reno or NewReno)")]
    UnknownVariant(String),
}
