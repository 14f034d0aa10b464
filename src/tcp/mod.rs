//! TCP 协议模块
//!
//! 此模块包含 TCP 连接两端的协议逻辑：RTO 估计器、接收端、
//! 发送端状态机（Tahoe / Reno / NewReno）以及端点调度器。

// 子模块声明
mod endpoint;
mod receiver;
mod rto;
mod sender;

// 重新导出公共接口
pub use endpoint::Endpoint;
pub use receiver::Receiver;
pub use rto::RtoEstimator;
pub use sender::{
    Sender, SenderMetrics, SenderStateKind, SenderStats, TcpVariant, DUP_ACK_THRESHOLD, MSS,
};
