//! 网络模型模块
//!
//! 此模块包含网络模型的核心组件：TCP 段、链路、瓶颈路由器及其
//! 共享缓冲与统计信息。

// 子模块声明
mod buffer;
mod id;
mod link;
mod router;
mod segment;
mod stats;

// 重新导出公共接口
pub use buffer::DropTailBuffer;
pub use id::{LinkId, NodeId};
pub use link::{Delivery, Link, LinkMode};
pub use router::Router;
pub use segment::Segment;
pub use stats::RouterStats;
