//! 统计信息
//!
//! 定义路由器转发统计数据结构。丢包与损坏是被建模的事件，
//! 不是错误，只在这里计数。

/// 路由器统计信息
#[derive(Debug, Default, Clone)]
pub struct RouterStats {
    pub forwarded_pkts: u64,
    pub dropped_pkts: u64,
    pub dropped_bytes: u64,
    pub corrupted_pkts: u64,
}
