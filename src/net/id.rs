//! 标识符类型
//!
//! 定义节点和链路的唯一标识符。链路标识符同时用作
//! 路由器输出端口的键。

/// 节点标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// 链路标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub usize);
