//! 分组件的详细日志
//!
//! 原始的报表位掩码（仿真器 | 链路 | 路由器 | 发送端 | 接收端 |
//! RTO 估计）映射为按模块的 tracing 过滤指令：每个作用域对应一
//! 个模块 target，选中的作用域放开到 debug 级别。指标行不受此
//! 影响，总是打印。

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// 可选的报表作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportScope {
    /// 仿真运行器（每轮的开始/结束）
    Simulator,
    /// 链路活动
    Links,
    /// 路由器活动（含丢包）
    Routers,
    /// 发送端及其状态机
    Senders,
    /// 接收端
    Receivers,
    /// RTO 估计
    RtoEstimate,
}

impl ReportScope {
    /// 作用域对应的 tracing target（模块路径）
    fn target(self) -> &'static str {
        match self {
            ReportScope::Simulator => "tcpsim_rs::session",
            ReportScope::Links => "tcpsim_rs::net::link",
            ReportScope::Routers => "tcpsim_rs::net::router",
            ReportScope::Senders => "tcpsim_rs::tcp::sender",
            ReportScope::Receivers => "tcpsim_rs::tcp::receiver",
            ReportScope::RtoEstimate => "tcpsim_rs::tcp::rto",
        }
    }
}

/// 由选中的作用域构造日志过滤器。基础级别来自 `RUST_LOG`
/// 环境变量，没有设置时只放出 warn 及以上。
pub fn env_filter(scopes: &[ReportScope]) -> EnvFilter {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    for scope in scopes {
        if let Ok(directive) = format!("{}=debug", scope.target()).parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}
