//! TCP 拥塞控制仿真 CLI
//!
//! 在发送端 ↔ 瓶颈路由器 ↔ 接收端的固定拓扑上仿真一条 TCP 流，
//! 每轮打印拥塞控制参数，结束时报告发送端利用率。

use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use tcpsim_rs::report::{env_filter, ReportScope};
use tcpsim_rs::tcp::MSS;
use tcpsim_rs::{Session, SessionOpts, TcpVariant};

#[derive(Debug, Parser)]
#[command(
    name = "tcpsim",
    about = "三节点拓扑上的 TCP 拥塞控制仿真（Tahoe / Reno / NewReno）"
)]
struct Args {
    /// TCP 发送端变体：Tahoe | Reno | NewReno
    variant: String,

    /// 仿真轮数（一轮 ≈ 一个 RTT）
    iterations: u32,

    /// 丢包率 [0,1]：路由器按此概率损坏途经的数据段
    loss_rate: f32,

    /// 路由器缓冲容量（字节）
    #[arg(long, default_value_t = 6 * MSS + 100)]
    buffer_bytes: i64,

    /// 接收窗口（字节）
    #[arg(long, default_value_t = 65536)]
    rcv_window: i64,

    /// link1 的传输时延（tick 的小数）；link2 固定为其 10 倍
    #[arg(long, default_value_t = 0.001)]
    latency: f64,

    /// 应用层要发送的数据量（字节）
    #[arg(long, default_value_t = 10_000_000)]
    data_bytes: i64,

    /// 随机数种子，用于可重复的丢包序列
    #[arg(long)]
    seed: Option<u64>,

    /// 启用分组件的详细日志（逗号分隔）
    #[arg(long, value_enum, value_delimiter = ',')]
    report: Vec<ReportScope>,

    /// 把每轮拥塞指标写成 JSON 文件；不填则不生成
    #[arg(long)]
    metrics_json: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(&args.report))
        .with_target(true)
        .init();

    let variant: TcpVariant = match args.variant.parse() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if args.iterations == 0 {
        eprintln!("the number of iterations must be positive");
        return ExitCode::FAILURE;
    }
    if !(0.0..=1.0).contains(&args.loss_rate) {
        eprintln!("packet loss rate must be within [0, 1], got {}", args.loss_rate);
        return ExitCode::FAILURE;
    }

    let opts = SessionOpts {
        variant,
        iterations: args.iterations,
        loss_rate: args.loss_rate,
        buffer_capacity: args.buffer_bytes,
        rcv_window: args.rcv_window,
        latency: args.latency,
        total_bytes: args.data_bytes,
        rng_seed: args.seed,
    };

    let mut session = Session::new(opts);
    if let Err(e) = session.run() {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    if let Some(path) = args.metrics_json {
        let json = match serde_json::to_string_pretty(session.metrics()) {
            Ok(json) => json,
            Err(e) => {
                eprintln!("serialize tick metrics: {e}");
                return ExitCode::FAILURE;
            }
        };
        if let Err(e) = fs::write(&path, json) {
            eprintln!("write {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
        eprintln!("wrote tick metrics to {}", path.display());
    }

    ExitCode::SUCCESS
}
