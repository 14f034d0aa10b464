//! 重传超时（RTO）估计
//!
//! 按 RFC 6298 在线估计平滑 RTT 与 RTT 偏差，并维护指数退避。
//! 时间单位是仿真时钟的 tick 而不是秒。
//!
//! 段的发出时刻记录在 [`crate::net::Segment::timestamp`] 中并由
//! 对应的确认段原样带回；时间戳为 -1 表示重传段，按 Karn 算法
//! 不对重传段做 RTT 采样。

use tracing::debug;

/// alpha = 1/8 的二进制指数
const ALPHA_SHIFT: u32 = 3;
/// beta = 1/4 的二进制指数
const BETA_SHIFT: u32 = 2;
/// 偏差倍数 K = 4 的二进制指数
const STD_DEV_MULT_SHIFT: u32 = 2;

/// RTO 估计器。新 ACK 到达后更新：
///
/// ```text
/// EstimatedRTT[new] = 7/8 * EstimatedRTT[old] + 1/8 * SampleRTT
/// DeviationRTT[new] = 3/4 * DeviationRTT[old] + 1/4 * |SampleRTT - EstimatedRTT[old]|
/// TimeoutInterval   = EstimatedRTT + max(tick, 4 * DeviationRTT)
/// ```
///
/// 首个样本按 RFC 6298 直接作为估计值，偏差取其一半。
#[derive(Debug, Clone)]
pub struct RtoEstimator {
    /// 平滑 RTT 估计（tick）
    estimated_rtt: i64,
    /// RTT 偏差估计（tick）
    dev_rtt: i64,
    /// 基础超时间隔（tick）
    timeout_interval: f64,
    /// 指数退避系数（2 的幂）
    backoff: i64,
    /// tick 时长
    tick_duration: f64,
    /// 超时间隔上限，不超过 240 个 tick
    max_timeout_interval: f64,
}

impl RtoEstimator {
    /// 以默认初值（估计 0、偏差 12、基础超时 6.0、上限 240）创建
    pub fn new(tick: f64) -> Self {
        Self::with_params(tick, 0.0, 12.0, 6.0, 240.0)
    }

    /// 以给定初值创建。输入以 tick 为单位，越界的输入落回默认值。
    pub fn with_params(
        tick: f64,
        estimated_rtt_init: f64,
        dev_rtt_init: f64,
        base_init: f64,
        max_rto: f64,
    ) -> Self {
        let tick_duration = if tick > 0.0 { tick } else { 1.0 };
        let estimated_rtt = if estimated_rtt_init >= 0.0 {
            (estimated_rtt_init / tick_duration) as i64
        } else {
            0
        };
        let dev_rtt = if dev_rtt_init >= 0.0 {
            (dev_rtt_init / tick_duration) as i64
        } else {
            0
        };
        let mut max_timeout_interval = 240.0;
        if max_rto > 0.0 && max_rto <= 240.0 {
            max_timeout_interval = max_rto / tick_duration;
        }
        let timeout_interval = if base_init >= 0.0 {
            base_init
        } else {
            max_timeout_interval
        };
        Self {
            estimated_rtt,
            dev_rtt,
            timeout_interval,
            backoff: 1,
            tick_duration,
            max_timeout_interval,
        }
    }

    /// 用一个新确认的段更新 RTT 估计并重算基础超时间隔。
    ///
    /// `timestamp` 为该段的发出时刻；负值表示重传段，直接忽略。
    /// 收到新 ACK 时退避系数复位为 1。
    pub fn update_rtt(&mut self, now: f64, timestamp: f64) {
        if timestamp < 0.0 {
            return;
        }
        self.backoff = 1;

        // 采样值四舍五入到整数个 tick，下限 1
        let mut sample = ((now - timestamp) / self.tick_duration + 0.5) as i64;
        if sample < 1 {
            sample = 1;
        }

        if self.estimated_rtt != 0 {
            let err = sample - self.estimated_rtt;
            self.estimated_rtt += err >> ALPHA_SHIFT;
            let err = err.abs();
            let delta = err - self.dev_rtt;
            self.dev_rtt += delta >> BETA_SHIFT;
        } else {
            // 首个样本：估计值取样本本身，偏差取其一半
            self.estimated_rtt = sample;
            self.dev_rtt = sample >> 1;
        }

        let mut base = self.estimated_rtt as f64
            + self
                .tick_duration
                .max((self.dev_rtt << STD_DEV_MULT_SHIFT) as f64);
        // RFC 6298：超时间隔不小于 1
        if base < 1.0 {
            base = 1.0;
        }
        self.timeout_interval = base * self.tick_duration;

        debug!(
            sample,
            estimated_rtt = self.estimated_rtt,
            dev_rtt = self.dev_rtt,
            timeout_interval = self.timeout_interval,
            backoff = self.backoff,
            "RTT 更新"
        );
    }

    /// 指数退避：重传计时器超时后把退避系数翻倍，
    /// 但不超过使 `timeout_interval * backoff` 越过上限的程度。
    pub fn timer_backoff(&mut self) {
        if self.timeout_interval * (self.backoff as f64) < self.max_timeout_interval {
            self.backoff <<= 1;
            debug!(backoff = self.backoff, "RTO 退避");
        }
    }

    /// 当前 RTO 值：基础超时间隔乘以退避系数，
    /// 下限一个 tick，上限 `max_timeout_interval`。
    pub fn get_timeout_interval(&self) -> f64 {
        (self.timeout_interval * self.backoff as f64)
            .clamp(self.tick_duration, self.max_timeout_interval)
    }

    pub fn estimated_rtt(&self) -> i64 {
        self.estimated_rtt
    }

    pub fn dev_rtt(&self) -> i64 {
        self.dev_rtt
    }

    pub fn backoff(&self) -> i64 {
        self.backoff
    }
}

impl Default for RtoEstimator {
    fn default() -> Self {
        Self::new(1.0)
    }
}
