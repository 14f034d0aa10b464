//! 仿真时钟
//!
//! 维护当前时间与已注册的计时器。时钟每一轮外层迭代前进
//! 一个 tick；计时器的检查时机由调用方决定。

use super::time::SimTime;
use super::timer::{Timer, TimerHandle, TimerKind, TimerOwner};
use crate::error::SimError;
use tracing::{debug, trace};

/// 按 tick 推进的仿真时钟，兼计时器登记处。
#[derive(Debug)]
pub struct SimClock {
    now: SimTime,
    increment: f64,
    next_handle: u64,
    /// 注册顺序保存，检查时按此顺序触发
    timers: Vec<(TimerHandle, Timer)>,
}

impl Default for SimClock {
    fn default() -> Self {
        // 第一轮迭代从 1.0 开始
        Self {
            now: SimTime(1.0),
            increment: 1.0,
            next_handle: 0,
            timers: Vec::new(),
        }
    }
}

impl SimClock {
    /// 获取当前仿真时间
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// 每轮迭代的时间增量（tick）
    pub fn time_increment(&self) -> f64 {
        self.increment
    }

    /// 在一轮迭代结束时把时钟拨快一个 tick
    pub fn advance(&mut self) {
        self.now = SimTime(self.now.0 + self.increment);
        trace!(now = self.now.0, "时钟前进");
    }

    /// 注册一个计时器，在指定时间到期。
    ///
    /// 时钟保存 `timer` 的独立拷贝，调用方可以继续复用自己的描述；
    /// 返回的句柄用于 [`Self::cancel_timeout`]。同一归属组件的同一种
    /// 计时器最多注册一个，重复注册是编程错误。
    pub fn set_timeout_at(&mut self, timer: Timer) -> Result<TimerHandle, SimError> {
        if self
            .timers
            .iter()
            .any(|(_, t)| t.owner == timer.owner && t.kind == timer.kind)
        {
            return Err(SimError::InvalidTimer("attempting to add an existing timer"));
        }
        let handle = TimerHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.timers.push((handle, timer));
        debug!(
            kind = ?timer.kind,
            fire_at = timer.fire_at.0,
            registered = self.timers.len(),
            "计时器已注册"
        );
        Ok(handle)
    }

    /// 取消一个正在运行的计时器。取消未知句柄是编程错误。
    pub fn cancel_timeout(&mut self, handle: TimerHandle) -> Result<(), SimError> {
        let pos = self
            .timers
            .iter()
            .position(|(h, _)| *h == handle)
            .ok_or(SimError::InvalidTimer(
                "attempting to cancel a non-existing timer",
            ))?;
        let (_, timer) = self.timers.remove(pos);
        debug!(kind = ?timer.kind, "计时器已取消");
        Ok(())
    }

    /// 检查归属于 `owner` 的计时器是否到期，按注册顺序返回到期的
    /// 种类并把它们从登记处移除。
    ///
    /// 先对登记处做快照再移除，因此回调过程中新注册的计时器不会在
    /// 同一次检查中触发。
    pub fn check_expired_timers(&mut self, owner: TimerOwner) -> Vec<TimerKind> {
        let now = self.now.0;
        let expired: Vec<TimerKind> = self
            .timers
            .iter()
            .filter(|(_, t)| t.owner == owner && t.fire_at.0 <= now)
            .map(|(_, t)| t.kind)
            .collect();
        self.timers
            .retain(|(_, t)| !(t.owner == owner && t.fire_at.0 <= now));
        if !expired.is_empty() {
            debug!(now, count = expired.len(), "计时器到期");
        }
        expired
    }

    /// 当前注册的计时器数量（供调试与测试使用）
    pub fn registered_timers(&self) -> usize {
        self.timers.len()
    }
}
