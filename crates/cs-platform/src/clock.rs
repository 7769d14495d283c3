use chrono::Utc;
use tokio::time::Instant;

use cs_core::ports::ClockPort;

/// Wall clock as reported by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ClockPort for SystemClock {
    fn now_secs(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Wall clock anchored once, then advanced by the runtime's monotonic clock
///
/// 启动时记录一次墙上时间,之后按 tokio 单调时钟推进。
/// 墙上时间回拨不会影响它;在暂停时间的测试中随 `tokio::time` 前进。
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor_secs: i64,
    started: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now().timestamp())
    }

    pub fn starting_at(anchor_secs: i64) -> Self {
        Self {
            anchor_secs,
            started: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockPort for MonotonicClock {
    fn now_secs(&self) -> i64 {
        let elapsed = self.started.elapsed().as_secs().min(i64::MAX as u64) as i64;
        self.anchor_secs.saturating_add(elapsed)
    }
}
