//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 固定窗口限流器
//!
//! 每个身份（`ip:<addr>` 或 `user:<id>`）一个计数窗口。窗口过期后第一次请求原子地重置窗口。
//! 固定窗口在窗口边界处最多允许 `2×limit` 的突发，这是算法本身的特性。

use crate::constants::{IP_KEY_PREFIX, USER_KEY_PREFIX};
use crate::store::{wall_clock, KeyedStateStore, Sweepable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, trace};

/// 单次限流检查的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateDecision {
    /// 是否允许
    pub allowed: bool,
    /// 本窗口的有效上限
    pub limit: u64,
    /// 本窗口剩余可用次数
    pub remaining: u64,
    /// 建议的重试等待秒数（向上取整，拒绝时至少为1；允许时为0）
    pub retry_after_secs: u64,
    /// 距离窗口重置的时长
    pub reset_after: Duration,
}

impl RateDecision {
    /// 距离窗口重置的秒数（向上取整）
    pub fn reset_after_secs(&self) -> u64 {
        ceil_secs(self.reset_after)
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let millis = duration.as_millis();
    ((millis + 999) / 1000) as u64
}

/// 限流键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    /// 匿名请求按IP限流
    Ip(String),
    /// 已认证请求按用户限流
    User(String),
}

impl RateLimitKey {
    /// 选择限流键：启用用户限流且有用户身份时按用户，否则按IP
    pub fn derive(ip: &str, user_id: Option<&str>, user_limiting_enabled: bool) -> Self {
        match user_id {
            Some(user) if user_limiting_enabled && !user.is_empty() => {
                RateLimitKey::User(user.to_string())
            }
            _ => RateLimitKey::Ip(ip.to_string()),
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, RateLimitKey::User(_))
    }

    /// 有效上限：用户键为 `floor(base * multiplier)`，且不低于基础上限
    pub fn effective_limit(&self, base: u64, multiplier: f64) -> u64 {
        match self {
            RateLimitKey::Ip(_) => base,
            RateLimitKey::User(_) => {
                let scaled = (base as f64 * multiplier).floor();
                if scaled.is_finite() && scaled > base as f64 {
                    if scaled >= u64::MAX as f64 {
                        u64::MAX
                    } else {
                        scaled as u64
                    }
                } else {
                    base
                }
            }
        }
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitKey::Ip(ip) => write!(f, "{}{}", IP_KEY_PREFIX, ip),
            RateLimitKey::User(user) => write!(f, "{}{}", USER_KEY_PREFIX, user),
        }
    }
}

/// 单个身份的计数窗口
#[derive(Debug, Clone)]
pub struct RateWindow {
    /// 本窗口内的请求次数（包括被拒绝的请求）
    count: u64,
    window_start: Instant,
    last_seen: Instant,
}

impl RateWindow {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            count: 0,
            window_start: now,
            last_seen: now,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    fn check(&mut self, limit: u64, window: Duration, now: Instant) -> RateDecision {
        self.last_seen = now;
        let mut elapsed = now.duration_since(self.window_start);

        if self.count == 0 || elapsed > window {
            self.count = 0;
            self.window_start = now;
            elapsed = Duration::ZERO;
        }

        let reset_after = window.saturating_sub(elapsed);
        let allowed = self.count < limit;
        self.count = self.count.saturating_add(1);

        RateDecision {
            allowed,
            limit,
            remaining: limit.saturating_sub(self.count),
            retry_after_secs: if allowed {
                0
            } else {
                ceil_secs(reset_after).max(1)
            },
            reset_after,
        }
    }
}

impl Default for RateWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl Sweepable for RateWindow {
    fn is_stale(&self, retention: Duration) -> bool {
        self.last_seen.elapsed() > retention
    }
}

/// 窗口快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateWindowSnapshot {
    pub key: String,
    pub count: u64,
    pub window_started_at: DateTime<Utc>,
}

/// 限流统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStats {
    /// 当前跟踪的身份数
    pub tracked_keys: usize,
    /// 累计允许次数
    pub total_allowed: u64,
    /// 累计拒绝次数
    pub total_denied: u64,
    /// 各窗口快照，按键排序
    pub windows: Vec<RateWindowSnapshot>,
}

/// 固定窗口限流器
///
/// # 示例
/// ```rust
/// use gatewarden::rate_limiter::RateLimiter;
/// use std::time::Duration;
///
/// let limiter = RateLimiter::new();
/// let decision = limiter.allow("ip:10.0.0.1", 100, Duration::from_secs(60));
/// assert!(decision.allowed);
/// assert_eq!(decision.remaining, 99);
/// ```
pub struct RateLimiter {
    windows: KeyedStateStore<RateWindow>,
    total_allowed: AtomicU64,
    total_denied: AtomicU64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: KeyedStateStore::new("rate_windows"),
            total_allowed: AtomicU64::new(0),
            total_denied: AtomicU64::new(0),
        }
    }

    /// 检查并计数
    ///
    /// 被拒绝的请求同样计入窗口，窗口计数因此反映真实的请求压力。
    pub fn allow(&self, key: &str, limit: u64, window: Duration) -> RateDecision {
        let now = Instant::now();
        let decision = self
            .windows
            .with_entry(key, RateWindow::new, |w| w.check(limit, window, now));

        if decision.allowed {
            self.total_allowed.fetch_add(1, Ordering::Relaxed);
            trace!("限流允许: key={}, remaining={}", key, decision.remaining);
        } else {
            self.total_denied.fetch_add(1, Ordering::Relaxed);
            debug!(
                "限流拒绝: key={}, limit={}, retry_after={}s",
                key, limit, decision.retry_after_secs
            );
        }
        decision
    }

    /// 当前窗口的计数（不存在时为0）
    pub fn current_count(&self, key: &str) -> u64 {
        self.windows.with_existing(key, |w| w.count).unwrap_or(0)
    }

    /// 清除某个身份的窗口
    #[instrument(skip(self))]
    pub fn reset(&self, key: &str) -> bool {
        let removed = self.windows.remove(key);
        if removed {
            info!("重置限流窗口: key={}", key);
        }
        removed
    }

    /// 统计信息
    pub fn stats(&self) -> RateLimitStats {
        let mut windows = self.windows.snapshot(|key, w| RateWindowSnapshot {
            key: key.to_string(),
            count: w.count,
            window_started_at: wall_clock(w.window_start).unwrap_or_else(Utc::now),
        });
        windows.sort_by(|a, b| a.key.cmp(&b.key));

        RateLimitStats {
            tracked_keys: windows.len(),
            total_allowed: self.total_allowed.load(Ordering::Relaxed),
            total_denied: self.total_denied.load(Ordering::Relaxed),
            windows,
        }
    }

    /// 清理长期空闲的窗口
    pub fn sweep(&self, retention: Duration) -> usize {
        let removed = self.windows.sweep(retention);
        debug!("限流窗口清理完成: removed={}", removed);
        removed
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
