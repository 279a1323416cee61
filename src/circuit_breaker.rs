//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 熔断器实现
//!
//! 按端点键（`METHOD path`）维护独立的三状态熔断器。
//!
//! # 特性
//!
//! - **三状态**: Closed（关闭）、Open（打开）、HalfOpen（半开）
//! - **按量熔断**: 请求量达到阈值后，失败率或失败次数超限即熔断
//! - **自动恢复**: 最后一次失败之后经过 `interval` 进入半开探测
//! - **有限探测**: 半开状态最多放行 `max_requests` 个试探请求
//! - **非阻塞**: 所有操作只做一次表查找加O(1)计算

use crate::config::serde_duration;
use crate::constants::{
    DEFAULT_BREAKER_FAILURE_THRESHOLD, DEFAULT_BREAKER_INTERVAL_SECS,
    DEFAULT_BREAKER_MAX_FAILURES, DEFAULT_BREAKER_MAX_REQUESTS,
    DEFAULT_BREAKER_REQUEST_VOLUME_THRESHOLD, DEFAULT_BREAKER_SUCCESS_THRESHOLD,
    DEFAULT_BREAKER_TIMEOUT_SECS,
};
use crate::error::{CircuitBreakerStats, CircuitState};
use crate::events::{AdmissionEvent, EventSink, TracingEventSink};
use crate::store::{wall_clock, KeyedStateStore, Sweepable};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, trace, warn};

/// 熔断器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// 半开状态允许的试探请求数
    pub max_requests: u64,
    /// 关闭状态的计数周期，同时是打开状态等待探测的时长
    #[serde(with = "serde_duration")]
    pub interval: Duration,
    /// 请求级超时（保留给外层超时中间件）
    #[serde(with = "serde_duration")]
    pub timeout: Duration,
    /// 失败次数阈值
    pub max_failures: u64,
    /// 失败率阈值
    pub failure_threshold: f64,
    /// 半开状态恢复所需的成功率
    pub success_threshold: f64,
    /// 评估熔断前需要的最少请求数
    pub request_volume_threshold: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_BREAKER_MAX_REQUESTS,
            interval: Duration::from_secs(DEFAULT_BREAKER_INTERVAL_SECS),
            timeout: Duration::from_secs(DEFAULT_BREAKER_TIMEOUT_SECS),
            max_failures: DEFAULT_BREAKER_MAX_FAILURES,
            failure_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_BREAKER_SUCCESS_THRESHOLD,
            request_volume_threshold: DEFAULT_BREAKER_REQUEST_VOLUME_THRESHOLD,
        }
    }
}

impl CircuitBreakerConfig {
    /// 创建新的熔断器配置
    ///
    /// # 示例
    /// ```rust
    /// use gatewarden::circuit_breaker::CircuitBreakerConfig;
    /// use std::time::Duration;
    ///
    /// let config = CircuitBreakerConfig::new(5, 0.8, Duration::from_secs(60))
    ///     .max_requests(3)
    ///     .request_volume_threshold(20);
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn new(max_failures: u64, success_threshold: f64, interval: Duration) -> Self {
        Self {
            max_failures,
            success_threshold,
            interval,
            ..Self::default()
        }
    }

    /// 设置半开状态的试探请求数
    pub fn max_requests(mut self, max_requests: u64) -> Self {
        self.max_requests = max_requests;
        self
    }

    /// 设置计数周期/探测等待时长
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// 设置请求级超时
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 设置失败次数阈值
    pub fn max_failures(mut self, max_failures: u64) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// 设置失败率阈值
    pub fn failure_threshold(mut self, threshold: f64) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// 设置恢复成功率
    pub fn success_threshold(mut self, threshold: f64) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// 设置最少请求数
    pub fn request_volume_threshold(mut self, threshold: u64) -> Self {
        self.request_volume_threshold = threshold;
        self
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), String> {
        if self.max_requests == 0 {
            return Err("max_requests 必须大于0".to_string());
        }
        if self.interval.is_zero() {
            return Err("interval 必须大于0".to_string());
        }
        if self.max_failures == 0 {
            return Err("max_failures 必须大于0".to_string());
        }
        if !(self.failure_threshold > 0.0 && self.failure_threshold <= 1.0) {
            return Err(format!(
                "failure_threshold 必须在 (0, 1] 范围内: {}",
                self.failure_threshold
            ));
        }
        if !(self.success_threshold > 0.0 && self.success_threshold <= 1.0) {
            return Err(format!(
                "success_threshold 必须在 (0, 1] 范围内: {}",
                self.success_threshold
            ));
        }
        Ok(())
    }
}

/// 下游请求结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// 收到HTTP响应
    Status(u16),
    /// 传输层错误（连接失败、读写错误等）
    TransportError,
    /// 被外层超时中断
    Timeout,
}

impl Outcome {
    /// 状态码 >= 500、传输错误和超时都算失败；4xx是客户端问题，不算失败
    pub fn is_failure(&self) -> bool {
        match self {
            Outcome::Status(status) => *status >= 500,
            Outcome::TransportError | Outcome::Timeout => true,
        }
    }

    pub fn is_success(&self) -> bool {
        !self.is_failure()
    }
}

impl From<u16> for Outcome {
    fn from(status: u16) -> Self {
        Outcome::Status(status)
    }
}

/// 状态变更
type Transition = (CircuitState, CircuitState);

/// 单个端点的熔断状态
#[derive(Debug, Clone)]
pub struct BreakerState {
    state: CircuitState,
    requests: u64,
    failures: u64,
    successes: u64,
    /// 半开状态已放行的试探请求数
    trials: u64,
    /// 关闭状态当前计数周期的起点
    period_start: Instant,
    last_failure: Option<Instant>,
    last_transition: Instant,
    last_trial: Option<Instant>,
    last_seen: Instant,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakerState {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            state: CircuitState::Closed,
            requests: 0,
            failures: 0,
            successes: 0,
            trials: 0,
            period_start: now,
            last_failure: None,
            last_transition: now,
            last_trial: None,
            last_seen: now,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    fn reset_counters(&mut self, now: Instant) {
        self.requests = 0;
        self.failures = 0;
        self.successes = 0;
        self.trials = 0;
        self.last_trial = None;
        self.period_start = now;
    }

    fn transition(&mut self, to: CircuitState, now: Instant) -> Transition {
        let from = self.state;
        self.state = to;
        self.last_transition = now;
        match to {
            CircuitState::Closed | CircuitState::HalfOpen => self.reset_counters(now),
            CircuitState::Open => {
                self.last_failure = Some(now);
                self.trials = 0;
                self.last_trial = None;
            }
        }
        (from, to)
    }

    /// 准入判断
    fn admit(&mut self, config: &CircuitBreakerConfig, now: Instant) -> (bool, Option<Transition>) {
        self.last_seen = now;
        match self.state {
            CircuitState::Closed => {
                if now.duration_since(self.period_start) > config.interval {
                    self.reset_counters(now);
                }
                (true, None)
            }
            CircuitState::Open => {
                let waited = self
                    .last_failure
                    .map_or(true, |at| now.duration_since(at) > config.interval);
                if !waited {
                    return (false, None);
                }
                let transition = self.transition(CircuitState::HalfOpen, now);
                // 触发转换的请求本身就是第一个试探请求
                self.trials = 1;
                self.last_trial = Some(now);
                (true, Some(transition))
            }
            CircuitState::HalfOpen => {
                // 试探请求的结果迟迟不来时，重新开放名额
                if self.trials >= config.max_requests
                    && self
                        .last_trial
                        .map_or(false, |at| now.duration_since(at) > config.interval)
                {
                    self.trials = self.requests;
                }
                if self.trials < config.max_requests {
                    self.trials += 1;
                    self.last_trial = Some(now);
                    (true, None)
                } else {
                    (false, None)
                }
            }
        }
    }

    /// 记录结果
    fn record(
        &mut self,
        success: bool,
        config: &CircuitBreakerConfig,
        now: Instant,
    ) -> Option<Transition> {
        self.last_seen = now;
        match self.state {
            CircuitState::Closed => {
                if now.duration_since(self.period_start) > config.interval {
                    self.reset_counters(now);
                }
                self.count(success, now);
                let failure_rate = self.failures as f64 / self.requests as f64;
                if self.requests >= config.request_volume_threshold
                    && (failure_rate >= config.failure_threshold
                        || self.failures >= config.max_failures)
                {
                    Some(self.transition(CircuitState::Open, now))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                self.count(success, now);
                if self.requests < config.max_requests {
                    return None;
                }
                let success_rate = self.successes as f64 / self.requests as f64;
                if success_rate >= config.success_threshold {
                    Some(self.transition(CircuitState::Closed, now))
                } else {
                    Some(self.transition(CircuitState::Open, now))
                }
            }
            CircuitState::Open => None,
        }
    }

    fn count(&mut self, success: bool, now: Instant) {
        self.requests += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
            self.last_failure = Some(now);
        }
    }

    fn stats(&self, key: &str) -> CircuitBreakerStats {
        CircuitBreakerStats {
            key: key.to_string(),
            state: self.state,
            requests: self.requests,
            failures: self.failures,
            successes: self.successes,
            last_failure_at: self.last_failure.and_then(wall_clock),
            last_transition_at: wall_clock(self.last_transition).unwrap_or_else(Utc::now),
        }
    }
}

impl Sweepable for BreakerState {
    /// 只清理长期空闲的关闭状态熔断器
    fn is_stale(&self, retention: Duration) -> bool {
        self.state == CircuitState::Closed && self.last_seen.elapsed() > retention
    }
}

/// 按端点键管理的熔断器
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    breakers: KeyedStateStore<BreakerState>,
    sink: Arc<dyn EventSink>,
}

impl CircuitBreaker {
    /// 创建新的熔断器
    ///
    /// # 示例
    /// ```rust
    /// use gatewarden::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
    /// use std::time::Duration;
    ///
    /// let config = CircuitBreakerConfig::new(5, 0.8, Duration::from_secs(60));
    /// let breaker = CircuitBreaker::new(config);
    /// assert!(breaker.allow_request("GET /api/posts"));
    /// ```
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_event_sink(config, Arc::new(TracingEventSink))
    }

    /// 使用指定的事件接收器创建熔断器
    pub fn with_event_sink(config: CircuitBreakerConfig, sink: Arc<dyn EventSink>) -> Self {
        info!(
            "创建熔断器: max_requests={}, interval={:?}, max_failures={}, failure_threshold={}, success_threshold={}, request_volume_threshold={}",
            config.max_requests,
            config.interval,
            config.max_failures,
            config.failure_threshold,
            config.success_threshold,
            config.request_volume_threshold
        );

        Self {
            config,
            breakers: KeyedStateStore::new("circuit_breakers"),
            sink,
        }
    }

    /// 判断端点是否允许请求
    ///
    /// 打开状态等待期满时会转为半开并放行本次请求。
    pub fn allow_request(&self, key: &str) -> bool {
        let now = Instant::now();
        let (allowed, transition) = self
            .breakers
            .with_entry(key, BreakerState::new, |state| state.admit(&self.config, now));

        if let Some(transition) = transition {
            self.on_transition(key, transition);
        }
        if !allowed {
            trace!("熔断器拒绝请求: key={}", key);
        }
        allowed
    }

    /// 记录已放行请求的结果
    pub fn record_result(&self, key: &str, success: bool, duration: Duration) {
        let now = Instant::now();
        let (transition, state) = self.breakers.with_entry(key, BreakerState::new, |state| {
            let transition = state.record(success, &self.config, now);
            (transition, state.state)
        });

        if transition.is_none() && state == CircuitState::Open {
            trace!("熔断器打开状态下收到迟到的结果，忽略: key={}", key);
        }
        trace!(
            "记录结果: key={}, success={}, duration={:?}",
            key,
            success,
            duration
        );

        if let Some(transition) = transition {
            self.on_transition(key, transition);
        }
    }

    /// 按请求结果记录
    pub fn record_outcome(&self, key: &str, outcome: Outcome, duration: Duration) {
        self.record_result(key, outcome.is_success(), duration);
    }

    fn on_transition(&self, key: &str, (from, to): Transition) {
        match to {
            CircuitState::Open => warn!("熔断器状态变更: key={}, {} -> Open", key, from),
            _ => info!("熔断器状态变更: key={}, {} -> {}", key, from, to),
        }
        self.sink
            .emit(AdmissionEvent::breaker_transition(key, from, to));
    }

    /// 当前状态（未见过的端点视为关闭）
    pub fn state(&self, key: &str) -> CircuitState {
        self.breakers
            .with_existing(key, |state| state.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// 所有端点的统计信息，按键排序
    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats = self.breakers.snapshot(|key, state| state.stats(key));
        stats.sort_by(|a, b| a.key.cmp(&b.key));
        stats
    }

    /// 单个端点的统计信息
    pub fn stats_for(&self, key: &str) -> Option<CircuitBreakerStats> {
        self.breakers.with_existing(key, |state| state.stats(key))
    }

    /// 重置单个端点，返回端点是否存在
    #[instrument(skip(self))]
    pub fn reset(&self, key: &str) -> bool {
        let now = Instant::now();
        let previous = self.breakers.with_existing(key, |state| {
            let previous = state.state;
            state.transition(CircuitState::Closed, now);
            state.last_failure = None;
            previous
        });

        match previous {
            Some(from) => {
                info!("重置熔断器: key={}", key);
                if from != CircuitState::Closed {
                    self.sink.emit(AdmissionEvent::breaker_transition(
                        key,
                        from,
                        CircuitState::Closed,
                    ));
                }
                true
            }
            None => false,
        }
    }

    /// 重置所有端点，返回重置数量
    #[instrument(skip(self))]
    pub fn reset_all(&self) -> usize {
        let now = Instant::now();
        let mut count = 0;
        let mut reopened = Vec::new();
        self.breakers.for_each_mut(|key, state| {
            count += 1;
            if state.state != CircuitState::Closed {
                reopened.push((key.to_string(), state.state));
            }
            state.transition(CircuitState::Closed, now);
            state.last_failure = None;
        });

        info!("重置所有熔断器: count={}", count);
        for (key, from) in reopened {
            self.sink.emit(AdmissionEvent::breaker_transition(
                &key,
                from,
                CircuitState::Closed,
            ));
        }
        count
    }

    /// 清理空闲的关闭状态熔断器
    pub fn sweep(&self, retention: Duration) -> usize {
        let removed = self.breakers.sweep(retention);
        debug!("熔断器清理完成: removed={}", removed);
        removed
    }

    /// 已跟踪的端点数
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// 获取配置
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
