//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! AdmissionGate 准入控制入口
//!
//! 每个请求调用一次 [`AdmissionGate::before`]，按顺序执行：
//! 黑名单 → 白名单 → 限流 → 熔断器。被放行的请求处理完成后调用
//! [`AdmissionGate::after`]，把结果回写给熔断器。
//!
//! 网关自身不持有全局状态，由调用方构造一次后以 `Arc` 共享给各请求处理器。

use crate::blacklist::{BlacklistEntry, BlacklistGuard};
use crate::circuit_breaker::{CircuitBreaker, Outcome};
use crate::config::AdmissionConfig;
use crate::error::{CircuitBreakerStats, Decision, DenyCode, GateError};
use crate::events::{AdmissionEvent, EventSink, TracingEventSink};
use crate::rate_limiter::{RateDecision, RateLimitKey, RateLimitStats, RateLimiter};
use crate::store::{spawn_sweeper, SweeperHandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, trace};

#[cfg(feature = "monitoring")]
use crate::events::FanoutEventSink;
#[cfg(feature = "monitoring")]
use crate::telemetry::Metrics;

/// 请求元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub method: String,
    pub path: String,
    pub client_ip: String,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RequestMeta {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        client_ip: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            client_ip: client_ip.into(),
            user_id: None,
            timestamp: Utc::now(),
        }
    }

    /// 附加已认证用户
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// 熔断器使用的端点键：`METHOD path`
    pub fn endpoint_key(&self) -> String {
        endpoint_key(&self.method, &self.path)
    }
}

/// 端点键：方法大写 + 空格 + 路径
pub fn endpoint_key(method: &str, path: &str) -> String {
    format!("{} {}", method.to_ascii_uppercase(), path)
}

/// 网关统计信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateStats {
    pub total_requests: u64,
    pub allowed: u64,
    pub denied_blacklisted: u64,
    pub denied_rate_limited: u64,
    pub denied_circuit_open: u64,
    pub whitelisted: u64,
    pub results_recorded: u64,
    pub tracked_breakers: usize,
    pub tracked_rate_windows: usize,
    pub blacklist_entries: usize,
}

impl GateStats {
    pub fn denied(&self) -> u64 {
        self.denied_blacklisted + self.denied_rate_limited + self.denied_circuit_open
    }
}

#[derive(Default)]
struct GateCounters {
    total_requests: AtomicU64,
    allowed: AtomicU64,
    denied_blacklisted: AtomicU64,
    denied_rate_limited: AtomicU64,
    denied_circuit_open: AtomicU64,
    whitelisted: AtomicU64,
    results_recorded: AtomicU64,
}

/// 后台清理任务句柄
///
/// 丢弃句柄或调用 [`MaintenanceHandle::shutdown`] 都会停止所有清理任务。
pub struct MaintenanceHandle {
    sweepers: Vec<SweeperHandle>,
}

impl MaintenanceHandle {
    /// 正在运行的清理任务名
    pub fn tasks(&self) -> Vec<&'static str> {
        self.sweepers.iter().map(SweeperHandle::name).collect()
    }

    pub fn is_running(&self) -> bool {
        self.sweepers.iter().any(|s| !s.is_finished())
    }

    /// 停止所有清理任务
    pub fn shutdown(self) {
        for sweeper in &self.sweepers {
            sweeper.abort();
        }
        info!("后台清理任务已停止: count={}", self.sweepers.len());
    }
}

/// 网关构建器
pub struct AdmissionGateBuilder {
    config: AdmissionConfig,
    sink: Option<Arc<dyn EventSink>>,
    #[cfg(feature = "monitoring")]
    metrics: Option<Arc<Metrics>>,
}

impl AdmissionGateBuilder {
    /// 设置事件接收器（默认 [`TracingEventSink`]）
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 挂载Prometheus指标
    #[cfg(feature = "monitoring")]
    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 校验配置并构建网关
    pub fn build(self) -> Result<AdmissionGate, GateError> {
        self.config.validate()?;

        let base: Arc<dyn EventSink> = self.sink.unwrap_or_else(|| Arc::new(TracingEventSink));

        #[cfg(feature = "monitoring")]
        let sink: Arc<dyn EventSink> = match &self.metrics {
            Some(metrics) => Arc::new(
                FanoutEventSink::new()
                    .with(base)
                    .with(metrics.clone() as Arc<dyn EventSink>),
            ),
            None => base,
        };
        #[cfg(not(feature = "monitoring"))]
        let sink: Arc<dyn EventSink> = base;

        let breaker = Arc::new(CircuitBreaker::with_event_sink(
            self.config.circuit_breaker.clone(),
            sink.clone(),
        ));
        let blacklist = Arc::new(BlacklistGuard::new(&self.config.rate_limit, sink.clone())?);
        let limiter = Arc::new(RateLimiter::new());

        info!(
            "创建准入网关: rate_limit={}, limit={}/{:?}, blacklist={}, whitelist={}, user_rate_limit={}",
            self.config.rate_limit.enable_rate_limit,
            self.config.rate_limit.default_limit,
            self.config.rate_limit.default_window,
            self.config.rate_limit.enable_ip_blacklist,
            self.config.rate_limit.enable_whitelist,
            self.config.rate_limit.enable_user_rate_limit
        );

        Ok(AdmissionGate {
            config: self.config,
            breaker,
            limiter,
            blacklist,
            sink,
            counters: GateCounters::default(),
            #[cfg(feature = "monitoring")]
            metrics: self.metrics,
        })
    }
}

/// 准入网关
pub struct AdmissionGate {
    config: AdmissionConfig,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    blacklist: Arc<BlacklistGuard>,
    sink: Arc<dyn EventSink>,
    counters: GateCounters,
    #[cfg(feature = "monitoring")]
    metrics: Option<Arc<Metrics>>,
}

impl AdmissionGate {
    /// 使用默认事件接收器创建网关
    ///
    /// # 示例
    /// ```rust
    /// use gatewarden::{AdmissionConfig, AdmissionGate, RequestMeta};
    /// use std::time::Duration;
    ///
    /// let gate = AdmissionGate::new(AdmissionConfig::default()).unwrap();
    /// let meta = RequestMeta::new("GET", "/api/posts", "203.0.113.10");
    ///
    /// let decision = gate.before(&meta);
    /// assert!(decision.is_allowed());
    /// gate.after(&meta, 200, Duration::from_millis(12));
    /// ```
    pub fn new(config: AdmissionConfig) -> Result<Self, GateError> {
        Self::builder(config).build()
    }

    /// 使用指定的事件接收器创建网关
    pub fn with_event_sink(
        config: AdmissionConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, GateError> {
        Self::builder(config).event_sink(sink).build()
    }

    /// 创建挂载Prometheus指标的网关
    #[cfg(feature = "monitoring")]
    pub fn with_metrics(config: AdmissionConfig, metrics: Arc<Metrics>) -> Result<Self, GateError> {
        Self::builder(config).metrics(metrics).build()
    }

    pub fn builder(config: AdmissionConfig) -> AdmissionGateBuilder {
        AdmissionGateBuilder {
            config,
            sink: None,
            #[cfg(feature = "monitoring")]
            metrics: None,
        }
    }

    /// 准入判断
    pub fn before(&self, meta: &RequestMeta) -> Decision {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        let decision = self.evaluate(meta);

        match &decision {
            Decision::Allowed { .. } => {
                self.counters.allowed.fetch_add(1, Ordering::Relaxed);
                trace!("请求放行: {} {} ip={}", meta.method, meta.path, meta.client_ip);
            }
            Decision::Denied { code, .. } => {
                let counter = match code {
                    DenyCode::IpBlacklisted => &self.counters.denied_blacklisted,
                    DenyCode::RateLimitExceeded => &self.counters.denied_rate_limited,
                    DenyCode::CircuitBreakerOpen => &self.counters.denied_circuit_open,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "请求被拒绝: {} {} ip={}, code={}",
                    meta.method, meta.path, meta.client_ip, code
                );
                self.sink.emit(AdmissionEvent::Denied {
                    timestamp: Utc::now(),
                    code: *code,
                    method: meta.method.clone(),
                    path: meta.path.clone(),
                    identity: meta.client_ip.clone(),
                });
            }
        }

        #[cfg(feature = "monitoring")]
        if let Some(metrics) = &self.metrics {
            metrics.record_decision(&decision);
        }

        decision
    }

    fn evaluate(&self, meta: &RequestMeta) -> Decision {
        let ip = meta.client_ip.as_str();

        if self.blacklist.is_blacklisted(ip) {
            return Decision::Denied {
                code: DenyCode::IpBlacklisted,
                retry_after: None,
                rate: None,
            };
        }

        // 白名单跳过限流和熔断判断，结果仍由 after 计入熔断器
        if self.blacklist.is_whitelisted(ip) {
            self.counters.whitelisted.fetch_add(1, Ordering::Relaxed);
            return Decision::Allowed { rate: None };
        }

        let rate = if self.config.rate_limit.enable_rate_limit {
            let rate = self.check_rate(meta);
            if !rate.allowed {
                return Decision::Denied {
                    code: DenyCode::RateLimitExceeded,
                    retry_after: Some(rate.retry_after_secs),
                    rate: Some(rate),
                };
            }
            Some(rate)
        } else {
            None
        };

        if !self.breaker.allow_request(&meta.endpoint_key()) {
            return Decision::Denied {
                code: DenyCode::CircuitBreakerOpen,
                retry_after: None,
                rate,
            };
        }

        Decision::Allowed { rate }
    }

    fn check_rate(&self, meta: &RequestMeta) -> RateDecision {
        let settings = &self.config.rate_limit;
        let key = RateLimitKey::derive(
            &meta.client_ip,
            meta.user_id.as_deref(),
            settings.enable_user_rate_limit,
        );
        let limit = key.effective_limit(settings.default_limit, settings.user_limit_multiplier);
        let key = key.to_string();

        let rate = self.limiter.allow(&key, limit, settings.default_window);
        if !rate.allowed {
            let count = self.limiter.current_count(&key);
            self.blacklist.promote_if_over_threshold(&meta.client_ip, count);
        }
        rate
    }

    /// 记录请求结果（状态码 >= 500 视为失败）
    pub fn after(&self, meta: &RequestMeta, status: u16, duration: Duration) {
        self.after_outcome(meta, Outcome::Status(status), duration);
    }

    /// 记录请求结果
    ///
    /// 只能对 `before` 放行的请求调用，且每个请求只调用一次。
    pub fn after_outcome(&self, meta: &RequestMeta, outcome: Outcome, duration: Duration) {
        self.counters.results_recorded.fetch_add(1, Ordering::Relaxed);
        self.breaker.record_outcome(&meta.endpoint_key(), outcome, duration);

        #[cfg(feature = "monitoring")]
        if let Some(metrics) = &self.metrics {
            metrics.observe_downstream(duration);
        }
    }

    // ------------------------------------------------------------------
    // 管理接口
    // ------------------------------------------------------------------

    /// 所有熔断器的统计信息
    pub fn circuit_breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        self.breaker.stats()
    }

    /// 重置单个熔断器
    #[instrument(skip(self))]
    pub fn reset_circuit_breaker(&self, key: &str) -> bool {
        self.breaker.reset(key)
    }

    /// 重置所有熔断器
    #[instrument(skip(self))]
    pub fn reset_all_circuit_breakers(&self) -> usize {
        self.breaker.reset_all()
    }

    /// 手动加入黑名单
    #[instrument(skip(self))]
    pub fn add_to_blacklist(
        &self,
        ip: &str,
        reason: &str,
        duration: Duration,
    ) -> Result<BlacklistEntry, GateError> {
        self.blacklist.add(ip, reason, duration)
    }

    /// 移出黑名单
    #[instrument(skip(self))]
    pub fn remove_from_blacklist(&self, ip: &str) -> bool {
        self.blacklist.remove(ip)
    }

    /// 当前有效的黑名单条目
    pub fn blacklist(&self) -> Vec<BlacklistEntry> {
        self.blacklist.list()
    }

    /// 限流统计
    pub fn rate_limit_stats(&self) -> RateLimitStats {
        self.limiter.stats()
    }

    /// 清除某个限流键（`ip:<addr>` / `user:<id>`）的窗口
    #[instrument(skip(self))]
    pub fn reset_rate_limit(&self, key: &str) -> bool {
        self.limiter.reset(key)
    }

    /// 网关统计信息
    pub fn stats(&self) -> GateStats {
        let c = &self.counters;
        GateStats {
            total_requests: c.total_requests.load(Ordering::Relaxed),
            allowed: c.allowed.load(Ordering::Relaxed),
            denied_blacklisted: c.denied_blacklisted.load(Ordering::Relaxed),
            denied_rate_limited: c.denied_rate_limited.load(Ordering::Relaxed),
            denied_circuit_open: c.denied_circuit_open.load(Ordering::Relaxed),
            whitelisted: c.whitelisted.load(Ordering::Relaxed),
            results_recorded: c.results_recorded.load(Ordering::Relaxed),
            tracked_breakers: self.breaker.len(),
            tracked_rate_windows: self.limiter.len(),
            blacklist_entries: self.blacklist.len(),
        }
    }

    /// 立即执行一轮清理，返回移除的条目数
    pub fn sweep_now(&self) -> usize {
        let maintenance = &self.config.maintenance;
        let mut removed = self.limiter.sweep(maintenance.rate_window_retention);
        removed += self.blacklist.cleanup_expired();
        if let Some(retention) = maintenance.breaker_idle_retention {
            removed += self.breaker.sweep(retention);
        }
        removed
    }

    /// 启动后台清理任务（需要在tokio运行时内调用）
    pub fn start_maintenance(&self) -> MaintenanceHandle {
        let maintenance = &self.config.maintenance;
        let interval = maintenance.sweep_interval;
        let mut sweepers = Vec::with_capacity(3);

        let limiter = self.limiter.clone();
        let retention = maintenance.rate_window_retention;
        sweepers.push(spawn_sweeper("rate_windows", interval, move || {
            limiter.sweep(retention)
        }));

        let blacklist = self.blacklist.clone();
        sweepers.push(spawn_sweeper("blacklist", interval, move || {
            blacklist.cleanup_expired()
        }));

        if let Some(retention) = maintenance.breaker_idle_retention {
            let breaker = self.breaker.clone();
            sweepers.push(spawn_sweeper("circuit_breakers", interval, move || {
                breaker.sweep(retention)
            }));
        }

        info!(
            "后台清理任务已启动: count={}, interval={:?}",
            sweepers.len(),
            interval
        );
        MaintenanceHandle { sweepers }
    }

    /// 获取配置
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }
}
