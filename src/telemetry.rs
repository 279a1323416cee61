//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 监控和日志模块
//!
//! # 功能
//!
//! - `monitoring` 特性：Prometheus指标（请求计数、拒绝原因、熔断状态变更、下游耗时）
//! - `telemetry` 特性：基于 `tracing-subscriber` 的日志初始化
//!
//! # 示例
//!
//! ```rust,ignore
//! use gatewarden::telemetry::{init_logging, Metrics};
//! use gatewarden::{AdmissionConfig, AdmissionGate};
//! use std::sync::Arc;
//!
//! init_logging("info");
//! let metrics = Arc::new(Metrics::new().unwrap());
//! let gate = AdmissionGate::with_metrics(AdmissionConfig::default(), metrics.clone()).unwrap();
//! println!("{}", metrics.gather());
//! ```

#[cfg(feature = "monitoring")]
pub use self::metrics::Metrics;

#[cfg(feature = "monitoring")]
mod metrics {
    use crate::blacklist::BlacklistSource;
    use crate::error::Decision;
    use crate::events::{AdmissionEvent, EventSink};
    use prometheus::{
        Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
    };
    use std::time::Duration;
    use tracing::error;

    /// 下游耗时分桶（秒）
    const DURATION_BUCKETS: &[f64] = &[
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    /// 准入监控指标
    #[derive(Clone)]
    pub struct Metrics {
        registry: Registry,
        /// 总请求数
        pub requests_total: IntCounter,
        /// 允许的请求数
        pub requests_allowed: IntCounter,
        /// 按拒绝代码统计的拒绝数
        pub requests_denied: IntCounterVec,
        /// 按目标状态统计的熔断状态变更数
        pub breaker_transitions: IntCounterVec,
        /// 自动加入黑名单次数
        pub blacklist_promotions: IntCounter,
        /// 下游处理耗时分布
        pub downstream_duration: Histogram,
    }

    impl Metrics {
        /// 创建指标并注册到独立的 `Registry`
        pub fn new() -> Result<Self, prometheus::Error> {
            let registry = Registry::new();

            let requests_total = IntCounter::with_opts(Opts::new(
                "gatewarden_requests_total",
                "Total number of admission checks",
            ))?;
            let requests_allowed = IntCounter::with_opts(Opts::new(
                "gatewarden_requests_allowed_total",
                "Number of requests admitted",
            ))?;
            let requests_denied = IntCounterVec::new(
                Opts::new(
                    "gatewarden_requests_denied_total",
                    "Number of requests denied, by deny code",
                ),
                &["code"],
            )?;
            let breaker_transitions = IntCounterVec::new(
                Opts::new(
                    "gatewarden_breaker_transitions_total",
                    "Circuit breaker state transitions, by target state",
                ),
                &["to"],
            )?;
            let blacklist_promotions = IntCounter::with_opts(Opts::new(
                "gatewarden_blacklist_promotions_total",
                "Identities automatically promoted to the blacklist",
            ))?;
            let downstream_duration = Histogram::with_opts(
                HistogramOpts::new(
                    "gatewarden_downstream_duration_seconds",
                    "Downstream handler latency reported to the gate",
                )
                .buckets(DURATION_BUCKETS.to_vec()),
            )?;

            registry.register(Box::new(requests_total.clone()))?;
            registry.register(Box::new(requests_allowed.clone()))?;
            registry.register(Box::new(requests_denied.clone()))?;
            registry.register(Box::new(breaker_transitions.clone()))?;
            registry.register(Box::new(blacklist_promotions.clone()))?;
            registry.register(Box::new(downstream_duration.clone()))?;

            Ok(Self {
                registry,
                requests_total,
                requests_allowed,
                requests_denied,
                breaker_transitions,
                blacklist_promotions,
                downstream_duration,
            })
        }

        /// 记录一次准入决策
        pub fn record_decision(&self, decision: &Decision) {
            self.requests_total.inc();
            match decision.deny_code() {
                None => self.requests_allowed.inc(),
                Some(code) => self.requests_denied.with_label_values(&[code.as_str()]).inc(),
            }
        }

        /// 记录下游耗时
        pub fn observe_downstream(&self, duration: Duration) {
            self.downstream_duration.observe(duration.as_secs_f64());
        }

        pub fn registry(&self) -> &Registry {
            &self.registry
        }

        /// 收集所有指标并返回Prometheus格式的文本
        pub fn gather(&self) -> String {
            let encoder = TextEncoder::new();
            let metric_families = self.registry.gather();
            let mut buffer = Vec::new();
            if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
                error!("Failed to encode metrics: {}", e);
                return String::new();
            }
            String::from_utf8(buffer).unwrap_or_default()
        }
    }

    impl EventSink for Metrics {
        fn emit(&self, event: AdmissionEvent) {
            match event {
                AdmissionEvent::BreakerTransition { to, .. } => self
                    .breaker_transitions
                    .with_label_values(&[to.to_string().as_str()])
                    .inc(),
                AdmissionEvent::Blacklisted {
                    source: BlacklistSource::Auto,
                    ..
                } => self.blacklist_promotions.inc(),
                _ => {}
            }
        }
    }

}

/// 安装全局日志订阅器
///
/// 优先使用 `RUST_LOG`，未设置时使用 `default_directive`。已经安装过时返回 `false`。
#[cfg(feature = "telemetry")]
pub fn init_logging(default_directive: &str) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Logging initialized (default directive: {})", default_directive);
    }
    installed
}
