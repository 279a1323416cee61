//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Gatewarden - Per-process Admission Control
//!
//! Gates every inbound request before it reaches business logic: a per-endpoint
//! circuit breaker, a per-identity fixed-window rate limiter and a blacklist that
//! promotes persistent offenders into a time-boxed deny list.
//!
//! # API Layers
//!
//! ## Prelude (Quick Start)
//!
//! Use `use gatewarden::prelude::*;` to import all commonly used types.
//!
//! ## Core API
//!
//! - [`AdmissionGate`] - Orchestrates blacklist → whitelist → rate limiter → circuit breaker
//! - [`AdmissionConfig`] - Configuration, loadable from YAML or TOML
//! - [`Decision`] - Allow/deny result, renderable into an HTTP rejection
//! - [`GateError`] - Error types
//!
//! ## Components
//!
//! - [`CircuitBreaker`] - Closed/Open/HalfOpen state machine per endpoint key
//! - [`RateLimiter`] - Fixed-window counter per `ip:` / `user:` key
//! - [`BlacklistGuard`] - Automatic promotion, manual overrides and a static whitelist
//! - [`store::KeyedStateStore`] - Concurrent keyed state with background sweeping
//!
//! ## Extensions (feature-gated)
//!
//! - Prometheus metrics (requires `monitoring` feature)
//! - Logging subscriber bootstrap (requires `telemetry` feature)
//!
//! # Examples
//!
//! ```rust
//! use gatewarden::prelude::*;
//! use std::time::Duration;
//!
//! let gate = AdmissionGate::new(AdmissionConfig::default()).unwrap();
//! let meta = RequestMeta::new("GET", "/api/posts", "198.51.100.7").with_user("alice");
//!
//! match gate.before(&meta) {
//!     Decision::Allowed { .. } => {
//!         // 调用下游处理器，然后回写结果
//!         gate.after(&meta, 200, Duration::from_millis(8));
//!     }
//!     denied => {
//!         let rejection = denied.rejection().unwrap();
//!         assert!(rejection.status >= 400);
//!     }
//! }
//! ```
//!
//! # Features
//!
//! - **Circuit breaking**: volume-gated failure ratio / count thresholds, bounded half-open probing
//! - **Rate limiting**: fixed windows with a higher ceiling for authenticated users
//! - **Blacklisting**: automatic promotion of flooding IPs, admin add/remove, CIDR whitelist
//! - **Audit events**: structured events through a pluggable [`EventSink`]
//! - **Bounded memory**: background sweepers evict idle state

pub mod prelude;

pub mod blacklist;
pub mod circuit_breaker;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod gate;
pub mod rate_limiter;
pub mod response;
pub mod store;
#[cfg(any(feature = "telemetry", feature = "monitoring"))]
pub mod telemetry;

// 重新导出常用类型
pub use blacklist::{BlacklistEntry, BlacklistGuard, BlacklistSource, IpRange, Whitelist};
pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig, Outcome};
pub use config::{parse_duration, AdmissionConfig, MaintenanceConfig, RateLimitConfig};
pub use error::{CircuitBreakerStats, CircuitState, Decision, DenyCode, GateError};
pub use events::{AdmissionEvent, EventSink, FanoutEventSink, NoopEventSink, TracingEventSink};
pub use gate::{AdmissionGate, AdmissionGateBuilder, GateStats, MaintenanceHandle, RequestMeta};
pub use rate_limiter::{
    RateDecision, RateLimitKey, RateLimitStats, RateLimiter, RateWindow, RateWindowSnapshot,
};
pub use response::{RateLimitHeaders, Rejection};
pub use store::{spawn_sweeper, KeyedStateStore, Sweepable, SweeperHandle};
#[cfg(feature = "telemetry")]
pub use telemetry::init_logging;
#[cfg(feature = "monitoring")]
pub use telemetry::Metrics;
