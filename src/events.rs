//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 准入事件模块
//!
//! 熔断状态变更、黑名单增删和请求拒绝以结构化事件的形式交给 [`EventSink`]。
//! 事件在记录锁释放之后发出。

use crate::blacklist::BlacklistSource;
use crate::error::{CircuitState, DenyCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, Level};

/// 审计事件的日志目标
pub const AUDIT_TARGET: &str = "gatewarden::audit";

/// 准入事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum AdmissionEvent {
    /// 熔断器状态变更
    BreakerTransition {
        timestamp: DateTime<Utc>,
        key: String,
        from: CircuitState,
        to: CircuitState,
    },
    /// 加入黑名单
    Blacklisted {
        timestamp: DateTime<Utc>,
        identity: String,
        reason: String,
        expires_at: DateTime<Utc>,
        source: BlacklistSource,
    },
    /// 移出黑名单
    Unblacklisted {
        timestamp: DateTime<Utc>,
        identity: String,
    },
    /// 请求被拒绝
    Denied {
        timestamp: DateTime<Utc>,
        code: DenyCode,
        method: String,
        path: String,
        identity: String,
    },
}

impl AdmissionEvent {
    pub fn breaker_transition(key: &str, from: CircuitState, to: CircuitState) -> Self {
        AdmissionEvent::BreakerTransition {
            timestamp: Utc::now(),
            key: key.to_string(),
            from,
            to,
        }
    }

    pub fn unblacklisted(identity: &str) -> Self {
        AdmissionEvent::Unblacklisted {
            timestamp: Utc::now(),
            identity: identity.to_string(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AdmissionEvent::BreakerTransition { timestamp, .. } => *timestamp,
            AdmissionEvent::Blacklisted { timestamp, .. } => *timestamp,
            AdmissionEvent::Unblacklisted { timestamp, .. } => *timestamp,
            AdmissionEvent::Denied { timestamp, .. } => *timestamp,
        }
    }

    /// 事件类型名（与序列化的 `event_type` 一致）
    pub fn event_type(&self) -> &'static str {
        match self {
            AdmissionEvent::BreakerTransition { .. } => "BreakerTransition",
            AdmissionEvent::Blacklisted { .. } => "Blacklisted",
            AdmissionEvent::Unblacklisted { .. } => "Unblacklisted",
            AdmissionEvent::Denied { .. } => "Denied",
        }
    }
}

/// 事件接收器
///
/// 实现必须是非阻塞的：`emit` 在请求路径上被同步调用。
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AdmissionEvent);
}

/// 默认接收器：把事件序列化为JSON写入 `gatewarden::audit` 目标
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: AdmissionEvent) {
        // 单次拒绝是高频事件，未开启debug时不做序列化
        let level = if matches!(event, AdmissionEvent::Denied { .. }) {
            Level::DEBUG
        } else {
            Level::INFO
        };
        if !audit_enabled(level) {
            return;
        }

        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                error!("序列化准入事件失败: {}", e);
                return;
            }
        };
        let event_type = event.event_type();
        if level == Level::DEBUG {
            debug!(target: AUDIT_TARGET, event_type, "审计事件: {}", json);
        } else {
            info!(target: AUDIT_TARGET, event_type, "审计事件: {}", json);
        }
    }
}

fn audit_enabled(level: Level) -> bool {
    if level == Level::DEBUG {
        tracing::enabled!(target: AUDIT_TARGET, Level::DEBUG)
    } else {
        tracing::enabled!(target: AUDIT_TARGET, Level::INFO)
    }
}

/// 丢弃所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: AdmissionEvent) {}
}

/// 把同一事件分发给多个接收器
#[derive(Default, Clone)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// 追加接收器
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutEventSink {
    fn emit(&self, event: AdmissionEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}
