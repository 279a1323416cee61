//! 测试通用工具模块
//!
//! 提供测试中常用的工具函数和辅助结构。

#![allow(dead_code)]

use gatewarden::{
    AdmissionConfig, AdmissionEvent, AdmissionGate, CircuitBreakerConfig, EventSink,
    RateLimitConfig, RequestMeta,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// 记录所有事件的接收器
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AdmissionEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<AdmissionEvent> {
        self.events.lock().clone()
    }

    /// 指定类型的事件数量
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: AdmissionEvent) {
        self.events.lock().push(event);
    }
}

/// 创建测试配置：限流 `limit`/分钟，熔断器在一次失败后打开
pub fn test_config(limit: u64) -> AdmissionConfig {
    AdmissionConfig {
        rate_limit: RateLimitConfig::default().limit(limit, Duration::from_secs(60)),
        circuit_breaker: CircuitBreakerConfig::default()
            .request_volume_threshold(1)
            .max_failures(1)
            .interval(Duration::from_millis(100)),
        ..AdmissionConfig::default()
    }
}

/// 创建带记录接收器的网关
pub fn create_test_gate(config: AdmissionConfig) -> (Arc<AdmissionGate>, Arc<RecordingSink>) {
    let sink = RecordingSink::new();
    let gate = AdmissionGate::with_event_sink(config, sink.clone()).expect("valid test config");
    (Arc::new(gate), sink)
}

/// 创建测试请求
pub fn request(method: &str, path: &str, ip: &str) -> RequestMeta {
    RequestMeta::new(method, path, ip)
}
