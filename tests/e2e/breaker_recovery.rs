//! 端到端测试：熔断与恢复
//!
//! 测试场景：
//! 1. 下游开始返回5xx，熔断器打开
//! 2. 打开期间请求直接返回503
//! 3. 冷却后进入半开，只放行有限的试探请求
//! 4. 试探成功率达标则关闭，否则重新打开

use crate::common::{create_test_gate, request, test_config, RecordingSink};
use gatewarden::{
    AdmissionConfig, AdmissionEvent, AdmissionGate, CircuitBreakerConfig, CircuitState, DenyCode,
    Outcome,
};
use std::sync::Arc;
use std::time::Duration;

fn recovery_gate() -> (Arc<AdmissionGate>, Arc<RecordingSink>) {
    let mut config: AdmissionConfig = test_config(10_000);
    config.circuit_breaker = CircuitBreakerConfig::default()
        .request_volume_threshold(4)
        .failure_threshold(0.5)
        .max_requests(3)
        .success_threshold(0.6)
        .interval(Duration::from_millis(100));
    create_test_gate(config)
}

fn transitions(sink: &RecordingSink) -> Vec<(CircuitState, CircuitState)> {
    sink.events()
        .into_iter()
        .filter_map(|e| match e {
            AdmissionEvent::BreakerTransition { from, to, .. } => Some((from, to)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_open_half_open_closed_cycle() {
    let (gate, sink) = recovery_gate();
    let meta = request("GET", "/api/search", "198.51.100.1");

    // 阶段1：成功与失败交替，第4个结果达到请求量阈值且失败率50%
    for status in [200, 500, 200, 503] {
        assert!(gate.before(&meta).is_allowed());
        gate.after(&meta, status, Duration::from_millis(20));
    }

    // 阶段2：打开
    let denied = gate.before(&meta);
    assert_eq!(denied.deny_code(), Some(DenyCode::CircuitBreakerOpen));
    let rejection = denied.rejection().unwrap();
    assert_eq!(rejection.status, 503);
    assert_eq!(rejection.body["code"], "CIRCUIT_BREAKER_OPEN");

    // 阶段3：冷却后只放行3个试探请求
    tokio::time::sleep(Duration::from_millis(150)).await;
    let trials: Vec<bool> = (0..5).map(|_| gate.before(&meta).is_allowed()).collect();
    assert_eq!(trials, vec![true, true, true, false, false]);

    // 阶段4：试探请求全部成功
    for _ in 0..3 {
        gate.after(&meta, 200, Duration::from_millis(5));
    }
    assert!(gate.before(&meta).is_allowed());

    assert_eq!(
        transitions(&sink),
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
    let stats = gate.circuit_breaker_stats();
    assert_eq!(stats[0].state, CircuitState::Closed);
}

#[tokio::test]
async fn test_failed_half_open_trial_reopens() {
    let (gate, sink) = recovery_gate();
    let meta = request("PUT", "/api/profile", "198.51.100.2");

    for _ in 0..4 {
        assert!(gate.before(&meta).is_allowed());
        gate.after_outcome(&meta, Outcome::TransportError, Duration::from_millis(1));
    }
    assert!(!gate.before(&meta).is_allowed());

    tokio::time::sleep(Duration::from_millis(150)).await;
    for _ in 0..3 {
        assert!(gate.before(&meta).is_allowed());
    }
    // 成功率 1/3 低于0.6
    gate.after(&meta, 200, Duration::from_millis(1));
    gate.after_outcome(&meta, Outcome::Timeout, Duration::from_secs(30));
    gate.after(&meta, 504, Duration::from_millis(1));

    assert_eq!(
        gate.before(&meta).deny_code(),
        Some(DenyCode::CircuitBreakerOpen)
    );
    assert_eq!(
        transitions(&sink).last(),
        Some(&(CircuitState::HalfOpen, CircuitState::Open))
    );
}

#[test]
fn test_client_errors_and_low_volume_do_not_trip() {
    let (gate, sink) = recovery_gate();
    let meta = request("GET", "/api/items/unknown", "198.51.100.3");

    for _ in 0..20 {
        assert!(gate.before(&meta).is_allowed());
        gate.after(&meta, 404, Duration::from_millis(1));
    }

    // 请求量未达阈值时，即使全部失败也不打开
    let other = request("GET", "/api/rare", "198.51.100.3");
    for _ in 0..3 {
        assert!(gate.before(&other).is_allowed());
        gate.after(&other, 500, Duration::from_millis(1));
    }
    assert!(gate.before(&other).is_allowed());
    assert!(transitions(&sink).is_empty());
}

#[test]
fn test_admin_reset_closes_breaker() {
    let (gate, sink) = recovery_gate();
    let meta = request("DELETE", "/api/cache", "198.51.100.4");

    for _ in 0..4 {
        assert!(gate.before(&meta).is_allowed());
        gate.after(&meta, 500, Duration::from_millis(1));
    }
    assert!(!gate.before(&meta).is_allowed());

    assert!(gate.reset_circuit_breaker("DELETE /api/cache"));
    assert!(!gate.reset_circuit_breaker("DELETE /api/unknown"));
    assert!(gate.before(&meta).is_allowed());
    assert_eq!(
        transitions(&sink).last(),
        Some(&(CircuitState::Open, CircuitState::Closed))
    );
}
