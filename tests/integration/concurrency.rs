//! 并发一致性集成测试

use crate::common::{create_test_gate, request, test_config};
use gatewarden::{CircuitBreaker, CircuitBreakerConfig, CircuitState, DenyCode, RateLimiter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_concurrent_same_ip_admits_exactly_limit() {
    let (gate, _sink) = create_test_gate(test_config(250));
    let allowed = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let gate = gate.clone();
            let allowed = allowed.clone();
            thread::spawn(move || {
                let meta = request("GET", "/api/feed", "198.51.100.20");
                for _ in 0..100 {
                    if gate.before(&meta).is_allowed() {
                        allowed.fetch_add(1, Ordering::Relaxed);
                        gate.after(&meta, 200, Duration::from_micros(10));
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(allowed.load(Ordering::Relaxed), 250);
    let stats = gate.stats();
    assert_eq!(stats.total_requests, 1600);
    assert_eq!(stats.allowed, 250);
    assert_eq!(stats.allowed + stats.denied(), stats.total_requests);
    assert_eq!(stats.results_recorded, 250);
}

#[test]
fn test_concurrent_keys_are_independent() {
    let limiter = Arc::new(RateLimiter::new());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let limiter = limiter.clone();
            thread::spawn(move || {
                let key = format!("ip:10.0.0.{}", i);
                (0..50)
                    .filter(|_| limiter.allow(&key, 20, Duration::from_secs(60)).allowed)
                    .count()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 20);
    }
    let stats = limiter.stats();
    assert_eq!(stats.tracked_keys, 8);
    assert_eq!(stats.total_allowed, 160);
    assert_eq!(stats.total_denied, 240);
    assert!(stats.windows.iter().all(|w| w.count == 50));
}

#[test]
fn test_concurrent_failures_open_breaker_once() {
    let mut config = test_config(1_000_000);
    config.circuit_breaker = config.circuit_breaker.interval(Duration::from_secs(60));
    let (gate, sink) = create_test_gate(config);
    let opened = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let gate = gate.clone();
            let opened = opened.clone();
            thread::spawn(move || {
                let meta = request("POST", "/api/orders", &format!("172.16.0.{}", i));
                for _ in 0..20 {
                    match gate.before(&meta).deny_code() {
                        None => gate.after(&meta, 500, Duration::from_millis(1)),
                        Some(DenyCode::CircuitBreakerOpen) => {
                            opened.fetch_add(1, Ordering::Relaxed);
                        }
                        Some(code) => panic!("unexpected denial: {}", code),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(opened.load(Ordering::Relaxed) > 0);
    let stats = gate.circuit_breaker_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].key, "POST /api/orders");
    assert_eq!(stats[0].state, CircuitState::Open);
    // 迟到的结果在Open状态下被忽略，不会重复打开
    assert_eq!(sink.count("BreakerTransition"), 1);
}

#[test]
fn test_concurrent_breakers_across_endpoints() {
    let breaker = Arc::new(CircuitBreaker::new(
        CircuitBreakerConfig::default()
            .request_volume_threshold(5)
            .failure_threshold(0.5),
    ));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let breaker = breaker.clone();
            thread::spawn(move || {
                let key = format!("GET /endpoint/{}", i);
                for _ in 0..10 {
                    if breaker.allow_request(&key) {
                        // 偶数端点全部成功，奇数端点全部失败
                        breaker.record_result(&key, i % 2 == 0, Duration::from_millis(1));
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(breaker.len(), 4);
    assert_eq!(breaker.state("GET /endpoint/0"), CircuitState::Closed);
    assert_eq!(breaker.state("GET /endpoint/1"), CircuitState::Open);
    assert_eq!(breaker.state("GET /endpoint/2"), CircuitState::Closed);
    assert_eq!(breaker.state("GET /endpoint/3"), CircuitState::Open);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tasks_share_gate() {
    let (gate, _sink) = create_test_gate(test_config(40));

    let mut handles = Vec::new();
    for i in 0..10 {
        let gate = gate.clone();
        handles.push(tokio::spawn(async move {
            let meta = request("GET", "/api/items", &format!("203.0.113.{}", i % 2));
            let mut allowed = 0u64;
            for _ in 0..10 {
                if gate.before(&meta).is_allowed() {
                    allowed += 1;
                }
                tokio::task::yield_now().await;
            }
            allowed
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }
    // 两个IP各50个请求，每个IP上限40
    assert_eq!(total, 80);
}
