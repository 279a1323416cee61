//! 端到端测试：白名单
//!
//! 白名单身份跳过限流、自动黑名单和熔断判断，但仍受手动黑名单约束，
//! 其请求结果照常计入熔断器

use crate::common::{request, test_config};
use gatewarden::{AdmissionGate, CircuitState, DenyCode};
use std::time::Duration;

fn whitelist_gate() -> AdmissionGate {
    let mut config = test_config(2);
    config.rate_limit = config
        .rate_limit
        .blacklist(3, Duration::from_secs(600))
        .whitelist([
            "10.0.0.0/8",
            "192.168.1.10-192.168.1.20",
            "2001:db8::/32",
            "127.0.0.1",
            "internal-monitor",
        ]);
    AdmissionGate::new(config).unwrap()
}

#[test]
fn test_whitelisted_sources_are_never_rate_limited() {
    let gate = whitelist_gate();

    for ip in [
        "10.20.30.40",
        "192.168.1.15",
        "2001:db8:1::7",
        "127.0.0.1",
        "internal-monitor",
    ] {
        let meta = request("GET", "/metrics", ip);
        for _ in 0..10 {
            let decision = gate.before(&meta);
            assert!(decision.is_allowed(), "{} should bypass rate limiting", ip);
            assert!(decision.rate().is_none());
            gate.after(&meta, 200, Duration::from_millis(1));
        }
    }

    let stats = gate.stats();
    assert_eq!(stats.whitelisted, 50);
    assert_eq!(stats.denied(), 0);
    assert!(gate.blacklist().is_empty());
    assert_eq!(gate.rate_limit_stats().tracked_keys, 0);
}

#[test]
fn test_addresses_outside_ranges_are_limited() {
    let gate = whitelist_gate();

    for ip in ["11.0.0.1", "192.168.1.21", "2001:db9::1", "127.0.0.2"] {
        let meta = request("GET", "/metrics", ip);
        let codes: Vec<_> = (0..4).map(|_| gate.before(&meta).deny_code()).collect();
        assert_eq!(
            codes,
            vec![
                None,
                None,
                Some(DenyCode::RateLimitExceeded),
                Some(DenyCode::IpBlacklisted),
            ],
            "{} is not whitelisted",
            ip
        );
    }
    assert_eq!(gate.blacklist().len(), 4);
}

#[test]
fn test_manual_blacklist_overrides_whitelist() {
    let gate = whitelist_gate();
    let meta = request("GET", "/", "10.1.1.1");

    gate.add_to_blacklist("10.1.1.1", "compromised host", Duration::from_secs(60))
        .unwrap();
    assert_eq!(gate.before(&meta).deny_code(), Some(DenyCode::IpBlacklisted));

    // 同网段其他地址仍在白名单内
    assert!(gate.before(&request("GET", "/", "10.1.1.2")).is_allowed());
}

#[test]
fn test_whitelist_bypasses_open_breaker_but_still_feeds_it() {
    let gate = whitelist_gate();
    let trusted = request("POST", "/jobs", "10.9.9.9");
    let outsider = request("POST", "/jobs", "203.0.113.5");

    assert!(gate.before(&trusted).is_allowed());
    gate.after(&trusted, 500, Duration::from_millis(3));

    let stats = gate.circuit_breaker_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].key, "POST /jobs");
    assert_eq!(stats[0].state, CircuitState::Open);

    for _ in 0..5 {
        assert!(gate.before(&trusted).is_allowed());
    }
    assert_eq!(
        gate.before(&outsider).deny_code(),
        Some(DenyCode::CircuitBreakerOpen)
    );
}
