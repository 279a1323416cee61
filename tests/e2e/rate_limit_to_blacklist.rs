//! 端到端测试：限流到黑名单的完整流程
//!
//! 测试场景：
//! 1. 客户端正常请求（3次/窗口）
//! 2. 持续超限，窗口计数达到阈值
//! 3. 被自动加入黑名单，返回403
//! 4. 黑名单过期后恢复正常访问
//! 5. 管理员手动封禁与解封

use crate::common::{create_test_gate, request, test_config};
use gatewarden::{AdmissionEvent, BlacklistSource, DenyCode};
use std::time::Duration;

#[tokio::test]
async fn test_flood_promotes_then_expires() {
    let mut config = test_config(3);
    config.rate_limit = config
        .rate_limit
        .limit(3, Duration::from_millis(200))
        .blacklist(6, Duration::from_millis(300));
    let (gate, sink) = create_test_gate(config);

    let attacker = request("GET", "/login", "203.0.113.66");
    let neighbour = request("GET", "/login", "203.0.113.67");

    // 阶段1：限额内
    for _ in 0..3 {
        assert!(gate.before(&attacker).is_allowed());
    }

    // 阶段2：超限，带Retry-After
    let denied = gate.before(&attacker);
    assert_eq!(denied.deny_code(), Some(DenyCode::RateLimitExceeded));
    let rejection = denied.rejection().unwrap();
    assert_eq!(rejection.status, 429);
    assert_eq!(rejection.header("Retry-After"), Some("1"));
    assert_eq!(rejection.header("X-RateLimit-Limit"), Some("3"));

    // 阶段3：第6次请求使窗口计数达到阈值
    assert_eq!(gate.before(&attacker).deny_code(), Some(DenyCode::RateLimitExceeded));
    assert_eq!(gate.before(&attacker).deny_code(), Some(DenyCode::RateLimitExceeded));
    let blocked = gate.before(&attacker);
    assert_eq!(blocked.deny_code(), Some(DenyCode::IpBlacklisted));
    let rejection = blocked.rejection().unwrap();
    assert_eq!(rejection.status, 403);
    assert_eq!(rejection.body["code"], "IP_BLACKLISTED");
    assert!(rejection.header("Retry-After").is_none());

    // 邻居不受影响
    assert!(gate.before(&neighbour).is_allowed());

    let promoted: Vec<_> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            AdmissionEvent::Blacklisted {
                identity, source, ..
            } => Some((identity, source)),
            _ => None,
        })
        .collect();
    assert_eq!(
        promoted,
        vec![("203.0.113.66".to_string(), BlacklistSource::Auto)]
    );

    // 阶段4：黑名单与窗口都过期后恢复
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(gate.before(&attacker).is_allowed());
    assert!(gate.blacklist().is_empty());

    let stats = gate.stats();
    assert_eq!(stats.denied_rate_limited, 3);
    assert_eq!(stats.denied_blacklisted, 1);
    assert_eq!(sink.count("Denied"), 4);
}

#[test]
fn test_manual_blacklist_lifecycle() {
    let (gate, sink) = create_test_gate(test_config(100));
    let meta = request("GET", "/api/posts", "198.51.100.200");
    assert!(gate.before(&meta).is_allowed());

    let entry = gate
        .add_to_blacklist("198.51.100.200", "scraping", Duration::from_secs(3600))
        .unwrap();
    assert_eq!(entry.source, BlacklistSource::Manual);
    assert_eq!(entry.reason, "scraping");
    assert_eq!(gate.before(&meta).deny_code(), Some(DenyCode::IpBlacklisted));

    // 黑名单优先于限流：被拒绝的请求不消耗限流名额
    let window = gate
        .rate_limit_stats()
        .windows
        .into_iter()
        .find(|w| w.key == "ip:198.51.100.200")
        .unwrap();
    assert_eq!(window.count, 1);

    assert!(gate.remove_from_blacklist("198.51.100.200"));
    assert!(!gate.remove_from_blacklist("198.51.100.200"));
    assert!(gate.before(&meta).is_allowed());

    assert_eq!(sink.count("Blacklisted"), 1);
    assert_eq!(sink.count("Unblacklisted"), 1);
}

#[test]
fn test_reset_rate_limit_after_unblacklist() {
    let mut config = test_config(1);
    config.rate_limit = config.rate_limit.blacklist(3, Duration::from_secs(600));
    let (gate, _sink) = create_test_gate(config);
    let meta = request("POST", "/comments", "192.0.2.33");

    let codes: Vec<_> = (0..4).map(|_| gate.before(&meta).deny_code()).collect();
    assert_eq!(
        codes,
        vec![
            None,
            Some(DenyCode::RateLimitExceeded),
            Some(DenyCode::RateLimitExceeded),
            Some(DenyCode::IpBlacklisted),
        ]
    );

    // 只解封不清窗口：下一次超限会再次晋升
    assert!(gate.remove_from_blacklist("192.0.2.33"));
    assert_eq!(gate.before(&meta).deny_code(), Some(DenyCode::RateLimitExceeded));
    assert_eq!(gate.before(&meta).deny_code(), Some(DenyCode::IpBlacklisted));

    assert!(gate.remove_from_blacklist("192.0.2.33"));
    assert!(gate.reset_rate_limit("ip:192.0.2.33"));
    assert!(gate.before(&meta).is_allowed());
}

#[test]
fn test_user_identity_limited_separately_from_ip() {
    let mut config = test_config(2);
    config.rate_limit = config
        .rate_limit
        .user_multiplier(2.0)
        .blacklist(100, Duration::from_secs(60));
    let (gate, _sink) = create_test_gate(config);

    // 同一出口IP后面的两个用户
    let alice = request("GET", "/feed", "100.64.0.1").with_user("alice");
    let bob = request("GET", "/feed", "100.64.0.1").with_user("bob");

    assert_eq!((0..6).filter(|_| gate.before(&alice).is_allowed()).count(), 4);
    assert_eq!((0..6).filter(|_| gate.before(&bob).is_allowed()).count(), 4);

    // 匿名请求使用IP键和基础上限
    let anonymous = request("GET", "/feed", "100.64.0.1");
    assert_eq!((0..6).filter(|_| gate.before(&anonymous).is_allowed()).count(), 2);
}
