//! 配置文件加载集成测试
//!
//! 从磁盘加载配置后构建网关，验证配置真正作用在准入决策上

use crate::common::{create_test_gate, request};
use gatewarden::{AdmissionConfig, AdmissionGate, DenyCode, GateError};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_yaml_file_drives_gate() {
    let file = write_config(
        ".yaml",
        r#"
rate_limit:
  default_limit: 3
  default_window: "1m"
  blacklist_threshold: 5
  blacklist_duration: "10m"
  enable_whitelist: true
  whitelist_ips:
    - "192.168.0.0/16"
circuit_breaker:
  request_volume_threshold: 2
  max_failures: 2
  interval: "30s"
"#,
    );

    let config = AdmissionConfig::from_file(file.path()).unwrap();
    let (gate, _sink) = create_test_gate(config);

    let client = request("GET", "/api/posts", "203.0.113.9");
    let decisions: Vec<_> = (0..6).map(|_| gate.before(&client).deny_code()).collect();
    assert_eq!(&decisions[..3], &[None, None, None]);
    assert_eq!(decisions[3], Some(DenyCode::RateLimitExceeded));
    // 第5次请求时窗口计数达到阈值5
    assert_eq!(decisions[5], Some(DenyCode::IpBlacklisted));

    let lan = request("GET", "/api/posts", "192.168.4.4");
    assert!((0..10).all(|_| gate.before(&lan).is_allowed()));
}

#[test]
fn test_toml_file_drives_gate() {
    let file = write_config(
        ".toml",
        r#"
[rate_limit]
default_limit = 2
default_window = "60s"
enable_user_rate_limit = true
user_limit_multiplier = 1.5

[circuit_breaker]
request_volume_threshold = 1
max_failures = 1
"#,
    );

    let config = AdmissionConfig::from_file(file.path()).unwrap();
    let gate = AdmissionGate::new(config).unwrap();

    // 用户上限 floor(2 * 1.5) = 3
    let user = request("GET", "/me", "198.51.100.3").with_user("carol");
    let allowed = (0..5).filter(|_| gate.before(&user).is_allowed()).count();
    assert_eq!(allowed, 3);

    let anonymous = request("GET", "/me", "198.51.100.3");
    let allowed = (0..5).filter(|_| gate.before(&anonymous).is_allowed()).count();
    assert_eq!(allowed, 2);

    let meta = request("GET", "/report", "198.51.100.4");
    assert!(gate.before(&meta).is_allowed());
    gate.after(&meta, 502, Duration::from_millis(5));
    assert_eq!(
        gate.before(&meta).deny_code(),
        Some(DenyCode::CircuitBreakerOpen)
    );
}

#[test]
fn test_invalid_file_contents() {
    let file = write_config(".yaml", "rate_limit:\n  default_limit: 0\n");
    assert!(matches!(
        AdmissionConfig::from_file(file.path()),
        Err(GateError::ConfigError(_))
    ));

    let file = write_config(".yaml", "rate_limit: [not, a, map]\n");
    assert!(AdmissionConfig::from_file(file.path()).is_err());

    let file = write_config(".toml", "[rate_limit]\ndefault_window = \"soon\"\n");
    assert!(AdmissionConfig::from_file(file.path()).is_err());

    assert!(matches!(
        AdmissionConfig::from_file("/nonexistent/gatewarden.yaml"),
        Err(GateError::IoError(_))
    ));
}

#[test]
fn test_config_round_trips_through_yaml() {
    let mut config = AdmissionConfig::default();
    config.rate_limit = config.rate_limit.whitelist(["10.0.0.0/8", "health-checker"]);
    config.maintenance.breaker_idle_retention = Some(Duration::from_secs(1800));

    let yaml = serde_yaml::to_string(&config).unwrap();
    let file = write_config(".yml", &yaml);
    let loaded = AdmissionConfig::from_file(file.path()).unwrap();
    assert_eq!(loaded, config);
}
