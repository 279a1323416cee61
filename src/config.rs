//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 配置模块
//!
//! 定义准入控制的配置结构，支持YAML/TOML加载与校验。
//! 所有字段都有默认值，空文档即得到默认配置。

use crate::blacklist::IpRange;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::constants::{
    DEFAULT_BLACKLIST_DURATION_SECS, DEFAULT_BLACKLIST_THRESHOLD, DEFAULT_RATE_LIMIT,
    DEFAULT_RATE_WINDOW_RETENTION_SECS, DEFAULT_RATE_WINDOW_SECS, DEFAULT_SWEEP_INTERVAL_SECS,
    DEFAULT_USER_LIMIT_MULTIPLIER,
};
use crate::error::GateError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 准入控制配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// 限流、黑名单与白名单
    pub rate_limit: RateLimitConfig,
    /// 熔断器
    pub circuit_breaker: CircuitBreakerConfig,
    /// 后台清理
    pub maintenance: MaintenanceConfig,
}

impl AdmissionConfig {
    /// 从YAML字符串加载并校验
    pub fn from_yaml_str(yaml: &str) -> Result<Self, GateError> {
        let config: AdmissionConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// 从TOML字符串加载并校验
    pub fn from_toml_str(toml_str: &str) -> Result<Self, GateError> {
        let config: AdmissionConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载，格式由扩展名决定（.yaml / .yml / .toml）
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GateError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            _ => Err(GateError::ConfigError(format!(
                "不支持的配置文件格式: {}",
                path.display()
            ))),
        }
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), GateError> {
        self.rate_limit
            .validate()
            .map_err(|e| GateError::ConfigError(format!("rate_limit: {}", e)))?;
        self.circuit_breaker
            .validate()
            .map_err(|e| GateError::ConfigError(format!("circuit_breaker: {}", e)))?;
        self.maintenance
            .validate()
            .map_err(|e| GateError::ConfigError(format!("maintenance: {}", e)))?;
        Ok(())
    }
}

/// 限流与黑白名单配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// 是否启用限流
    pub enable_rate_limit: bool,
    /// 每个窗口的基础请求上限
    pub default_limit: u64,
    /// 固定窗口长度
    #[serde(with = "serde_duration")]
    pub default_window: Duration,
    /// 是否启用IP黑名单
    pub enable_ip_blacklist: bool,
    /// 晋升黑名单的窗口计数阈值
    pub blacklist_threshold: u64,
    /// 自动黑名单时长
    #[serde(with = "serde_duration")]
    pub blacklist_duration: Duration,
    /// 是否启用白名单
    pub enable_whitelist: bool,
    /// 白名单（IP、CIDR、IPv4范围或其他标识）
    pub whitelist_ips: Vec<String>,
    /// 是否按用户限流
    pub enable_user_rate_limit: bool,
    /// 用户限流倍数
    pub user_limit_multiplier: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enable_rate_limit: true,
            default_limit: DEFAULT_RATE_LIMIT,
            default_window: Duration::from_secs(DEFAULT_RATE_WINDOW_SECS),
            enable_ip_blacklist: true,
            blacklist_threshold: DEFAULT_BLACKLIST_THRESHOLD,
            blacklist_duration: Duration::from_secs(DEFAULT_BLACKLIST_DURATION_SECS),
            enable_whitelist: false,
            whitelist_ips: Vec::new(),
            enable_user_rate_limit: true,
            user_limit_multiplier: DEFAULT_USER_LIMIT_MULTIPLIER,
        }
    }
}

impl RateLimitConfig {
    /// 设置基础上限与窗口
    pub fn limit(mut self, limit: u64, window: Duration) -> Self {
        self.default_limit = limit;
        self.default_window = window;
        self
    }

    /// 设置黑名单阈值与时长
    pub fn blacklist(mut self, threshold: u64, duration: Duration) -> Self {
        self.blacklist_threshold = threshold;
        self.blacklist_duration = duration;
        self
    }

    /// 启用白名单
    pub fn whitelist<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enable_whitelist = true;
        self.whitelist_ips = entries.into_iter().map(Into::into).collect();
        self
    }

    /// 设置用户限流倍数
    pub fn user_multiplier(mut self, multiplier: f64) -> Self {
        self.enable_user_rate_limit = true;
        self.user_limit_multiplier = multiplier;
        self
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), String> {
        if self.default_limit == 0 {
            return Err("default_limit 必须大于0".to_string());
        }
        if self.default_window.is_zero() {
            return Err("default_window 必须大于0".to_string());
        }
        if !self.user_limit_multiplier.is_finite() || self.user_limit_multiplier < 1.0 {
            return Err(format!(
                "user_limit_multiplier 必须是不小于1的有限数: {}",
                self.user_limit_multiplier
            ));
        }
        if self.blacklist_threshold == 0 {
            return Err("blacklist_threshold 必须大于0".to_string());
        }
        if self.blacklist_duration.is_zero() {
            return Err("blacklist_duration 必须大于0".to_string());
        }
        for entry in &self.whitelist_ips {
            if entry.trim().is_empty() {
                return Err("白名单条目不能为空".to_string());
            }
            if looks_like_ip_pattern(entry) {
                entry
                    .parse::<IpRange>()
                    .map_err(|e| format!("白名单条目无效 {}: {}", entry, e))?;
            }
        }
        Ok(())
    }
}

/// 看起来像IP/CIDR/范围的条目按IP规则解析，其余按普通标识精确匹配
pub(crate) fn looks_like_ip_pattern(entry: &str) -> bool {
    let entry = entry.trim();
    entry.contains('/')
        || entry.contains(':')
        || entry
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.' || c == '-')
}

/// 后台清理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// 清理周期
    #[serde(with = "serde_duration")]
    pub sweep_interval: Duration,
    /// 限流窗口闲置多久后被清理
    #[serde(with = "serde_duration")]
    pub rate_window_retention: Duration,
    /// 熔断器闲置多久后被清理（`None` 表示从不清理）
    #[serde(with = "serde_duration::option")]
    pub breaker_idle_retention: Option<Duration>,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            rate_window_retention: Duration::from_secs(DEFAULT_RATE_WINDOW_RETENTION_SECS),
            breaker_idle_retention: None,
        }
    }
}

impl MaintenanceConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<(), String> {
        if self.sweep_interval.is_zero() {
            return Err("sweep_interval 必须大于0".to_string());
        }
        if self.rate_window_retention.is_zero() {
            return Err("rate_window_retention 必须大于0".to_string());
        }
        if matches!(self.breaker_idle_retention, Some(d) if d.is_zero()) {
            return Err("breaker_idle_retention 必须大于0".to_string());
        }
        Ok(())
    }
}

/// 解析时长字符串
///
/// 支持的格式：
/// - `500ms` - 500毫秒
/// - `10s` - 10秒
/// - `5m` - 5分钟
/// - `2h` - 2小时
/// - `1d` - 1天
/// - `30` - 无单位按秒处理
pub fn parse_duration(value: &str) -> Result<Duration, GateError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(GateError::ConfigError("时长不能为空".to_string()));
    }

    let (num_part, unit_part) =
        value.split_at(value.find(|c: char| c.is_alphabetic()).unwrap_or(value.len()));

    let num_str = num_part.trim();
    let unit = unit_part.trim().to_lowercase();

    if num_str.is_empty() {
        return Err(GateError::ConfigError(
            "时长格式错误：缺少数字部分".to_string(),
        ));
    }

    let num: u64 = num_str
        .parse()
        .map_err(|_| GateError::ConfigError(format!("无效的数字格式: {}", num_str)))?;

    let duration = match unit.as_str() {
        "ms" | "millis" | "milliseconds" => Duration::from_millis(num),
        "" | "s" | "sec" | "second" | "seconds" => Duration::from_secs(num),
        "m" | "min" | "minute" | "minutes" => Duration::from_secs(num.saturating_mul(60)),
        "h" | "hr" | "hour" | "hours" => Duration::from_secs(num.saturating_mul(3600)),
        "d" | "day" | "days" => Duration::from_secs(num.saturating_mul(86400)),
        _ => {
            return Err(GateError::ConfigError(format!(
                "不支持的单位: {}。支持的单位: ms, s, m, h, d",
                unit
            )));
        }
    };

    Ok(duration)
}

/// 将时长格式化为最紧凑的单位
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 != 0 {
        return format!("{}ms", millis);
    }
    let secs = duration.as_secs();
    if secs == 0 {
        "0s".to_string()
    } else if secs % 86400 == 0 {
        format!("{}d", secs / 86400)
    } else if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// 时长的serde适配：接受整数秒或带单位字符串，序列化为字符串
pub mod serde_duration {
    use super::{format_duration, parse_duration};
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(DurationVisitor)
    }

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a number of seconds or a string such as \"500ms\", \"60s\", \"1h\"")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
            u64::try_from(v)
                .map(Duration::from_secs)
                .map_err(|_| E::custom(format!("时长不能为负数: {}", v)))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
            parse_duration(v).map_err(E::custom)
        }
    }

    /// `Option<Duration>` 版本
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            #[derive(Deserialize)]
            struct Wrapper(#[serde(deserialize_with = "super::deserialize")] Duration);

            Option::<Wrapper>::deserialize(deserializer).map(|w| w.map(|Wrapper(d)| d))
        }
    }
}
