//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 错误类型与决策结果定义
//!
//! 使用thiserror定义所有错误类型；准入拒绝不是错误，而是 [`Decision::Denied`]。

use crate::rate_limiter::RateDecision;
use crate::response::Rejection;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Gatewarden 错误类型
#[derive(Error, Debug)]
pub enum GateError {
    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 验证错误
    #[error("验证错误: {0}")]
    ValidationError(String),

    /// IO错误
    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// YAML解析错误
    #[error("YAML解析错误: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML解析错误
    #[error("TOML解析错误: {0}")]
    TomlError(#[from] toml::de::Error),

    /// 其他错误
    #[error("未知错误: {0}")]
    Other(String),
}

/// 拒绝原因代码
///
/// 稳定的机器可读代码，客户端据此区分限流、黑名单和熔断。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyCode {
    /// 来源IP在黑名单中
    IpBlacklisted,
    /// 超出速率限制
    RateLimitExceeded,
    /// 熔断器打开
    CircuitBreakerOpen,
}

impl DenyCode {
    /// 线上使用的代码字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyCode::IpBlacklisted => "IP_BLACKLISTED",
            DenyCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            DenyCode::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
        }
    }

    /// 对应的HTTP状态码
    pub fn http_status(&self) -> u16 {
        match self {
            DenyCode::IpBlacklisted => 403,
            DenyCode::RateLimitExceeded => 429,
            DenyCode::CircuitBreakerOpen => 503,
        }
    }

    /// 面向客户端的提示信息
    pub fn message(&self) -> &'static str {
        match self {
            DenyCode::IpBlacklisted => "Access denied: your IP address has been blacklisted",
            DenyCode::RateLimitExceeded => "Too many requests, please try again later",
            DenyCode::CircuitBreakerOpen => {
                "Service temporarily unavailable, please try again later"
            }
        }
    }
}

impl fmt::Display for DenyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// 关闭状态（正常）
    Closed,
    /// 打开状态（熔断）
    Open,
    /// 半开状态（探测）
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "Closed",
            CircuitState::Open => "Open",
            CircuitState::HalfOpen => "HalfOpen",
        };
        f.write_str(name)
    }
}

/// 熔断器统计信息（单个端点）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// 端点键（METHOD path）
    pub key: String,
    /// 当前状态
    pub state: CircuitState,
    /// 当前计数周期内的请求数
    pub requests: u64,
    /// 当前计数周期内的失败数
    pub failures: u64,
    /// 当前计数周期内的成功数
    pub successes: u64,
    /// 最后失败时间
    pub last_failure_at: Option<chrono::DateTime<chrono::Utc>>,
    /// 最后状态变更时间
    pub last_transition_at: chrono::DateTime<chrono::Utc>,
}

/// 准入决策
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// 允许；经过限流检查时附带限流结果（白名单请求为 `None`）
    Allowed { rate: Option<RateDecision> },
    /// 拒绝
    Denied {
        code: DenyCode,
        /// 仅限流拒绝时有值（秒）
        retry_after: Option<u64>,
        rate: Option<RateDecision>,
    },
}

impl Decision {
    /// 是否允许
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// 拒绝代码
    pub fn deny_code(&self) -> Option<DenyCode> {
        match self {
            Decision::Allowed { .. } => None,
            Decision::Denied { code, .. } => Some(*code),
        }
    }

    /// 建议的重试等待秒数
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Decision::Allowed { .. } => None,
            Decision::Denied { retry_after, .. } => *retry_after,
        }
    }

    /// 限流结果
    pub fn rate(&self) -> Option<&RateDecision> {
        match self {
            Decision::Allowed { rate } | Decision::Denied { rate, .. } => rate.as_ref(),
        }
    }

    /// 拒绝时渲染为HTTP响应描述
    pub fn rejection(&self) -> Option<Rejection> {
        Rejection::from_decision(self)
    }
}
