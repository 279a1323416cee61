//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 拒绝响应渲染
//!
//! 把 [`Decision::Denied`] 转换成与框架无关的HTTP响应描述（状态码、JSON体、响应头），
//! 由调用方写入实际的HTTP响应。

use crate::error::{Decision, DenyCode};
use crate::rate_limiter::RateDecision;
use serde::Serialize;
use serde_json::json;

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// 限流响应头
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitHeaders {
    pub limit: u64,
    pub remaining: u64,
    /// 距离窗口重置的秒数
    pub reset_secs: u64,
}

impl RateLimitHeaders {
    pub fn from_decision(rate: &RateDecision) -> Self {
        Self {
            limit: rate.limit,
            remaining: if rate.allowed { rate.remaining } else { 0 },
            reset_secs: rate.reset_after_secs(),
        }
    }

    /// 转换为 `(名称, 值)` 列表
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        vec![
            (HEADER_LIMIT.to_string(), self.limit.to_string()),
            (HEADER_REMAINING.to_string(), self.remaining.to_string()),
            (HEADER_RESET.to_string(), self.reset_secs.to_string()),
        ]
    }
}

/// 拒绝响应
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub status: u16,
    pub body: serde_json::Value,
    pub headers: Vec<(String, String)>,
}

impl Rejection {
    /// 允许的决策返回 `None`
    pub fn from_decision(decision: &Decision) -> Option<Self> {
        match decision {
            Decision::Allowed { .. } => None,
            Decision::Denied {
                code,
                retry_after,
                rate,
            } => Some(Self::build(*code, *retry_after, rate.as_ref())),
        }
    }

    fn build(code: DenyCode, retry_after: Option<u64>, rate: Option<&RateDecision>) -> Self {
        let mut body = json!({
            "success": false,
            "message": code.message(),
            "code": code.as_str(),
        });
        let mut headers = Vec::new();

        if code == DenyCode::RateLimitExceeded {
            let retry_after = retry_after.unwrap_or(1);
            body["retry_after"] = json!(retry_after);
            if let Some(rate) = rate {
                headers.extend(RateLimitHeaders::from_decision(rate).to_pairs());
            }
            headers.push((HEADER_RETRY_AFTER.to_string(), retry_after.to_string()));
        }

        Self {
            status: code.http_status(),
            body,
            headers,
        }
    }

    /// 查找响应头（名称不区分大小写）
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// 响应体的JSON字符串
    pub fn to_json_string(&self) -> String {
        self.body.to_string()
    }
}
