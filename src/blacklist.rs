//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 黑名单与白名单
//!
//! - 黑名单：持续超限的身份被晋升为限时拒绝，也支持手动添加/移除
//! - 白名单：启动时加载的静态集合，命中后跳过限流和熔断判断，请求结果仍计入熔断器
//!
//! 过期条目在查询时惰性删除，后台清理任务也会主动清除。

use crate::config::{looks_like_ip_pattern, RateLimitConfig};
use crate::constants::{AUTO_BLACKLIST_REASON, MAX_BLACKLIST_REASON_LENGTH, MAX_IDENTITY_LENGTH};
use crate::error::GateError;
use crate::events::{AdmissionEvent, EventSink};
use crate::store::{KeyedStateStore, Sweepable};
use ahash::AHashSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// IP范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpRange {
    /// 单个IP
    Single(IpAddr),
    /// IPv4 CIDR
    Ipv4Cidr { addr: Ipv4Addr, prefix: u8 },
    /// IPv6 CIDR
    Ipv6Cidr { addr: Ipv6Addr, prefix: u8 },
    /// IPv4范围
    Ipv4Range { start: Ipv4Addr, end: Ipv4Addr },
}

impl IpRange {
    /// 检查IP是否在范围内
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self, ip) {
            (IpRange::Single(addr), _) => addr == ip,
            (IpRange::Ipv4Cidr { addr, prefix }, IpAddr::V4(ipv4)) => {
                let mask = if *prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - prefix)
                };
                (u32::from(*ipv4) & mask) == (u32::from(*addr) & mask)
            }
            (IpRange::Ipv6Cidr { addr, prefix }, IpAddr::V6(ipv6)) => {
                let mask = if *prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - prefix)
                };
                (u128::from(*ipv6) & mask) == (u128::from(*addr) & mask)
            }
            (IpRange::Ipv4Range { start, end }, IpAddr::V4(ipv4)) => ipv4 >= start && ipv4 <= end,
            _ => false,
        }
    }
}

impl FromStr for IpRange {
    type Err = GateError;

    /// 支持 `10.0.0.1`、`10.0.0.0/8`、`fd00::/8`、`10.0.0.1-10.0.0.9`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((addr, prefix)) = s.split_once('/') {
            let addr: IpAddr = addr
                .parse()
                .map_err(|_| GateError::ConfigError(format!("无效的IP地址: {}", addr)))?;
            let prefix: u8 = prefix
                .parse()
                .map_err(|_| GateError::ConfigError(format!("无效的前缀: {}", prefix)))?;

            match addr {
                IpAddr::V4(addr) if prefix <= 32 => Ok(IpRange::Ipv4Cidr { addr, prefix }),
                IpAddr::V6(addr) if prefix <= 128 => Ok(IpRange::Ipv6Cidr { addr, prefix }),
                _ => Err(GateError::ConfigError(format!("前缀超出范围: {}", s))),
            }
        } else if let Some((start, end)) = s.split_once('-') {
            let start: Ipv4Addr = start
                .trim()
                .parse()
                .map_err(|_| GateError::ConfigError(format!("无效的起始IP: {}", start)))?;
            let end: Ipv4Addr = end
                .trim()
                .parse()
                .map_err(|_| GateError::ConfigError(format!("无效的结束IP: {}", end)))?;

            if start > end {
                return Err(GateError::ConfigError(format!(
                    "起始IP不能大于结束IP: {} - {}",
                    start, end
                )));
            }
            Ok(IpRange::Ipv4Range { start, end })
        } else {
            let addr: IpAddr = s
                .parse()
                .map_err(|_| GateError::ConfigError(format!("无效的IP地址: {}", s)))?;
            Ok(IpRange::Single(addr))
        }
    }
}

/// 静态白名单
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    ranges: Vec<IpRange>,
    identities: AHashSet<String>,
}

impl Whitelist {
    /// 从配置条目构建；IP形式的条目必须能解析
    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> Result<Self, GateError> {
        let mut whitelist = Whitelist::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            if looks_like_ip_pattern(entry) {
                whitelist.ranges.push(entry.parse()?);
            } else {
                whitelist.identities.insert(entry.to_string());
            }
        }
        Ok(whitelist)
    }

    pub fn contains(&self, identity: &str) -> bool {
        if self.identities.contains(identity) {
            return true;
        }
        match identity.parse::<IpAddr>() {
            Ok(ip) => self.ranges.iter().any(|range| range.contains(&ip)),
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.ranges.len() + self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 黑名单来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlacklistSource {
    /// 限流超阈值自动晋升
    Auto,
    /// 管理员手动添加
    Manual,
}

/// 黑名单条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub identity: String,
    pub reason: String,
    pub added_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub source: BlacklistSource,
}

impl BlacklistEntry {
    /// 条目是否仍然有效
    pub fn is_active(&self) -> bool {
        Utc::now() < self.expires_at
    }

    fn event(&self) -> AdmissionEvent {
        AdmissionEvent::Blacklisted {
            timestamp: self.added_at,
            identity: self.identity.clone(),
            reason: self.reason.clone(),
            expires_at: self.expires_at,
            source: self.source,
        }
    }
}

impl Sweepable for BlacklistEntry {
    /// 以过期时间为准，忽略保留时长
    fn is_stale(&self, _retention: Duration) -> bool {
        !self.is_active()
    }
}

fn expiry(now: DateTime<Utc>, duration: Duration) -> Option<DateTime<Utc>> {
    let duration = chrono::Duration::from_std(duration).ok()?;
    now.checked_add_signed(duration)
}

/// 验证身份标识
fn validate_identity(identity: &str) -> Result<(), GateError> {
    if identity.trim().is_empty() {
        return Err(GateError::ValidationError("身份标识不能为空".to_string()));
    }
    if identity.len() > MAX_IDENTITY_LENGTH {
        return Err(GateError::ValidationError(format!(
            "身份标识长度不能超过{}个字符",
            MAX_IDENTITY_LENGTH
        )));
    }
    if identity.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(GateError::ValidationError(
            "身份标识包含非法字符".to_string(),
        ));
    }
    Ok(())
}

/// 验证黑名单原因
fn validate_reason(reason: &str) -> Result<(), GateError> {
    if reason.trim().is_empty() {
        return Err(GateError::ValidationError("黑名单原因不能为空".to_string()));
    }
    if reason.chars().count() > MAX_BLACKLIST_REASON_LENGTH {
        return Err(GateError::ValidationError(format!(
            "黑名单原因长度不能超过{}个字符",
            MAX_BLACKLIST_REASON_LENGTH
        )));
    }
    if reason.chars().any(|c| c.is_control()) {
        return Err(GateError::ValidationError(
            "黑名单原因包含非法字符".to_string(),
        ));
    }
    Ok(())
}

/// 黑名单守卫
pub struct BlacklistGuard {
    enabled: bool,
    whitelist_enabled: bool,
    whitelist: Whitelist,
    threshold: u64,
    duration: Duration,
    entries: KeyedStateStore<BlacklistEntry>,
    sink: Arc<dyn EventSink>,
}

impl BlacklistGuard {
    /// 根据限流配置创建
    pub fn new(config: &RateLimitConfig, sink: Arc<dyn EventSink>) -> Result<Self, GateError> {
        let whitelist = if config.enable_whitelist {
            Whitelist::from_entries(&config.whitelist_ips)?
        } else {
            Whitelist::default()
        };

        info!(
            "创建黑名单守卫: enabled={}, threshold={}, duration={:?}, whitelist_entries={}",
            config.enable_ip_blacklist,
            config.blacklist_threshold,
            config.blacklist_duration,
            whitelist.len()
        );

        Ok(Self {
            enabled: config.enable_ip_blacklist,
            whitelist_enabled: config.enable_whitelist,
            whitelist,
            threshold: config.blacklist_threshold,
            duration: config.blacklist_duration,
            entries: KeyedStateStore::new("blacklist"),
            sink,
        })
    }

    /// 是否在黑名单中；查到过期条目时顺便删除
    pub fn is_blacklisted(&self, identity: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let active = match self.entries.with_existing(identity, |entry| entry.is_active()) {
            Some(active) => active,
            None => return false,
        };
        if !active && self.entries.remove_if(identity, |entry| !entry.is_active()) {
            debug!("黑名单条目已过期并删除: identity={}", identity);
        }
        active
    }

    /// 是否在白名单中
    pub fn is_whitelisted(&self, identity: &str) -> bool {
        self.whitelist_enabled && self.whitelist.contains(identity)
    }

    /// 窗口计数达到阈值时把身份加入黑名单，返回是否加入
    pub fn promote_if_over_threshold(&self, identity: &str, window_count: u64) -> bool {
        if !self.enabled || window_count < self.threshold {
            return false;
        }

        let now = Utc::now();
        let entry = BlacklistEntry {
            identity: identity.to_string(),
            reason: AUTO_BLACKLIST_REASON.to_string(),
            added_at: now,
            expires_at: expiry(now, self.duration).unwrap_or(DateTime::<Utc>::MAX_UTC),
            source: BlacklistSource::Auto,
        };
        let event = entry.event();
        self.entries.insert(identity, entry);

        warn!(
            "身份被自动加入黑名单: identity={}, window_count={}, threshold={}, duration={:?}",
            identity, window_count, self.threshold, self.duration
        );
        self.sink.emit(event);
        true
    }

    /// 手动加入黑名单（覆盖已有条目）
    #[instrument(skip(self))]
    pub fn add(
        &self,
        identity: &str,
        reason: &str,
        duration: Duration,
    ) -> Result<BlacklistEntry, GateError> {
        validate_identity(identity)?;
        validate_reason(reason)?;
        if duration.is_zero() {
            return Err(GateError::ValidationError("黑名单时长必须大于0".to_string()));
        }

        let now = Utc::now();
        let expires_at = expiry(now, duration)
            .ok_or_else(|| GateError::ValidationError(format!("黑名单时长过大: {:?}", duration)))?;
        let entry = BlacklistEntry {
            identity: identity.to_string(),
            reason: reason.to_string(),
            added_at: now,
            expires_at,
            source: BlacklistSource::Manual,
        };
        self.entries.insert(identity, entry.clone());

        info!(
            "手动加入黑名单: identity={}, reason={}, expires_at={}",
            identity, reason, expires_at
        );
        self.sink.emit(entry.event());
        Ok(entry)
    }

    /// 移出黑名单，返回条目是否存在
    #[instrument(skip(self))]
    pub fn remove(&self, identity: &str) -> bool {
        let removed = self.entries.remove(identity);
        if removed {
            info!("移出黑名单: identity={}", identity);
            self.sink.emit(AdmissionEvent::unblacklisted(identity));
        }
        removed
    }

    /// 查询有效条目
    pub fn lookup(&self, identity: &str) -> Option<BlacklistEntry> {
        self.entries
            .with_existing(identity, |entry| entry.clone())
            .filter(BlacklistEntry::is_active)
    }

    /// 所有有效条目，按加入时间排序
    pub fn list(&self) -> Vec<BlacklistEntry> {
        let mut entries: Vec<BlacklistEntry> = self
            .entries
            .snapshot(|_, entry| entry.clone())
            .into_iter()
            .filter(BlacklistEntry::is_active)
            .collect();
        entries.sort_by(|a, b| {
            a.added_at
                .cmp(&b.added_at)
                .then_with(|| a.identity.cmp(&b.identity))
        });
        entries
    }

    /// 清除所有过期条目，返回清除数量
    pub fn cleanup_expired(&self) -> usize {
        let removed = self.entries.sweep(Duration::ZERO);
        debug!("黑名单清理完成: removed={}", removed);
        removed
    }

    /// 当前存储的条目数（包括尚未清理的过期条目）
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}
