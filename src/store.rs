//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 键控状态存储
//!
//! 每个组件独占一张 `key -> 记录` 映射，整张表由一把读写锁保护，
//! 每条记录再由自己的互斥锁保护。
//!
//! # 锁约定
//!
//! - 命中路径只持有表的读锁，随后释放表锁再锁定记录
//! - 未命中时使用双重检查：读锁未命中 -> 写锁 -> 再次检查 -> 插入
//! - 清理和快照在持有表锁期间短暂锁定记录；记录锁持有期间绝不获取表锁

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// 可被后台清理的记录
pub trait Sweepable {
    /// 记录是否已陈旧
    ///
    /// `retention` 为配置的保留时长，不依赖它的记录（如按过期时间判断的黑名单条目）可以忽略。
    fn is_stale(&self, retention: Duration) -> bool;
}

/// 共享的记录句柄
pub type Entry<V> = Arc<Mutex<V>>;

/// 并发安全的键控状态表
pub struct KeyedStateStore<V> {
    /// 表名（用于日志）
    name: &'static str,
    /// 记录表
    entries: RwLock<AHashMap<String, Entry<V>>>,
}

impl<V> KeyedStateStore<V> {
    /// 创建新的状态表
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(AHashMap::new()),
        }
    }

    /// 表名
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 查找记录（只读锁）
    pub fn get(&self, key: &str) -> Option<Entry<V>> {
        self.entries.read().get(key).cloned()
    }

    /// 查找或创建记录
    ///
    /// 读锁命中直接返回；未命中时升级为写锁并再次检查，保证并发创建只生效一次。
    pub fn get_or_insert_with<F>(&self, key: &str, init: F) -> Entry<V>
    where
        F: FnOnce() -> V,
    {
        if let Some(entry) = self.entries.read().get(key) {
            return entry.clone();
        }

        let mut entries = self.entries.write();
        entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(init())))
            .clone()
    }

    /// 在记录锁内执行操作，记录不存在时先创建
    pub fn with_entry<I, F, R>(&self, key: &str, init: I, f: F) -> R
    where
        I: FnOnce() -> V,
        F: FnOnce(&mut V) -> R,
    {
        let entry = self.get_or_insert_with(key, init);
        let mut guard = entry.lock();
        f(&mut guard)
    }

    /// 在已存在记录的锁内执行操作
    pub fn with_existing<F, R>(&self, key: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut V) -> R,
    {
        let entry = self.get(key)?;
        let mut guard = entry.lock();
        Some(f(&mut guard))
    }

    /// 插入或覆盖记录
    pub fn insert(&self, key: &str, value: V) {
        self.entries
            .write()
            .insert(key.to_string(), Arc::new(Mutex::new(value)));
    }

    /// 移除记录，返回是否存在
    pub fn remove(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// 条件移除
    ///
    /// 在写锁内重新检查谓词，避免删除其他线程刚刚替换进来的新记录。
    pub fn remove_if<F>(&self, key: &str, predicate: F) -> bool
    where
        F: FnOnce(&V) -> bool,
    {
        let mut entries = self.entries.write();
        let should_remove = match entries.get(key) {
            Some(entry) => predicate(&*entry.lock()),
            None => false,
        };
        if should_remove {
            entries.remove(key);
        }
        should_remove
    }

    /// 对所有记录执行可变操作
    pub fn for_each_mut<F>(&self, mut f: F)
    where
        F: FnMut(&str, &mut V),
    {
        let entries = self.entries.read();
        for (key, entry) in entries.iter() {
            f(key.as_str(), &mut *entry.lock());
        }
    }

    /// 生成所有记录的快照
    pub fn snapshot<F, T>(&self, mut f: F) -> Vec<T>
    where
        F: FnMut(&str, &V) -> T,
    {
        let entries = self.entries.read();
        entries
            .iter()
            .map(|(key, entry)| f(key.as_str(), &*entry.lock()))
            .collect()
    }

    /// 记录数
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// 是否包含键
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// 清空
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let count = entries.len();
        entries.clear();
        count
    }
}

impl<V: Sweepable> KeyedStateStore<V> {
    /// 清理陈旧记录，返回移除数量
    ///
    /// 仍被其他线程持有句柄的记录本轮跳过，避免对方在已移出表的记录上计数。
    pub fn sweep(&self, retention: Duration) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| {
            Arc::strong_count(entry) > 1 || !entry.lock().is_stale(retention)
        });
        let removed = before - entries.len();
        drop(entries);
        if removed > 0 {
            debug!("{}: swept {} stale entries", self.name, removed);
        }
        removed
    }
}

/// 把单调时钟时刻换算成墙上时间
pub(crate) fn wall_clock(instant: Instant) -> Option<DateTime<Utc>> {
    let elapsed = chrono::Duration::from_std(instant.elapsed()).ok()?;
    Some(Utc::now() - elapsed)
}

/// 后台清理任务句柄
///
/// 句柄被丢弃时任务随之终止。
pub struct SweeperHandle {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// 任务名
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 任务是否已结束
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// 停止任务
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// 启动周期性清理任务
///
/// 必须在tokio运行时内调用。第一次清理发生在一个完整的 `interval` 之后。
pub fn spawn_sweeper<F>(name: &'static str, interval: Duration, mut sweep: F) -> SweeperHandle
where
    F: FnMut() -> usize + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval 的第一次 tick 立即完成
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = sweep();
            debug!("Sweeper {} finished a pass, removed={}", name, removed);
        }
    });

    info!("Sweeper {} started (interval: {:?})", name, interval);
    SweeperHandle { name, handle }
}
