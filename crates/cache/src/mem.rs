use async_trait::async_trait;
use bourse_core::cache::error::CacheError;
use bourse_core::cache::port::Cache;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// 单个缓存条目
struct Entry {
    value: Vec<u8>,
    // 过期时刻，None 表示永不过期
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// # Summary
/// 基于 DashMap 的内存缓存实现。
///
/// # Invariants
/// - 所有操作均通过并发哈希表 `DashMap` 执行，保证多线程安全。
/// - 过期条目在读取时惰性清除，不启动后台清理任务。
pub struct MemCache {
    // 线程安全的 KV 存储容器
    storage: DashMap<String, Entry>,
}

impl MemCache {
    /// # Summary
    /// 创建一个新的 MemCache 实例。
    pub fn new() -> Self {
        Self {
            storage: DashMap::new(),
        }
    }

    /// 当前保存的条目数 (含尚未被惰性清除的过期条目)
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

impl Default for MemCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemCache {
    /// # Logic
    /// 将 Key 转换为 String 后与 Value 一并插入哈希表，若存在同名 Key 则覆盖。
    /// TTL 换算为绝对过期时刻保存；溢出时视为永不过期。
    async fn set_raw(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let expires_at = ttl.and_then(|d| Instant::now().checked_add(d));
        self.storage
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    /// # Logic
    /// 1. 检索 Key 对应的条目。
    /// 2. 已过期则移除并返回 None，否则克隆数据返回。
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        // 先释放读引用再删除，避免同一分片上的读写死锁
        match self.storage.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }
        self.storage.remove_if(key, |_, e| e.is_expired(now));
        Ok(None)
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.storage.remove(key);
        Ok(())
    }
}
