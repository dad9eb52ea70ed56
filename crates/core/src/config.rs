use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 全局应用配置
///
/// 由 `bourse-app` 依次叠加默认值、`config.toml` 与 `BOURSE__` 前缀的环境变量得到。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub trade: TradeConfig,
    pub cache: CacheConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 数据根目录
    pub data_dir: String,
    /// 账本数据库文件名
    pub file_name: String,
    pub max_connections: u32,
    /// SQLite 写锁等待上限
    pub busy_timeout_ms: u64,
}

impl DatabaseConfig {
    /// 账本数据库文件的完整路径
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(&self.file_name)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            file_name: "bourse.db".to_string(),
            max_connections: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

/// 订单执行引擎参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeConfig {
    /// 单笔订单执行的默认截止时长
    pub execution_timeout_ms: u64,
    /// 乐观锁冲突时结算的最大尝试次数 (含首次)
    pub max_settle_attempts: u32,
    /// 冲突重试的基础退避时长，按尝试次数线性递增
    pub retry_backoff_ms: u64,
    /// 启动回收时，只处理创建时间早于该秒数的滞留订单
    pub recover_older_than_secs: i64,
}

impl TradeConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            execution_timeout_ms: 5_000,
            max_settle_attempts: 8,
            retry_backoff_ms: 5,
            recover_older_than_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 股票列表读穿缓存的存活秒数
    pub stock_list_ttl_secs: u64,
}

impl CacheConfig {
    pub fn stock_list_ttl(&self) -> Duration {
        Duration::from_secs(self.stock_list_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stock_list_ttl_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` 语法的默认过滤级别，`RUST_LOG` 优先
    pub level: String,
    /// 滚动日志文件目录
    pub dir: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "logs".to_string(),
        }
    }
}
