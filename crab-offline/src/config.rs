use std::path::PathBuf;
use std::time::Duration;

/// 离线同步配置
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | /var/lib/crab/offline | 工作目录 (数据库、日志) |
/// | BACKEND_URL | http://localhost:3000 | 后端 API 地址 |
/// | API_TOKEN | - | Bearer token |
/// | ENVIRONMENT | development | 运行环境 |
/// | SYNC_BATCH_SIZE | 100 | 每批拉取行数 |
/// | MUTATION_MAX_RETRIES | 5 | 变更最大重试次数 |
/// | RETRY_BASE_DELAY_MS | 2000 | 重试基础延迟(毫秒) |
/// | RETRY_MAX_DELAY_MS | 60000 | 重试最大延迟(毫秒) |
/// | PENDING_SCAN_INTERVAL_SECS | 15 | 待处理队列扫描间隔 |
/// | FULL_SYNC_INTERVAL_SECS | 86400 | 全量同步间隔 |
/// | REQUEST_TIMEOUT_MS | 30000 | 请求超时(毫秒) |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_JSON | false | 控制台输出 JSON 格式 |
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/crab BACKEND_URL=https://pos.example.com cargo run -p crab-offline
/// ```
#[derive(Debug, Clone)]
pub struct OfflineConfig {
    /// 工作目录，存储本地数据库和日志
    pub work_dir: String,
    /// 后端 API 基础地址
    pub backend_url: String,
    /// Bearer token (由认证服务提供)
    pub api_token: Option<String>,
    /// 运行环境: development | staging | production
    pub environment: String,
    /// 每批拉取的最大行数
    pub batch_size: usize,
    /// 变更重试策略
    pub retry: RetryPolicy,
    /// 待处理队列扫描间隔 (秒)
    pub pending_scan_interval_secs: u64,
    /// 自动全量同步间隔 (秒)
    pub full_sync_interval_secs: u64,
    /// 请求超时时间 (毫秒)
    pub request_timeout_ms: u64,
    /// 日志级别
    pub log_level: String,
    /// 控制台日志是否输出 JSON
    pub log_json: bool,
}

/// Exponential backoff for queued mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed before a mutation is marked failed
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// Delay before the next attempt after `retry_count` failed attempts:
    /// `base * 2^(retry_count - 1)`, capped at `max_delay_ms`
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(20);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl OfflineConfig {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        let defaults = RetryPolicy::default();
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/crab/offline".into()),
            backend_url: std::env::var("BACKEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            api_token: std::env::var("API_TOKEN").ok().filter(|t| !t.is_empty()),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            batch_size: env_parse("SYNC_BATCH_SIZE", 100usize).max(1),
            retry: RetryPolicy {
                max_retries: env_parse("MUTATION_MAX_RETRIES", defaults.max_retries),
                base_delay_ms: env_parse("RETRY_BASE_DELAY_MS", defaults.base_delay_ms),
                max_delay_ms: env_parse("RETRY_MAX_DELAY_MS", defaults.max_delay_ms),
            },
            pending_scan_interval_secs: env_parse("PENDING_SCAN_INTERVAL_SECS", 15),
            full_sync_interval_secs: env_parse("FULL_SYNC_INTERVAL_SECS", 86_400),
            request_timeout_ms: env_parse("REQUEST_TIMEOUT_MS", 30_000),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_json: env_parse("LOG_JSON", false),
        }
    }

    /// 使用自定义工作目录和后端地址覆盖配置
    ///
    /// 常用于测试场景
    pub fn with_overrides(work_dir: impl Into<String>, backend_url: impl Into<String>) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.backend_url = backend_url.into();
        config
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Path of the local redb database
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("offline.redb")
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("logs")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
