//! Crab Offline - POS 离线优先同步核心
//!
//! # 架构概述
//!
//! - **本地镜像** (`storage`): redb 存储服务端数据的本地副本
//! - **批量拉取** (`puller`): 基于游标的全量/增量分页拉取
//! - **变更队列** (`queue`): 持久化写队列，乐观更新 + 重放
//! - **ID 映射** (`id_map`): 临时 ID → 服务端 ID
//! - **后端接口** (`remote`): REST 客户端
//!
//! # 模块结构
//!
//! ```text
//! crab-offline/src/
//! ├── config.rs        # 配置 (环境变量)
//! ├── connectivity.rs  # 在线/离线状态
//! ├── error.rs         # 错误类型
//! ├── id_map.rs        # 临时 ID 映射
//! ├── logger.rs        # 日志
//! ├── mutation.rs      # 写意图与队列条目
//! ├── puller.rs        # 批量拉取
//! ├── queue.rs         # 变更队列
//! ├── remote/          # 后端接口 + HTTP 实现
//! ├── service.rs       # 对外门面
//! ├── storage.rs       # redb 本地存储
//! └── worker.rs        # 后台任务
//! ```

pub mod config;
pub mod connectivity;
pub mod error;
pub mod id_map;
pub mod logger;
pub mod mutation;
pub mod puller;
pub mod queue;
pub mod remote;
pub mod service;
pub mod storage;
pub mod worker;

// Re-export 公共类型
pub use config::{OfflineConfig, RetryPolicy};
pub use connectivity::{Connectivity, ConnectivityMonitor};
pub use error::{SyncError, SyncResult};
pub use id_map::IdMap;
pub use mutation::{FailureKind, Mutation, MutationStatus, PendingMutation, WriteState};
pub use puller::{BatchPuller, PullMode, PullOutcome, PullReport, SyncAllReport};
pub use queue::{MutationQueue, ProcessReport, QueueStats};
pub use remote::{FailureClass, HttpBackend, RemoteBackend, RemoteError, StaticToken, TokenProvider};
pub use service::OfflineService;
pub use storage::{LocalStore, StorageError};
pub use worker::OfflineWorker;

/// 设置运行环境: 加载 .env、读取配置、初始化日志
///
/// 日志目录为 `<work_dir>/logs`
pub fn setup_environment() -> anyhow::Result<OfflineConfig> {
    dotenv::dotenv().ok();

    let config = OfflineConfig::from_env();
    std::fs::create_dir_all(&config.work_dir)?;
    logger::init_logger_with_file(&config.log_level, config.log_json, Some(&config.log_dir()))?;

    Ok(config)
}
