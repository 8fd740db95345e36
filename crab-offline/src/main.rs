use crab_offline::{HttpBackend, OfflineService, OfflineWorker, StaticToken, setup_environment};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. 设置环境 (dotenv, 工作目录, 日志)
    let config = setup_environment()?;

    tracing::info!(
        backend = %config.backend_url,
        work_dir = %config.work_dir,
        environment = %config.environment,
        "🦀 Crab offline sync starting..."
    );

    // 2. 后端客户端
    let tokens = Arc::new(StaticToken(config.api_token.clone()));
    let backend = Arc::new(HttpBackend::new(
        &config.backend_url,
        config.request_timeout(),
        tokens,
    )?);

    // 3. 本地存储 + 服务
    let service = OfflineService::open(config, backend)?;

    // 4. 后台任务, Ctrl+C 退出
    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(OfflineWorker::new(service.clone(), shutdown.clone()).run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
    worker.await?;

    let stats = service.queue_stats()?;
    tracing::info!(
        pending = stats.pending,
        failed = stats.failed,
        "Crab offline sync stopped"
    );
    Ok(())
}
