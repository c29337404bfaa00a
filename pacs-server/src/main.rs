//! PACS采集通知接收服务主程序

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use crate::config::{ConfigManager, ConfigValidator, PacsConfig, StoreBackend};
use pacs_core::MetadataStore;
use pacs_database::{DatabasePool, MemoryStore, PgStore};
use pacs_ingest::Ingestor;
use pacs_integration::{ApiServer, ApiState, WebhookManager};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// 服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "pacs-server")]
#[command(about = "PACS 采集通知接收服务")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<String>,

    /// 监听主机，覆盖配置文件
    #[arg(long)]
    host: Option<String>,

    /// 监听端口，覆盖配置文件
    #[arg(short, long)]
    port: Option<u16>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long)]
    log_level: Option<String>,

    /// 使用进程内存储代替PostgreSQL
    #[arg(long)]
    memory_store: bool,
}

impl Args {
    fn apply(&self, config: &mut PacsConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.memory_store {
            config.database.backend = StoreBackend::Memory;
        }
    }
}

async fn open_store(config: &PacsConfig) -> Result<Arc<dyn MetadataStore>> {
    match config.database.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory store, data will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let pool = DatabasePool::connect(
                &config.database.url,
                config.database.max_connections,
                Duration::from_secs(config.database.connect_timeout_secs),
            )
            .await
            .context("Failed to connect to database")?;

            let store = PgStore::new(pool);
            store.create_tables().await.context("Failed to create tables")?;
            info!("Connected to PostgreSQL store");
            Ok(Arc::new(store))
        }
    }
}

async fn register_webhooks(config: &PacsConfig) -> Result<Arc<WebhookManager>> {
    let manager = WebhookManager::with_timeout(Duration::from_secs(config.integration.webhook_timeout_secs))?;
    for request in &config.integration.webhooks {
        let url = request.url.clone();
        manager
            .subscribe(request.clone())
            .await
            .with_context(|| format!("Invalid webhook subscription for {}", url))?;
    }
    Ok(Arc::new(manager))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ConfigManager::load_config(args.config.as_deref())?;
    args.apply(&mut config);

    let filter = EnvFilter::try_new(&config.logging.level)
        .with_context(|| format!("Invalid log level: {}", config.logging.level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.logging.ansi)
        .init();

    ConfigValidator::new().validate(&config)?;

    info!("启动PACS采集通知接收服务...");
    info!("  监听地址: {}", config.server.bind_addr());
    info!("  存储后端: {:?}", config.database.backend);
    info!("  UID根: {}", config.ingest.uid_root);

    let store = open_store(&config).await?;
    let webhooks = register_webhooks(&config).await?;
    let ingestor = Ingestor::new(store, webhooks.clone(), config.ingest.clone());

    let server = ApiServer::new(ApiState::new(ingestor, webhooks));
    if let Err(e) = server.run(&config.server.bind_addr()).await {
        error!("服务器启动失败: {}", e);
        return Err(e);
    }

    Ok(())
}
