//! EMAP命令行主程序

mod replay;
mod star;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use emap_admin::{init_logging, ConfigManager, EmapConfig};
use emap_database::DatabasePool;
use emap_hl7::Hl7Dispatcher;
use emap_messaging::{AmqpPublisher, AmqpSubscriber};
use emap_reader::{Hl7Reader, PgFeedSource, PgProgressStore, ReaderSettings};
use emap_star::InterchangeProcessor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// EMAP命令行参数
#[derive(Parser, Debug)]
#[command(name = "emap-server")]
#[command(about = "HL7v2 到双时态患者库的转换与对账")]
struct Args {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 从源消息库读取HL7，发布交换消息
    Hl7Reader {
        /// 覆盖配置中的结束序号
        #[arg(long)]
        end_unid: Option<i64>,
    },
    /// 从队列消费交换消息并对账
    Star,
    /// 在进程内回放HL7文件
    Replay {
        /// HL7文本文件
        file: PathBuf,
    },
    /// 输出当前生效的配置（TOML）
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let manager = ConfigManager::new(args.config.as_deref())?;
    let config = manager.get_config().await;
    init_logging(&config.logging)?;

    let result = match args.command {
        Command::Hl7Reader { end_unid } => run_reader(&manager, config, end_unid).await,
        Command::Star => run_star(config).await,
        Command::Replay { file } => run_replay(&manager, &file).await,
        Command::PrintConfig => {
            println!("{}", config.to_toml()?);
            Ok(())
        }
    };

    if let Err(e) = &result {
        error!("emap-server failed: {:#}", e);
    }
    result
}

/// Ctrl-C 时把停止信号置为 `true`
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            let _ = tx.send(true);
        }
    });
    rx
}

async fn run_reader(manager: &ConfigManager, config: EmapConfig, end_unid: Option<i64>) -> Result<()> {
    info!("Starting HL7 reader");

    // 1. 源消息库与书签
    let pool = DatabasePool::new(&config.feed.database_url, config.feed.max_connections)
        .await
        .context("Failed to connect to feed database")?;
    let progress = PgProgressStore::new(pool.clone());
    progress.prepare().await.context("Failed to prepare progress table")?;

    // 2. 队列
    let publisher = AmqpPublisher::new(config.queue.clone());
    publisher.connect().await?;
    let publisher = Arc::new(publisher);

    // 3. 读取循环
    let settings = ReaderSettings {
        poll_interval: config.feed.poll_interval(),
        default_start_unid: config.feed.default_start_unid,
        end_unid: end_unid.or(config.feed.end_unid),
        stats_interval: config.logging.stats_interval,
    };
    let reader = Hl7Reader::new(
        Arc::new(PgFeedSource::new(pool.clone())),
        Arc::new(progress),
        publisher.clone(),
        Hl7Dispatcher::new(manager.hl7_context().await?),
        settings,
    )?;
    let outcome = reader.run(shutdown_signal()).await;

    publisher.disconnect().await?;
    pool.close().await;
    let snapshot = outcome?;
    info!("HL7 reader finished: {} records, {} messages", snapshot.records, snapshot.messages);
    Ok(())
}

async fn run_star(config: EmapConfig) -> Result<()> {
    info!("Starting star consumer");

    let handler = Arc::new(star::StarHandler::new(
        InterchangeProcessor::new(),
        config.logging.stats_interval,
    )?);
    let subscriber = AmqpSubscriber::new(config.queue.clone());
    subscriber.connect().await?;
    subscriber.start_consuming(handler.clone()).await?;

    let mut shutdown = shutdown_signal();
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }

    subscriber.disconnect().await?;
    let snapshot = handler.stats().snapshot();
    info!("Star consumer stopped after {} messages", snapshot.records);
    Ok(())
}

async fn run_replay(manager: &ConfigManager, file: &Path) -> Result<()> {
    let dispatcher = Hl7Dispatcher::new(manager.hl7_context().await?);
    let processor = InterchangeProcessor::new();
    let summary = replay::replay_file(file, &dispatcher, &processor).await?;

    println!("Records:    {}", summary.records);
    for (outcome, count) in &summary.outcomes {
        println!("  {:<16}{}", outcome, count);
    }
    println!("Applied:    {}", summary.applied);
    println!("Duplicates: {}", summary.duplicates);
    println!("Dropped:    {}", summary.dropped);
    println!("Audit rows: {}", summary.audit_rows);
    Ok(())
}
