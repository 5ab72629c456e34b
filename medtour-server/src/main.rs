//! MedTour服务器主程序

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use medtour_admin::{init_logging, ConfigManager, MedTourConfig};
use medtour_core::{MedTourError, Money};
use medtour_database::{DatabasePool, DatabaseQueries, PgCaseStore};
use medtour_workflow::{CaseStore, EngineSettings, FinanceSplitter, InMemoryStore, LifecycleEngine};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// MedTour服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "medtour-server")]
#[command(about = "医疗旅游病例与报价生命周期引擎")]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 日志级别（覆盖配置文件）
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 创建数据库表和索引
    Migrate,

    /// 计算报价总额的托管拆分
    Split {
        /// 报价总额（整数货币单位）
        #[arg(long)]
        total: f64,
    },

    /// 运行一次完整的病例生命周期：建档、报价、接受
    Demo {
        /// 使用的存储
        #[arg(long, value_enum, default_value = "memory")]
        store: StoreKind,

        /// 报价金额
        #[arg(long, default_value = "85000")]
        amount: f64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StoreKind {
    Memory,
    Postgres,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_manager = ConfigManager::new(args.config.as_deref())?;
    let config = config_manager.get_config().await;

    // 初始化日志
    init_logging(&config.logging, args.log_level.as_deref())?;

    info!("MedTour platform fee: {} bps", config.finance.platform_fee_bps);

    let outcome = match args.command {
        Command::Migrate => migrate(&config).await,
        Command::Split { total } => split(&config, total),
        Command::Demo { store, amount } => demo(&config, store, amount).await,
    };

    if let Err(e) = &outcome {
        report_failure(e);
    }
    outcome
}

/// 调用方可修正的领域错误记为警告，其余记为错误
fn report_failure(err: &anyhow::Error) {
    match err.downcast_ref::<MedTourError>() {
        Some(domain) if domain.is_client_error() => warn!("Command rejected: {}", domain),
        _ => error!("Command failed: {:#}", err),
    }
}

async fn connect(config: &MedTourConfig) -> Result<DatabasePool> {
    DatabasePool::connect(
        &config.database.url,
        config.database.max_connections,
        Duration::from_secs(config.database.connect_timeout_secs),
    )
    .await
    .context("Failed to connect to database")
}

async fn migrate(config: &MedTourConfig) -> Result<()> {
    let pool = connect(config).await?;
    DatabaseQueries::new(&pool).create_tables().await?;
    pool.close().await;

    info!("Database schema is up to date");
    Ok(())
}

fn split(config: &MedTourConfig, total: f64) -> Result<()> {
    let splitter = FinanceSplitter::new(config.finance.platform_fee_bps)?;
    let split = splitter.split(Money::try_from_f64(total)?)?;

    println!("{}", serde_json::to_string_pretty(&split)?);
    Ok(())
}

async fn demo(config: &MedTourConfig, kind: StoreKind, amount: f64) -> Result<()> {
    let store: Arc<dyn CaseStore> = match kind {
        StoreKind::Memory => Arc::new(InMemoryStore::new()),
        StoreKind::Postgres => {
            let pool = connect(config).await?;
            DatabaseQueries::new(&pool).create_tables().await?;
            Arc::new(PgCaseStore::new(pool))
        }
    };

    let engine = LifecycleEngine::new(
        store,
        EngineSettings {
            platform_fee_bps: config.finance.platform_fee_bps,
            currency: config.finance.default_currency.clone(),
            payment_method: config.finance.payment_method,
        },
    )?;

    let case = engine
        .open_case(Uuid::new_v4(), None, Some("demo intake".to_string()))
        .await?;
    let quote = engine
        .issue_quote(case.id, Uuid::new_v4(), Money::try_from_f64(amount)?)
        .await?;
    let (_, note) = engine.accept_quote(quote.id).await?;
    engine.transition_stage(case.id, "Deposit").await?;

    let progress = engine.progress(case.id).await?;
    println!("{}", serde_json::to_string_pretty(&note)?);
    println!("{}", serde_json::to_string_pretty(&progress)?);
    Ok(())
}
