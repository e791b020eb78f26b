//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了CLI命令行接口。

use crate::config::Config;
use crate::context::ExecutionContext;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "oxsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(
        short,
        long,
        global = true,
        help = "Path to the TOML configuration file (defaults to the store at ./oxsync.db)"
    )]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Log filter, e.g. 'oxsync=debug'")]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(name = "status", about = "Show store and queue status")]
    Status(StatusArgs),

    #[command(name = "queue", about = "Inspect or clear the mutation queue")]
    Queue(QueueArgs),

    #[command(name = "cache", about = "Inspect or clear response cache partitions")]
    Cache(CacheArgs),

    #[command(name = "evict", about = "Remove stale entities and responses")]
    Evict(EvictArgs),

    #[command(name = "sync", about = "Drain the mutation queue once against the origin")]
    Sync(SyncArgs),

    #[command(name = "metrics", about = "Print metrics in Prometheus format")]
    Metrics,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    #[arg(short, long, help = "Show queued items")]
    pub verbose: bool,

    #[arg(short, long, help = "Output in JSON format")]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub command: QueueSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum QueueSubcommand {
    #[command(about = "List queued mutations in delivery order")]
    List,
    #[command(about = "Remove every queued mutation")]
    Clear {
        #[arg(short, long, help = "Skip confirmation")]
        yes: bool,
    },
}

#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum CacheSubcommand {
    #[command(about = "List cache partitions and entry counts")]
    Partitions,
    #[command(about = "Delete one partition, or all partitions owned by this app")]
    Clear {
        #[arg(help = "Partition name; omit to clear all owned partitions")]
        partition: Option<String>,
        #[arg(short, long, help = "Skip confirmation")]
        yes: bool,
    },
}

#[derive(Parser, Debug)]
pub struct EvictArgs {
    #[arg(long, help = "Maximum entity age in seconds (defaults to config)")]
    pub entities_max_age: Option<u64>,

    #[arg(long, help = "Maximum response age in seconds (defaults to config)")]
    pub responses_max_age: Option<u64>,
}

#[derive(Parser, Debug)]
pub struct SyncArgs {
    #[arg(long, default_value_t = 30, help = "Network timeout in seconds")]
    pub timeout: u64,
}

mod cache;
mod evict;
mod metrics;
mod queue;
mod status;
mod sync;

/// 未指定配置文件时使用的存储
pub const DEFAULT_STORE: &str = "sqlite:./oxsync.db";

/// 读取配置；没有配置文件时使用默认配置，但存储指向磁盘上的默认文件
fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(p) => Config::from_file(p)
            .with_context(|| format!("Failed to load config from {}", p.display())),
        None => {
            let mut config = Config::default();
            config.store.connection_string = DEFAULT_STORE.to_string();
            Ok(config)
        }
    }
}

fn load_context(path: Option<&PathBuf>) -> Result<ExecutionContext> {
    Ok(ExecutionContext::new(load_config(path)?))
}

/// 交互确认
fn confirm(prompt: &str) -> Result<bool> {
    use std::io::Write;
    print!("{} [y/N]: ", prompt);
    std::io::stdout().flush()?;
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    crate::telemetry::init_tracing("oxsync", cli.log.as_deref());

    let ctx = load_context(cli.config.as_ref())?;

    match &cli.command {
        Commands::Status(args) => status::execute(&ctx, args).await,
        Commands::Queue(args) => queue::execute(&ctx, args).await,
        Commands::Cache(args) => cache::execute(&ctx, args).await,
        Commands::Evict(args) => evict::execute(&ctx, args).await,
        Commands::Sync(args) => sync::execute(&ctx, args).await,
        Commands::Metrics => metrics::execute(&ctx).await,
    }
}
