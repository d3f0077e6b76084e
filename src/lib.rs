use crate::cli::Cli;
use crate::config::{AppConfig, ConfigError, StoreConfig};
use crate::core::report::{file_line, EXIT_FATAL};
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub mod cli;
pub mod config;
pub mod core;
pub mod logging;
pub mod storage;

pub use crate::core::{SyncConfig, SyncEngine, SyncEvent, SyncRunSummary};

/// 合并配置、读取凭证并创建引擎，不发起任何网络请求
///
/// 凭证缺失时返回 `ConfigError::MissingVars`，列出全部缺失的变量。
pub fn prepare<F>(cli: &Cli, app_config: &AppConfig, lookup: F) -> anyhow::Result<(SyncEngine, StoreConfig)>
where
    F: Fn(&str) -> Option<String>,
{
    let mut options = app_config.sync.clone();
    cli.apply(&mut options);
    options.validate()?;

    let store_config = StoreConfig::from_lookup(lookup)?;
    let store = storage::create_store(&store_config, &options)?;
    let engine = SyncEngine::new(store, SyncConfig::from_options(&options, cli.dry_run));

    Ok((engine, store_config))
}

/// 执行一次完整的同步，返回进程退出码
pub async fn run(cli: Cli, app_config: AppConfig) -> i32 {
    let (engine, store_config) = match prepare(&cli, &app_config, |name| std::env::var(name).ok()) {
        Ok(prepared) => prepared,
        Err(e) => {
            if let Some(ConfigError::MissingVars(vars)) = e.downcast_ref::<ConfigError>() {
                error!("缺少必要的环境变量: {}", vars.join(", "));
            } else {
                error!("配置错误: {:#}", e);
            }
            eprintln!("错误: {:#}", e);
            return EXIT_FATAL;
        }
    };

    // Ctrl-C：停止派发新文件，等待进行中的文件完成
    let cancel = engine.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，等待进行中的文件完成...");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let (tx, mut rx) = mpsc::channel::<SyncEvent>(64);
    let dry_run = cli.dry_run;
    let quiet = cli.json;
    let printer_config = store_config.clone();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if quiet {
                continue;
            }
            match event {
                SyncEvent::Scanned { files, issues } => {
                    println!("发现 {} 个文件 ({} 个扫描错误)", files, issues);
                }
                SyncEvent::File(outcome) => {
                    let url = printer_config.public_url_for(&outcome.key);
                    if let Some(line) = file_line(&outcome, dry_run, url) {
                        println!("{}", line);
                    }
                }
            }
        }
    });

    info!("同步目标: {:?}", store_config);
    let result = engine.run(&cli.root, Some(tx)).await;
    let _ = printer.await;

    match result {
        Ok(summary) => {
            if cli.json {
                match serde_json::to_string_pretty(&summary) {
                    Ok(json) => println!("{}", json),
                    Err(e) => error!("序列化同步报告失败: {}", e),
                }
            } else {
                println!("{}", summary.render(store_config.public_url.as_deref()));
            }
            summary.exit_code(cli.allow_failures)
        }
        Err(e) => {
            error!("同步无法开始: {}", e);
            eprintln!("错误: {}", e);
            EXIT_FATAL
        }
    }
}
