use assetsync_lib::cli::Cli;
use assetsync_lib::config::AppConfig;
use assetsync_lib::core::report::EXIT_FATAL;
use assetsync_lib::logging::init_logging;
use clap::Parser;

#[tokio::main]
async fn main() {
    // .env 可选，环境变量优先
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let app_config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("错误: {}", e);
            std::process::exit(EXIT_FATAL);
        }
    };

    init_logging(&app_config.log, cli.log_dir.as_deref(), cli.verbose);

    let code = assetsync_lib::run(cli, app_config).await;
    std::process::exit(code);
}
