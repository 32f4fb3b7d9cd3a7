//! Relay 二进制入口：仅负责启动应用。

mod api;
mod app;
mod cli;
mod config;
mod logging;
mod login;
mod state;

#[tokio::main]
/// 启动 heimdal 依赖方登录服务。
async fn main() -> anyhow::Result<()> {
    let args = std::env::args().skip(1).collect::<Vec<String>>();
    match cli::dispatch(&args)? {
        cli::CliDispatch::Run => {}
        cli::CliDispatch::Exit => return Ok(()),
    }

    let _log_runtime = logging::init("heimdal-relay")?;
    let config = config::Config::from_env()?;
    app::run(config).await
}
