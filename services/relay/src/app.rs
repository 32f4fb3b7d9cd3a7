//! Relay 应用装配：路由、CORS 与监听。

use anyhow::Context;
use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::{
    config::Config,
    login::handlers::{challenge_status_handler, issue_challenge_handler, login_response_handler},
    state::AppState,
};

/// Relay 入口：启动 HTTP 路由。
pub(crate) async fn run(config: Config) -> anyhow::Result<()> {
    let addr = config.listen_addr.clone();
    let server_url = config.server_url.clone();
    let app = router(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("heimdal-relay listening on {addr}, public origin {server_url}");
    axum::serve(listener, app).await?;
    Ok(())
}

/// 组装路由；登录响应路径来自配置。
pub(crate) fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);
    let action = state.config.action.clone();

    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/challenge", post(issue_challenge_handler))
        .route("/v1/challenge/{challenge}", get(challenge_status_handler))
        .route(&action, post(login_response_handler))
        .layer(cors)
        .with_state(state)
}

/// 健康检查接口。
async fn healthz() -> &'static str {
    "ok"
}
