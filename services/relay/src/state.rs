//! Relay 状态：待登录 challenge 与已完成会话（内存）。

use std::{collections::HashMap, sync::Arc};

use heimdal_protocol::LoginRequest;
use tokio::sync::RwLock;

use crate::{
    api::types::{COMPLETED_RETENTION_SEC, EXPIRED_RETENTION_SEC, LoginSession},
    config::Config,
};

/// Relay 共享状态。
#[derive(Clone)]
pub(crate) struct AppState {
    /// 运行配置。
    pub(crate) config: Arc<Config>,
    /// 待登录 challenge（key 为 challenge）。
    pub(crate) pending: Arc<RwLock<HashMap<String, PendingChallenge>>>,
    /// 已完成登录（key 为 challenge）。
    pub(crate) completed: Arc<RwLock<HashMap<String, CompletedLogin>>>,
}

/// 已签发、等待响应的请求。
pub(crate) struct PendingChallenge {
    pub(crate) request: LoginRequest,
    pub(crate) expires_at: i64,
}

/// 已消费的 challenge 与对应会话。
pub(crate) struct CompletedLogin {
    pub(crate) session: LoginSession,
    pub(crate) completed_at: i64,
}

impl AppState {
    pub(crate) fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            pending: Arc::new(RwLock::new(HashMap::new())),
            completed: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 清理超过保留期的记录。
    pub(crate) async fn prune(&self, now: i64) {
        self.pending
            .write()
            .await
            .retain(|_, entry| entry.expires_at.saturating_add(EXPIRED_RETENTION_SEC) >= now);
        self.completed
            .write()
            .await
            .retain(|_, entry| entry.completed_at.saturating_add(COMPLETED_RETENTION_SEC) >= now);
    }
}
