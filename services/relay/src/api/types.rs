//! API 请求/响应类型。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 过期 challenge 保留多久以便轮询方看到 `expired`（秒）。
pub(crate) const EXPIRED_RETENTION_SEC: i64 = 600;
/// 已完成登录会话保留时长（秒）。
pub(crate) const COMPLETED_RETENTION_SEC: i64 = 3600;

/// 签发登录挑战请求；未指定的项使用服务配置。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChallengeIssueRequest {
    #[serde(default)]
    pub(crate) fields: Option<Vec<String>>,
    #[serde(rename = "type", default)]
    pub(crate) request_type: Option<String>,
    #[serde(default)]
    pub(crate) action: Option<String>,
    #[serde(default)]
    pub(crate) short: Option<bool>,
}

/// 签发结果。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChallengeIssueData {
    /// 供展示/二维码的登录链接。
    pub(crate) request_url: String,
    pub(crate) challenge: String,
    /// 链接校验码，扫码端可比对。
    pub(crate) checksum: String,
    /// 过期时间（unix 秒）。
    pub(crate) expires_at: i64,
}

/// 登录成功后建立的会话。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginSession {
    pub(crate) session_id: String,
    pub(crate) challenge: String,
    /// 登录方地址。
    pub(crate) address: String,
    pub(crate) fields: BTreeMap<String, Value>,
    /// 第三方证明过的字段值。
    pub(crate) verified_fields: BTreeMap<String, Value>,
    /// 登录时间（RFC3339）。
    pub(crate) logged_in_at: String,
}

/// challenge 当前状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ChallengeStatus {
    Pending,
    Completed,
    Expired,
    Unknown,
}

/// 轮询返回数据。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChallengeStatusData {
    pub(crate) status: ChallengeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) session: Option<LoginSession>,
}
