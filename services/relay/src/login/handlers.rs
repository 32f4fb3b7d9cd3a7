//! 登录接口处理：签发挑战、接收响应、轮询状态。

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, SecondsFormat};
use heimdal_protocol::{
    LoginRequest, ProtocolError, RequestDefaults, ResponseBody, checksum, now_unix,
};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    api::{
        error::ApiError,
        response::{ApiEnvelope, envelope, ok_response},
        types::{
            ChallengeIssueData, ChallengeIssueRequest, ChallengeStatus, ChallengeStatusData,
            LoginSession,
        },
    },
    state::{AppState, CompletedLogin, PendingChallenge},
};

/// 签发登录挑战。
pub(crate) async fn issue_challenge_handler(
    State(state): State<AppState>,
    Json(req): Json<ChallengeIssueRequest>,
) -> (StatusCode, Json<ApiEnvelope<ChallengeIssueData>>) {
    envelope(
        state.issue_challenge(&req, now_unix()).await,
        "登录挑战已签发",
        "请展示登录链接或二维码",
    )
}

/// 接收持钥端提交的登录响应。
pub(crate) async fn login_response_handler(
    State(state): State<AppState>,
    Json(body): Json<ResponseBody>,
) -> (StatusCode, Json<ApiEnvelope<LoginSession>>) {
    envelope(
        state.complete_login(body, now_unix()).await,
        "登录成功",
        "会话已建立",
    )
}

/// 查询 challenge 状态，供展示二维码的页面轮询。
pub(crate) async fn challenge_status_handler(
    State(state): State<AppState>,
    Path(challenge): Path<String>,
) -> (StatusCode, Json<ApiEnvelope<ChallengeStatusData>>) {
    let data = state.challenge_status(&challenge, now_unix()).await;
    ok_response(StatusCode::OK, "查询成功", "", Some(data))
}

/// 协议层构造错误映射为 API 错误。
fn protocol_error_to_api(err: ProtocolError) -> ApiError {
    match err {
        ProtocolError::InvalidArgument(message) => ApiError::new(
            StatusCode::BAD_REQUEST,
            "REQUEST_INVALID",
            message,
            "请检查请求参数",
        ),
        other => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "CHALLENGE_BUILD_FAILED",
            other.to_string(),
            "请稍后重试",
        ),
    }
}

impl AppState {
    /// 生成新请求并登记为待登录。
    pub(crate) async fn issue_challenge(
        &self,
        req: &ChallengeIssueRequest,
        now: i64,
    ) -> Result<ChallengeIssueData, ApiError> {
        let config = &self.config;
        // 持钥端只认协议默认值；自定义路径必须显式写进链接。
        let mut request = match config.signer.clone() {
            Some(signer) => LoginRequest::with_signer(RequestDefaults::default(), signer),
            None => LoginRequest::new(RequestDefaults::default()),
        };
        request
            .new_request(&config.authority)
            .map_err(protocol_error_to_api)?;
        request.set_action(&config.action);

        if let Some(request_type) = req.request_type.as_deref() {
            request.set_type(request_type.trim()).map_err(|err| {
                ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "REQUEST_TYPE_INVALID",
                    err.to_string(),
                    "type 仅支持 api/app/add/fetch",
                )
            })?;
        }
        if let Some(action) = req.action.as_deref().map(str::trim)
            && !action.is_empty()
        {
            request.set_action(action);
        }
        let fields = req.fields.as_ref().unwrap_or(&config.request_fields);
        request.add_fields(fields.iter().map(|field| field.trim()).filter(|field| !field.is_empty()));

        let short = req.short.unwrap_or(config.short_urls);
        let request_url = if request.address().is_some() {
            request.get_signed_request(short)
        } else {
            request.get_request(short)
        }
        .map_err(protocol_error_to_api)?;

        let challenge = request.challenge().unwrap_or_default().to_string();
        let ttl = i64::try_from(config.challenge_ttl_sec).unwrap_or(i64::MAX);
        let expires_at = now.saturating_add(ttl);

        self.prune(now).await;
        self.pending.write().await.insert(
            challenge.clone(),
            PendingChallenge {
                request,
                expires_at,
            },
        );
        info!("login challenge issued: challenge={challenge}, expiresAt={expires_at}");

        Ok(ChallengeIssueData {
            checksum: checksum(&request_url),
            request_url,
            challenge,
            expires_at,
        })
    }

    /// 校验登录响应；成功后消费 challenge 并建立会话。
    pub(crate) async fn complete_login(
        &self,
        body: ResponseBody,
        now: i64,
    ) -> Result<LoginSession, ApiError> {
        let challenge = body.challenge.clone();
        let mut pending = self.pending.write().await;
        let Some(entry) = pending.get(&challenge) else {
            return Err(ApiError::new(
                StatusCode::NOT_FOUND,
                "CHALLENGE_UNKNOWN",
                "登录挑战不存在或已使用",
                "请刷新二维码后重新扫码",
            ));
        };
        if entry.expires_at < now {
            return Err(ApiError::new(
                StatusCode::GONE,
                "CHALLENGE_EXPIRED",
                "登录挑战已过期",
                "请刷新二维码后重新扫码",
            ));
        }

        // 与持钥端相同，由链接 authority 推导签名 origin。
        let server_url = entry.request.server_url();
        let mut response = entry.request.new_response(&server_url, body, "");
        if !response.is_valid_at(now) {
            let reason = response
                .errors()
                .first()
                .map(ToString::to_string)
                .unwrap_or_else(|| "login response rejected".to_string());
            warn!("login response rejected: challenge={challenge}, reason={reason}");
            return Err(ApiError::new(
                StatusCode::UNAUTHORIZED,
                "LOGIN_INVALID",
                reason,
                "请重新扫码并确认设备时间准确",
            ));
        }

        let missing: Vec<String> = entry
            .request
            .required_fields()
            .into_iter()
            .filter(|name| response.field_value(name).is_none_or(Value::is_null))
            .map(ToString::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "LOGIN_FIELDS_MISSING",
                format!("missing required fields: {}", missing.join(", ")),
                "请在登录时提供全部必填字段",
            ));
        }
        pending.remove(&challenge);
        drop(pending);

        let verified_fields = response
            .attestation()
            .map(|attestation| {
                attestation
                    .attributes
                    .iter()
                    .map(|(name, attribute)| (name.clone(), attribute.value.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let session = LoginSession {
            session_id: format!("lgn_{}", Uuid::new_v4().simple()),
            challenge: challenge.clone(),
            address: response.address().to_string(),
            fields: response.fields().clone(),
            verified_fields,
            logged_in_at: DateTime::from_timestamp(now, 0)
                .map(|time| time.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_default(),
        };
        self.completed.write().await.insert(
            challenge.clone(),
            CompletedLogin {
                session: session.clone(),
                completed_at: now,
            },
        );
        info!(
            "login completed: challenge={challenge}, address={}, session={}",
            session.address, session.session_id
        );
        Ok(session)
    }

    /// 查询 challenge 状态。
    pub(crate) async fn challenge_status(&self, challenge: &str, now: i64) -> ChallengeStatusData {
        if let Some(done) = self.completed.read().await.get(challenge) {
            return ChallengeStatusData {
                status: ChallengeStatus::Completed,
                session: Some(done.session.clone()),
            };
        }
        let status = match self.pending.read().await.get(challenge) {
            Some(entry) if entry.expires_at < now => ChallengeStatus::Expired,
            Some(_) => ChallengeStatus::Pending,
            None => ChallengeStatus::Unknown,
        };
        ChallengeStatusData {
            status,
            session: None,
        }
    }
}
