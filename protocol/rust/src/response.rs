//! 登录响应：
//! 1. 持钥端对 `serverUrl/challenge?time=..&f=..` 签名后回传响应体。
//! 2. 依赖方按固定顺序校验，失败原因累积到 `errors`，不抛错。
//! 3. 第三方证明（attestation）与主签名使用同一条消息，独立校验。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::DateTime;
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::{Map, Value};
use tracing::debug;

use crate::canonical::canonical_json;
use crate::error::{Result, ValidationFailure};
use crate::signing::{Ed25519Verifier, SignatureVerifier};
use crate::uri::encode_component;
use crate::{FRESHNESS_WINDOW_SEC, now_unix};

/// 签名时间。入站值可能不是整数，保留原值直到校验阶段。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Unix(i64),
    Raw(String),
    /// 小数、布尔等其它 JSON 值，校验时报 `Invalid time`。
    Other(Value),
}

impl Timestamp {
    /// 解析为秒级时间戳；超出可表示日期范围同样视为无效。
    pub fn as_unix(&self) -> Option<i64> {
        let secs = match self {
            Self::Unix(secs) => *secs,
            Self::Raw(raw) => raw.trim().parse::<i64>().ok()?,
            Self::Other(_) => return None,
        };
        DateTime::from_timestamp(secs, 0).map(|_| secs)
    }

    fn is_blank(&self) -> bool {
        match self {
            Self::Unix(secs) => *secs == 0,
            Self::Raw(raw) => raw.is_empty(),
            Self::Other(value) => value.is_null(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(secs) => write!(f, "{secs}"),
            Self::Raw(raw) => f.write_str(raw),
            Self::Other(value) => write!(f, "{value}"),
        }
    }
}

/// 经第三方证明的单个字段。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerifiedAttribute {
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub nonce: String,
}

/// 第三方证明块，线上 key 兼容旧名 `bap`。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attestation {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, VerifiedAttribute>,
}

/// 针对指定文本的附加签名。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayload {
    pub message: String,
    pub signature: String,
    pub address: String,
}

/// POST 到 `serverUrl + action` 的响应体。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    #[serde(default)]
    pub challenge: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<Timestamp>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(
        default,
        alias = "bap",
        deserialize_with = "attestation_block",
        skip_serializing_if = "Option::is_none"
    )]
    pub attestation: Option<Attestation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed: Option<SignedPayload>,
}

/// 空数组、空对象或未带签名的证明块按缺省处理。
fn attestation_block<'de, D>(deserializer: D) -> std::result::Result<Option<Attestation>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Object(map) = Value::deserialize(deserializer)? else {
        return Ok(None);
    };
    let attestation = Attestation::deserialize(Value::Object(map)).map_err(de::Error::custom)?;
    if attestation.address.is_empty() && attestation.signature.is_empty() {
        return Ok(None);
    }
    Ok(Some(attestation))
}

/// 登录响应状态机。
#[derive(Debug, Clone)]
pub struct LoginResponse {
    server_url: String,
    action: String,
    body: ResponseBody,
    freshness_window: i64,
    verifier: Arc<dyn SignatureVerifier>,
    errors: Vec<ValidationFailure>,
}

impl LoginResponse {
    /// `server_url` 末尾的 `/` 会被去掉；空 action 回落到 `default_action`。
    pub fn new(
        server_url: &str,
        body: ResponseBody,
        action: &str,
        default_action: &str,
    ) -> Self {
        let action = if action.is_empty() {
            default_action
        } else {
            action
        };
        Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            action: action.to_string(),
            body,
            freshness_window: FRESHNESS_WINDOW_SEC,
            verifier: Arc::new(Ed25519Verifier),
            errors: Vec::new(),
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// 覆盖默认 30 秒时效窗口。
    pub fn with_freshness_window(mut self, secs: i64) -> Self {
        self.freshness_window = secs.max(0);
        self
    }

    /// 被签名的规范消息（不含 attestation）。
    pub fn signing_message(&self) -> Result<String> {
        let fields: Map<String, Value> = self
            .body
            .fields
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let canonical = canonical_json(&Value::Object(fields))?;
        let time = self
            .body
            .time
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        Ok(format!(
            "{}/{}?time={}&f={}",
            self.server_url,
            self.body.challenge,
            time,
            encode_component(&canonical)
        ))
    }

    /// 以当前时间校验。
    pub fn is_valid(&mut self) -> bool {
        self.is_valid_at(now_unix())
    }

    /// 以给定时间校验；首个失败原因写入 `errors` 后立即返回。
    pub fn is_valid_at(&mut self, now: i64) -> bool {
        match self.check(now) {
            Ok(()) => true,
            Err(failure) => {
                debug!(
                    challenge = %self.body.challenge,
                    reason = %failure,
                    "login response rejected"
                );
                self.errors.push(failure);
                false
            }
        }
    }

    fn check(&self, now: i64) -> std::result::Result<(), ValidationFailure> {
        let body = &self.body;
        let time = match body.time.as_ref() {
            Some(time) if !time.is_blank() => time,
            _ => return Err(ValidationFailure::Incomplete),
        };
        if self.server_url.is_empty()
            || body.challenge.is_empty()
            || body.address.is_empty()
            || body.signature.is_empty()
        {
            return Err(ValidationFailure::Incomplete);
        }

        let signed_at = time.as_unix().ok_or(ValidationFailure::InvalidTime)?;
        if signed_at > now {
            return Err(ValidationFailure::FutureTime);
        }
        if signed_at.saturating_add(self.freshness_window) < now {
            return Err(ValidationFailure::Expired);
        }

        let message = self
            .signing_message()
            .map_err(|_| ValidationFailure::BadSignature)?;
        if !self
            .verifier
            .verify(message.as_bytes(), &body.address, &body.signature)
        {
            return Err(ValidationFailure::BadSignature);
        }

        match body.attestation.as_ref() {
            Some(attestation)
                if !self.verifier.verify(
                    message.as_bytes(),
                    &attestation.address,
                    &attestation.signature,
                ) =>
            {
                Err(ValidationFailure::BadAttestation)
            }
            _ => Ok(()),
        }
    }

    /// 生成 POST 请求体；缺少必填项时记录错误并返回 None。
    pub fn response_body(&mut self) -> Option<ResponseBody> {
        let body = &self.body;
        let has_time = body.time.as_ref().is_some_and(|time| !time.is_blank());
        if body.challenge.is_empty()
            || !has_time
            || body.address.is_empty()
            || body.signature.is_empty()
        {
            self.errors.push(ValidationFailure::MissingRequired);
            return None;
        }
        Some(self.body.clone())
    }

    pub fn response_url(&self) -> String {
        format!("{}{}", self.server_url, self.action)
    }

    pub fn set_signature(&mut self, address: impl Into<String>, signature: impl Into<String>) {
        self.body.address = address.into();
        self.body.signature = signature.into();
    }

    pub fn set_signed(&mut self, signed: SignedPayload) {
        self.body.signed = Some(signed);
    }

    pub fn set_attestation(&mut self, attestation: Attestation) {
        self.body.attestation = Some(attestation);
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn challenge(&self) -> &str {
        &self.body.challenge
    }

    pub fn time(&self) -> Option<&Timestamp> {
        self.body.time.as_ref()
    }

    pub fn address(&self) -> &str {
        &self.body.address
    }

    /// 签名方标识，等同 `address`。
    pub fn id(&self) -> &str {
        &self.body.address
    }

    pub fn signature(&self) -> &str {
        &self.body.signature
    }

    pub fn signed(&self) -> Option<&SignedPayload> {
        self.body.signed.as_ref()
    }

    pub fn attestation(&self) -> Option<&Attestation> {
        self.body.attestation.as_ref()
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.body.fields
    }

    pub fn field_value(&self, name: &str) -> Option<&Value> {
        self.body.fields.get(name)
    }

    pub fn set_field_value(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.body.fields.insert(name.into(), value.into());
    }

    pub fn verified_field(&self, name: &str) -> Option<&VerifiedAttribute> {
        self.body.attestation.as_ref()?.attributes.get(name)
    }

    pub fn verified_field_value(&self, name: &str) -> Option<&Value> {
        self.verified_field(name).map(|field| &field.value)
    }

    pub fn verified_field_nonce(&self, name: &str) -> Option<&str> {
        self.verified_field(name).map(|field| field.nonce.as_str())
    }

    /// 已累积的失败原因（按发生顺序）。
    pub fn errors(&self) -> &[ValidationFailure] {
        &self.errors
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::{Value, json};

    use super::{Attestation, LoginResponse, ResponseBody, Timestamp, VerifiedAttribute};
    use crate::error::ValidationFailure;
    use crate::signing::{Ed25519Signer, MessageSigner};

    const NOW: i64 = 1_700_000_000;
    const SERVER: &str = "https://demo.heimdal.app";

    fn fields() -> BTreeMap<String, Value> {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), json!("Satoshi"));
        fields.insert("age".to_string(), json!(42));
        fields
    }

    fn signed_response(signer: &Ed25519Signer, time: i64) -> LoginResponse {
        let body = ResponseBody {
            challenge: "test".to_string(),
            time: Some(Timestamp::Unix(time)),
            fields: fields(),
            ..ResponseBody::default()
        };
        let mut response = LoginResponse::new(SERVER, body, "", "/loginViaQr");
        let message = response.signing_message().unwrap();
        let signature = signer.sign(message.as_bytes()).unwrap();
        response.set_signature(signer.address(), signature);
        response
    }

    #[test]
    fn signing_message_uses_canonical_encoded_fields() {
        let body = ResponseBody {
            challenge: "test".to_string(),
            time: Some(Timestamp::Unix(NOW)),
            fields: fields(),
            ..ResponseBody::default()
        };
        let response = LoginResponse::new("https://demo.heimdal.app//", body, "", "/loginViaQr");
        assert_eq!(
            response.signing_message().unwrap(),
            "https://demo.heimdal.app/test?time=1700000000&f=%7B%22age%22%3A42%2C%22name%22%3A%22Satoshi%22%7D"
        );
        assert_eq!(response.response_url(), "https://demo.heimdal.app/loginViaQr");
    }

    #[test]
    fn fresh_signature_is_valid() {
        let signer = Ed25519Signer::generate();
        let mut response = signed_response(&signer, NOW - 5);
        assert!(response.is_valid_at(NOW));
        assert!(response.errors().is_empty());
    }

    #[test]
    fn stale_signature_expires() {
        let signer = Ed25519Signer::generate();
        let mut response = signed_response(&signer, NOW - 40);
        assert!(!response.is_valid_at(NOW));
        assert_eq!(response.errors(), &[ValidationFailure::Expired]);
        assert_eq!(response.errors()[0].to_string(), "Signature has expired");

        let mut widened = signed_response(&signer, NOW - 40).with_freshness_window(60);
        assert!(widened.is_valid_at(NOW));
    }

    #[test]
    fn future_time_is_rejected() {
        let signer = Ed25519Signer::generate();
        let mut response = signed_response(&signer, NOW + 5);
        assert!(!response.is_valid_at(NOW));
        assert_eq!(response.errors()[0].to_string(), "Time is in the future");
    }

    #[test]
    fn non_numeric_time_is_invalid() {
        let body: ResponseBody = serde_json::from_value(json!({
            "challenge": "test",
            "time": "yesterday",
            "address": "addr",
            "signature": "sig",
            "fields": {}
        }))
        .unwrap();
        let mut response = LoginResponse::new(SERVER, body, "", "/loginViaQr");
        assert!(!response.is_valid_at(NOW));
        assert_eq!(response.errors(), &[ValidationFailure::InvalidTime]);
    }

    #[test]
    fn fractional_or_boolean_time_is_invalid() {
        for time in [json!(1_700_000_000.5), json!(true)] {
            let body: ResponseBody = serde_json::from_value(json!({
                "challenge": "test",
                "time": time,
                "address": "addr",
                "signature": "sig",
                "fields": {}
            }))
            .unwrap();
            assert!(matches!(body.time, Some(Timestamp::Other(_))));
            let mut response = LoginResponse::new(SERVER, body, "", "/loginViaQr");
            assert!(!response.is_valid_at(NOW));
            assert_eq!(response.errors(), &[ValidationFailure::InvalidTime]);
        }
    }

    #[test]
    fn empty_bap_block_counts_as_absent() {
        let signer = Ed25519Signer::generate();
        let signed = signed_response(&signer, NOW - 1);
        let mut wire = serde_json::to_value(signed.body()).unwrap();

        for empty in [json!([]), json!({}), json!(null)] {
            wire["bap"] = empty;
            let body: ResponseBody = serde_json::from_value(wire.clone()).unwrap();
            assert_eq!(body.attestation, None);
            let mut response = LoginResponse::new(SERVER, body, "", "/loginViaQr");
            assert!(response.is_valid_at(NOW));
        }
    }

    #[test]
    fn missing_parts_are_reported_before_time_checks() {
        let mut response = LoginResponse::new(SERVER, ResponseBody::default(), "", "/loginViaQr");
        assert!(!response.is_valid_at(NOW));
        assert_eq!(response.errors()[0].to_string(), "Not all fields are filled in");

        assert!(response.response_body().is_none());
        assert_eq!(
            response.errors()[1].to_string(),
            "Missing one of the required fields"
        );
    }

    #[test]
    fn tampered_field_breaks_signature() {
        let signer = Ed25519Signer::generate();
        let mut response = signed_response(&signer, NOW - 1);
        response.set_field_value("name", "Hal");
        assert!(!response.is_valid_at(NOW));
        assert_eq!(response.errors(), &[ValidationFailure::BadSignature]);
    }

    #[test]
    fn attestation_is_verified_against_the_same_message() {
        let signer = Ed25519Signer::generate();
        let attestor = Ed25519Signer::generate();
        let mut response = signed_response(&signer, NOW - 1);
        let message = response.signing_message().unwrap();

        let mut attributes = BTreeMap::new();
        attributes.insert(
            "name".to_string(),
            VerifiedAttribute {
                value: json!("Satoshi"),
                nonce: "abc123".to_string(),
            },
        );
        response.set_attestation(Attestation {
            address: attestor.address().to_string(),
            signature: attestor.sign(message.as_bytes()).unwrap(),
            attributes,
        });
        assert!(response.is_valid_at(NOW));
        assert_eq!(response.verified_field_value("name"), Some(&json!("Satoshi")));
        assert_eq!(response.verified_field_nonce("name"), Some("abc123"));
        assert_eq!(response.verified_field("email"), None);

        let mut forged = response.clone();
        forged.set_attestation(Attestation {
            address: attestor.address().to_string(),
            signature: attestor.sign(b"something else").unwrap(),
            attributes: BTreeMap::new(),
        });
        assert!(!forged.is_valid_at(NOW));
        assert_eq!(forged.errors()[0].to_string(), "Could not verify BAP signature");
    }

    #[test]
    fn body_round_trips_wire_keys_and_accepts_bap_alias() {
        let signer = Ed25519Signer::generate();
        let mut response = signed_response(&signer, NOW);
        let body = response.response_body().unwrap();
        let wire = serde_json::to_value(&body).unwrap();
        assert_eq!(wire["challenge"], json!("test"));
        assert_eq!(wire["time"], json!(NOW));
        assert!(wire.get("attestation").is_none());

        let inbound: ResponseBody = serde_json::from_value(json!({
            "challenge": "test",
            "time": NOW,
            "address": "a",
            "signature": "s",
            "fields": {"name": "Satoshi"},
            "bap": {"address": "b", "signature": "t", "attributes": {}}
        }))
        .unwrap();
        assert_eq!(inbound.attestation.map(|att| att.address), Some("b".to_string()));
        assert_eq!(inbound.time, Some(Timestamp::Unix(NOW)));
    }
}
