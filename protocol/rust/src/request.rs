//! 登录请求（挑战链接）状态机：
//! 1. 依赖方 `new_request` 生成随机 challenge，输出 `heimdal://authority/challenge?..` 链接。
//! 2. 持钥端 `from_url` 解析链接，可校验依赖方签名，并据此构造登录响应。
//! 3. 签名消息中的字段列表总是升序，保证签名与字段插入顺序无关。
//!
//! 状态：`Empty` -> `Built`（new_request / from_url）-> `Signed`（附带签名）。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::random::{CHALLENGE_LENGTH, secret};
use crate::response::{LoginResponse, ResponseBody, SignedPayload, Timestamp};
use crate::signing::{Ed25519Verifier, MessageSigner, SignatureVerifier};
use crate::uri::{decode_component, encode_component, is_uri_safe, parse_uri, push_param};
use crate::{PROTOCOL, now_unix};

/// 可选字段后缀标记。
pub const OPTIONAL_MARKER: char = '*';

/// 请求意图类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestType {
    /// 网页端，响应 POST 到 `serverUrl + action`。
    #[default]
    Api,
    /// 原生应用，action 为 intent 名称。
    App,
    /// 单字段赋值。
    Add,
    Fetch,
}

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::App => "app",
            Self::Add => "add",
            Self::Fetch => "fetch",
        }
    }
}

impl FromStr for RequestType {
    type Err = ProtocolError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "api" => Ok(Self::Api),
            "app" => Ok(Self::App),
            "add" => Ok(Self::Add),
            "fetch" => Ok(Self::Fetch),
            other => Err(ProtocolError::InvalidArgument(format!(
                "request type `{other}` is not allowed"
            ))),
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 构造请求时注入的默认值。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDefaults {
    // 链接 scheme。
    pub protocol: String,
    // 缺省请求类型。
    pub default_type: RequestType,
    // 缺省响应路径。
    pub default_action: String,
    // 生成 server url 时使用的 scheme。
    pub server_scheme: String,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL.to_string(),
            default_type: RequestType::Api,
            default_action: "/loginViaQr".to_string(),
            server_scheme: "https".to_string(),
        }
    }
}

/// 对外暴露的请求阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Empty,
    Built,
    Signed,
}

/// 响应时需要额外签名的内容。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignData {
    Message(String),
}

/// 请求锚点：authority 与 challenge 同时存在才可派生消息。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Anchor {
    source: String,
    protocol: String,
    authority: String,
    host: String,
    port: String,
    challenge: String,
}

/// 链接上携带的签名归属。
#[derive(Debug, Clone, PartialEq, Eq)]
struct Attribution {
    signature: String,
    id: String,
}

#[derive(Debug, Clone, Default)]
enum Stage {
    #[default]
    Empty,
    Built(Anchor),
    Signed(Anchor, Attribution),
}

impl Stage {
    fn anchor(&self) -> Option<&Anchor> {
        match self {
            Self::Empty => None,
            Self::Built(anchor) | Self::Signed(anchor, _) => Some(anchor),
        }
    }

    fn attribution(&self) -> Option<&Attribution> {
        match self {
            Self::Signed(_, attribution) => Some(attribution),
            _ => None,
        }
    }
}

/// 登录请求。签名私钥只在 `signer` 内部，不参与序列化与 Debug 输出。
#[derive(Debug, Clone)]
pub struct LoginRequest {
    defaults: RequestDefaults,
    signer: Option<Arc<dyn MessageSigner>>,
    verifier: Arc<dyn SignatureVerifier>,
    stage: Stage,
    request_type: String,
    action: String,
    fields: Vec<String>,
    value: Option<String>,
    extension: String,
    sign_data: Option<SignData>,
    parameters: BTreeMap<String, String>,
    checksum: Option<String>,
}

impl Default for LoginRequest {
    fn default() -> Self {
        Self::new(RequestDefaults::default())
    }
}

impl LoginRequest {
    pub fn new(defaults: RequestDefaults) -> Self {
        Self {
            request_type: defaults.default_type.as_str().to_string(),
            action: defaults.default_action.clone(),
            defaults,
            signer: None,
            verifier: Arc::new(Ed25519Verifier),
            stage: Stage::Empty,
            fields: Vec::new(),
            value: None,
            extension: String::new(),
            sign_data: None,
            parameters: BTreeMap::new(),
            checksum: None,
        }
    }

    /// 带签名方构造。
    pub fn with_signer(defaults: RequestDefaults, signer: Arc<dyn MessageSigner>) -> Self {
        let mut request = Self::new(defaults);
        request.signer = Some(signer);
        request
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// 设置或替换签名方。
    pub fn set_signer(&mut self, signer: Arc<dyn MessageSigner>) {
        self.signer = Some(signer);
    }

    /// 已加载签名方的地址。
    pub fn address(&self) -> Option<&str> {
        self.signer.as_deref().map(|signer| signer.address())
    }

    fn reset(&mut self) {
        self.stage = Stage::Empty;
        self.request_type = self.defaults.default_type.as_str().to_string();
        self.action = self.defaults.default_action.clone();
        self.fields.clear();
        self.value = None;
        self.extension.clear();
        self.sign_data = None;
        self.parameters.clear();
        self.checksum = None;
    }

    /// 签名覆盖的内容变化后，已有签名作废，回到 Built。
    fn drop_attribution(&mut self) {
        self.stage = match std::mem::take(&mut self.stage) {
            Stage::Signed(anchor, _) => Stage::Built(anchor),
            other => other,
        };
    }

    /// 开始新请求：去掉 http(s) 前缀与末尾 `/`，生成随机 challenge，其余状态复位。
    pub fn new_request(&mut self, authority: &str) -> Result<()> {
        let trimmed = authority.trim();
        let stripped = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .unwrap_or(trimmed);
        let stripped = stripped.strip_suffix('/').unwrap_or(stripped);
        if stripped.is_empty() {
            return Err(ProtocolError::InvalidArgument(
                "authority is mandatory".to_string(),
            ));
        }

        self.reset();
        let (host, port) = stripped.split_once(':').unwrap_or((stripped, ""));
        self.stage = Stage::Built(Anchor {
            source: String::new(),
            protocol: self.defaults.protocol.clone(),
            authority: stripped.to_string(),
            host: host.to_string(),
            port: port.to_string(),
            challenge: secret(CHALLENGE_LENGTH),
        });
        Ok(())
    }

    /// 使用预先生成的 challenge；要求请求已构造。
    pub fn set_challenge(&mut self, challenge: &str) -> Result<()> {
        let anchor = match std::mem::take(&mut self.stage) {
            Stage::Empty => return Err(ProtocolError::NotInitialized),
            Stage::Built(anchor) | Stage::Signed(anchor, _) => anchor,
        };
        self.stage = Stage::Built(Anchor {
            challenge: challenge.to_string(),
            ..anchor
        });
        Ok(())
    }

    pub fn set_type(&mut self, request_type: &str) -> Result<()> {
        let parsed = request_type.parse::<RequestType>()?;
        self.request_type = parsed.as_str().to_string();
        self.drop_attribution();
        Ok(())
    }

    /// web 端为以 `/` 开头的绝对路径，原生端为 intent 名称。
    pub fn set_action(&mut self, action: &str) {
        self.action = action.to_string();
        self.drop_attribution();
    }

    pub fn set_extension(&mut self, extension: &str) {
        self.extension = extension.to_string();
        self.drop_attribution();
    }

    pub fn add_field(&mut self, name: &str) {
        if !self.fields.iter().any(|field| field == name) {
            self.fields.push(name.to_string());
            self.drop_attribution();
        }
    }

    pub fn add_fields<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            self.add_field(name.as_ref());
        }
    }

    /// 整体替换字段列表。
    pub fn set_fields(&mut self, fields: Vec<String>) {
        self.fields = fields;
        self.drop_attribution();
    }

    /// 非数组输入视为空列表，非字符串元素跳过。
    pub fn set_fields_json(&mut self, fields: &Value) {
        self.fields = match fields {
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect(),
            _ => Vec::new(),
        };
        self.drop_attribution();
    }

    /// 单字段赋值：字段列表覆盖为 `[name]`，类型改为 add，清空 action。
    pub fn add_field_value(&mut self, name: &str, value: impl Into<String>) {
        self.fields = vec![name.to_string()];
        self.value = Some(value.into());
        self.request_type = RequestType::Add.as_str().to_string();
        self.action.clear();
        self.drop_attribution();
    }

    pub fn set_sign_data(&mut self, sign_data: SignData) {
        self.sign_data = Some(sign_data);
    }

    pub fn sign_data(&self) -> Option<&SignData> {
        self.sign_data.as_ref()
    }

    /// 生成请求链接；`short` 时省略等于默认值的 `t`/`a`。
    pub fn get_request(&self, short: bool) -> Result<String> {
        let anchor = self
            .stage
            .anchor()
            .filter(|anchor| !anchor.authority.is_empty() && !anchor.challenge.is_empty())
            .ok_or(ProtocolError::NotInitialized)?;

        let mut url = format!(
            "{}://{}/{}",
            anchor.protocol, anchor.authority, anchor.challenge
        );
        if !short || self.request_type != self.defaults.default_type.as_str() {
            push_param(&mut url, "t", &self.request_type);
        }
        if !short || self.action != self.defaults.default_action {
            push_param(&mut url, "a", &self.action);
        }
        if !self.fields.is_empty() {
            let encoded: Vec<String> = self
                .fields
                .iter()
                .map(|field| encode_component(field))
                .collect();
            push_param(&mut url, "f", &encoded.join(","));
        }
        if let Some(value) = self.value.as_deref().filter(|value| !value.is_empty()) {
            push_param(&mut url, "v", &encode_component(value));
        }
        Ok(url)
    }

    /// 被签名的规范消息；字段按编码后字符串升序排列。
    pub fn get_signing_message(&self) -> Result<String> {
        let anchor = self
            .stage
            .anchor()
            .filter(|anchor| !anchor.authority.is_empty())
            .ok_or(ProtocolError::MissingAuthority)?;
        if anchor.challenge.is_empty() {
            return Err(ProtocolError::MissingChallenge);
        }

        let mut fields: Vec<String> = self
            .fields
            .iter()
            .map(|field| encode_component(field))
            .collect();
        fields.sort();

        Ok(format!(
            "{}://{}/{}?t={}&a={}&f={}&v={}&x={}",
            anchor.protocol,
            anchor.authority,
            anchor.challenge,
            self.request_type(),
            self.action(),
            fields.join(","),
            self.value.as_deref().unwrap_or_default(),
            self.extension
        ))
    }

    /// 生成带签名的请求链接，追加 `sig` 与 `id`，并进入 Signed 阶段。
    pub fn get_signed_request(&mut self, short: bool) -> Result<String> {
        let signer = self.signer.clone().ok_or(ProtocolError::NoPrivateKey)?;
        let mut url = self.get_request(short)?;
        let message = self.get_signing_message()?;
        let signature = signer.sign(message.as_bytes())?;

        push_param(&mut url, "sig", &encode_component(&signature));
        push_param(&mut url, "id", signer.address());

        let anchor = match std::mem::take(&mut self.stage) {
            Stage::Empty => return Err(ProtocolError::NotInitialized),
            Stage::Built(anchor) | Stage::Signed(anchor, _) => anchor,
        };
        self.stage = Stage::Signed(
            anchor,
            Attribution {
                signature,
                id: signer.address().to_string(),
            },
        );
        Ok(url)
    }

    /// 从扫描到的链接重建请求。入站 type/action 按原样保留，不做合法性校验。
    pub fn from_url(&mut self, url: &str) -> Result<()> {
        if !is_uri_safe(url) {
            debug!("login url rejected: illegal characters");
            return Err(ProtocolError::IllegalCharacters);
        }

        let parsed = parse_uri(url);
        if parsed.scheme != self.defaults.protocol {
            debug!(scheme = %parsed.scheme, "login url rejected: unexpected scheme");
            return Err(ProtocolError::InvalidProtocol {
                expected: self.defaults.protocol.clone(),
            });
        }
        if parsed.authority.is_empty() {
            return Err(ProtocolError::MissingAuthority);
        }

        let value = parsed.param("v").map(decode_component).transpose()?;
        let signature = parsed
            .param("sig")
            .filter(|sig| !sig.is_empty())
            .map(decode_component)
            .transpose()?;
        let mut fields = match parsed.param("f").filter(|raw| !raw.is_empty()) {
            Some(raw) => raw
                .split(',')
                .map(decode_component)
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        fields.sort();

        self.reset();
        self.checksum = Some(checksum(url));
        self.request_type = parsed.param("t").unwrap_or_default().to_string();
        self.action = parsed.param("a").unwrap_or_default().to_string();
        self.value = value;
        self.fields = fields;

        let anchor = Anchor {
            challenge: parsed
                .path
                .strip_prefix('/')
                .unwrap_or(&parsed.path)
                .to_string(),
            source: parsed.source,
            protocol: parsed.scheme,
            authority: parsed.authority,
            host: parsed.host,
            port: parsed.port,
        };
        let id = parsed.params.get("id").cloned().unwrap_or_default();
        self.parameters = parsed.params;
        self.stage = match signature {
            Some(signature) => Stage::Signed(anchor, Attribution { signature, id }),
            None => Stage::Built(anchor),
        };
        Ok(())
    }

    /// 结构合法且（如已签名）签名可验证时返回 true。未签名请求只做结构检查。
    pub fn verify_request(&self) -> bool {
        let Some(anchor) = self.stage.anchor() else {
            return false;
        };
        if anchor.protocol != self.defaults.protocol || anchor.authority.is_empty() {
            return false;
        }
        let Some(attribution) = self.stage.attribution() else {
            return true;
        };
        match self.get_signing_message() {
            Ok(message) => {
                self.verifier
                    .verify(message.as_bytes(), &attribution.id, &attribution.signature)
            }
            Err(err) => {
                debug!(error = %err, "request verification skipped");
                false
            }
        }
    }

    /// 以当前时间构造响应。
    pub fn create_response(&self, fields: BTreeMap<String, Value>) -> Result<LoginResponse> {
        self.create_response_at(fields, now_unix())
    }

    /// 构造绑定本请求 challenge 的响应；加载签名方时立即签名。
    pub fn create_response_at(
        &self,
        fields: BTreeMap<String, Value>,
        time: i64,
    ) -> Result<LoginResponse> {
        let anchor = self.stage.anchor().ok_or(ProtocolError::NotInitialized)?;
        let body = ResponseBody {
            challenge: anchor.challenge.clone(),
            time: Some(Timestamp::Unix(time)),
            fields,
            ..ResponseBody::default()
        };
        let mut response = LoginResponse::new(
            &self.server_url(),
            body,
            &self.action,
            &self.defaults.default_action,
        )
        .with_verifier(Arc::clone(&self.verifier));

        if let Some(signer) = self.signer.as_deref() {
            let message = response.signing_message()?;
            let signature = signer.sign(message.as_bytes())?;
            response.set_signature(signer.address(), signature);

            if let Some(SignData::Message(text)) = self.sign_data.as_ref() {
                response.set_signed(SignedPayload {
                    message: text.clone(),
                    signature: signer.sign(text.as_bytes())?,
                    address: signer.address().to_string(),
                });
            }
        }
        Ok(response)
    }

    /// 包装入站响应体；action 为空时依次回落到请求 action 与默认值。
    pub fn new_response(&self, server_url: &str, body: ResponseBody, action: &str) -> LoginResponse {
        let action = if action.is_empty() {
            self.action.as_str()
        } else {
            action
        };
        LoginResponse::new(server_url, body, action, &self.defaults.default_action)
            .with_verifier(Arc::clone(&self.verifier))
    }

    pub fn stage(&self) -> RequestStage {
        match self.stage {
            Stage::Empty => RequestStage::Empty,
            Stage::Built(_) => RequestStage::Built,
            Stage::Signed(..) => RequestStage::Signed,
        }
    }

    pub fn defaults(&self) -> &RequestDefaults {
        &self.defaults
    }

    pub fn challenge(&self) -> Option<&str> {
        self.stage.anchor().map(|anchor| anchor.challenge.as_str())
    }

    pub fn authority(&self) -> &str {
        self.stage
            .anchor()
            .map(|anchor| anchor.authority.as_str())
            .unwrap_or_default()
    }

    pub fn host(&self) -> &str {
        self.stage
            .anchor()
            .map(|anchor| anchor.host.as_str())
            .unwrap_or_default()
    }

    pub fn port(&self) -> &str {
        self.stage
            .anchor()
            .map(|anchor| anchor.port.as_str())
            .unwrap_or_default()
    }

    /// 解析来源的原始链接。
    pub fn source(&self) -> &str {
        self.stage
            .anchor()
            .map(|anchor| anchor.source.as_str())
            .unwrap_or_default()
    }

    pub fn server_url(&self) -> String {
        format!("{}://{}", self.defaults.server_scheme, self.authority())
    }

    /// 为空时回落到默认值。
    pub fn request_type(&self) -> &str {
        if self.request_type.is_empty() {
            self.defaults.default_type.as_str()
        } else {
            &self.request_type
        }
    }

    /// 为空时回落到默认值。
    pub fn action(&self) -> &str {
        if self.action.is_empty() {
            &self.defaults.default_action
        } else {
            &self.action
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.stage
            .attribution()
            .map(|attribution| attribution.id.as_str())
            .filter(|id| !id.is_empty())
    }

    pub fn signature(&self) -> Option<&str> {
        self.stage
            .attribution()
            .map(|attribution| attribution.signature.as_str())
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// 去掉可选标记后的字段名。
    pub fn clean_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|field| field.replacen(OPTIONAL_MARKER, "", 1))
            .collect()
    }

    pub fn required_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|field| !field.ends_with(OPTIONAL_MARKER))
            .map(String::as_str)
            .collect()
    }

    /// 可选字段（已去掉标记）。
    pub fn optional_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter_map(|field| field.strip_suffix(OPTIONAL_MARKER))
            .collect()
    }

    /// 原始 query 参数（值未解码）。
    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    /// `from_url` 记录的链接校验码。
    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }
}

/// 使用默认配置解析链接。
pub fn request_from_url(url: &str) -> Result<LoginRequest> {
    let mut request = LoginRequest::default();
    request.from_url(url)?;
    Ok(request)
}

/// 链接校验码 `XXXX-XXXX`，供扫码双方肉眼比对。
pub fn checksum(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let encoded = URL_SAFE_NO_PAD.encode(digest);
    let tail = &encoded[encoded.len() - 8..];
    format!("{}-{}", &tail[..4], &tail[4..])
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use serde_json::{Value, json};

    use super::{
        LoginRequest, RequestDefaults, RequestStage, SignData, checksum, request_from_url,
    };
    use crate::error::ProtocolError;
    use crate::signing::{Ed25519Signer, MessageSigner};

    const NOW: i64 = 1_700_000_000;

    fn demo_request() -> LoginRequest {
        let mut request = LoginRequest::default();
        request.new_request("demo.example/").unwrap();
        request.set_challenge("test").unwrap();
        request
    }

    fn signing_request() -> (LoginRequest, Arc<Ed25519Signer>) {
        let signer = Arc::new(Ed25519Signer::generate());
        let mut request = LoginRequest::with_signer(RequestDefaults::default(), signer.clone());
        request.new_request("https://demo.heimdal.app").unwrap();
        (request, signer)
    }

    #[test]
    fn request_url_includes_defaults_unless_short() {
        let request = demo_request();
        assert_eq!(
            request.get_request(false).unwrap(),
            "heimdal://demo.example/test?t=api&a=/loginViaQr"
        );
        assert_eq!(request.get_request(true).unwrap(), "heimdal://demo.example/test");
    }

    #[test]
    fn new_request_normalizes_authority_and_generates_challenge() {
        let mut request = LoginRequest::default();
        assert_eq!(request.stage(), RequestStage::Empty);
        request.new_request("http://demo.heimdal.app:3306/").unwrap();

        assert_eq!(request.stage(), RequestStage::Built);
        assert_eq!(request.authority(), "demo.heimdal.app:3306");
        assert_eq!(request.host(), "demo.heimdal.app");
        assert_eq!(request.port(), "3306");
        assert_eq!(request.server_url(), "https://demo.heimdal.app:3306");
        assert_eq!(request.challenge().map(str::len), Some(32));

        assert!(matches!(
            request.new_request(""),
            Err(ProtocolError::InvalidArgument(_))
        ));
    }

    #[test]
    fn uninitialized_request_cannot_build_messages() {
        let mut request = LoginRequest::default();
        assert_eq!(request.get_request(false), Err(ProtocolError::NotInitialized));
        assert_eq!(
            request.get_signing_message(),
            Err(ProtocolError::MissingAuthority)
        );
        assert_eq!(request.set_challenge("x"), Err(ProtocolError::NotInitialized));

        request.new_request("demo.example").unwrap();
        request.set_challenge("").unwrap();
        assert_eq!(
            request.get_signing_message(),
            Err(ProtocolError::MissingChallenge)
        );
        assert_eq!(request.get_request(true), Err(ProtocolError::NotInitialized));
    }

    #[test]
    fn set_type_rejects_unknown_types() {
        let mut request = demo_request();
        request.set_type("app").unwrap();
        assert_eq!(request.request_type(), "app");
        assert!(matches!(
            request.set_type("unknown"),
            Err(ProtocolError::InvalidArgument(_))
        ));
        assert_eq!(request.request_type(), "app");
    }

    #[test]
    fn fields_dedupe_and_sort_in_signing_message() {
        let mut request = demo_request();
        request.add_fields(["name", "email", "#employeeId"]);
        request.add_field("name");
        assert_eq!(request.fields(), ["name", "email", "#employeeId"]);
        assert_eq!(
            request.get_request(true).unwrap(),
            "heimdal://demo.example/test?f=name,email,%23employeeId"
        );
        assert_eq!(
            request.get_signing_message().unwrap(),
            "heimdal://demo.example/test?t=api&a=/loginViaQr&f=%23employeeId,email,name&v=&x="
        );

        let mut reordered = demo_request();
        reordered.add_fields(["#employeeId", "name", "email"]);
        assert_eq!(
            reordered.get_signing_message().unwrap(),
            request.get_signing_message().unwrap()
        );
    }

    #[test]
    fn set_fields_json_coerces_non_arrays() {
        let mut request = demo_request();
        request.set_fields_json(&json!(["name", 5, "email*"]));
        assert_eq!(request.fields(), ["name", "email*"]);
        assert_eq!(request.clean_fields(), ["name", "email"]);
        assert_eq!(request.required_fields(), ["name"]);
        assert_eq!(request.optional_fields(), ["email"]);

        request.set_fields_json(&json!({"name": true}));
        assert!(request.fields().is_empty());
    }

    #[test]
    fn add_field_value_switches_to_add_type() {
        let mut request = demo_request();
        request.add_fields(["name", "email"]);
        request.add_field_value("currency", "¥");

        assert_eq!(request.fields(), ["currency"]);
        assert_eq!(
            request.get_request(false).unwrap(),
            "heimdal://demo.example/test?t=add&a=&f=currency&v=%C2%A5"
        );
        assert_eq!(request.action(), "/loginViaQr");
    }

    #[test]
    fn parsed_url_reproduces_request() {
        let mut request = demo_request();
        request.set_action("/api/v1/loginViaQr");
        request.add_fields(["name", "email", "#employeeId"]);
        let url = request.get_request(false).unwrap();

        let parsed = request_from_url(&url).unwrap();
        assert_eq!(parsed.authority(), "demo.example");
        assert_eq!(parsed.challenge(), Some("test"));
        assert_eq!(parsed.request_type(), "api");
        assert_eq!(parsed.action(), "/api/v1/loginViaQr");
        assert_eq!(parsed.fields(), ["#employeeId", "email", "name"]);
        assert_eq!(parsed.value(), None);
        assert_eq!(parsed.source(), url);
        assert_eq!(parsed.checksum(), Some(checksum(&url).as_str()));
        assert_eq!(parsed.stage(), RequestStage::Built);
        assert!(parsed.verify_request());
    }

    #[test]
    fn inbound_type_is_kept_verbatim() {
        let parsed = request_from_url("heimdal://demo.example/test?t=bogus&v=%C2%A5").unwrap();
        assert_eq!(parsed.request_type(), "bogus");
        assert_eq!(parsed.value(), Some("¥"));
        assert_eq!(parsed.action(), "/loginViaQr");
    }

    #[test]
    fn from_url_rejects_malformed_input() {
        assert_eq!(
            request_from_url("heimdal://demo.example/test?t=¥pi").err(),
            Some(ProtocolError::IllegalCharacters)
        );
        assert_eq!(
            request_from_url("test://demo.example/test?t=api").err(),
            Some(ProtocolError::InvalidProtocol {
                expected: "heimdal".to_string()
            })
        );
        assert_eq!(
            request_from_url("heimdal:/demo.example/test").err(),
            Some(ProtocolError::MissingAuthority)
        );
    }

    #[test]
    fn signed_request_round_trips_and_detects_tampering() {
        let (mut request, signer) = signing_request();
        request.add_fields(["name", "email"]);
        let url = request.get_signed_request(true).unwrap();
        assert_eq!(request.stage(), RequestStage::Signed);
        assert!(url.contains("&id="));

        let parsed = request_from_url(&url).unwrap();
        assert_eq!(parsed.stage(), RequestStage::Signed);
        assert_eq!(parsed.id(), Some(signer.address()));
        assert!(parsed.verify_request());

        let signature = parsed.signature().unwrap().to_string();
        let first = signature.chars().next().unwrap();
        let replacement = if first == 'A' { 'B' } else { 'A' };
        let tampered_sig = format!("{replacement}{}", &signature[1..]);
        let tampered_url = url.replacen(&signature, &tampered_sig, 1);
        let tampered = request_from_url(&tampered_url).unwrap();
        assert!(!tampered.verify_request());
    }

    #[test]
    fn mutating_a_signed_request_drops_its_signature() {
        let (mut request, _) = signing_request();
        request.add_field("name");
        request.get_signed_request(false).unwrap();
        assert!(request.verify_request());

        request.add_field("name");
        assert_eq!(request.stage(), RequestStage::Signed);

        request.add_field("email");
        assert_eq!(request.stage(), RequestStage::Built);
        assert_eq!(request.signature(), None);
        assert!(request.verify_request());

        request.get_signed_request(false).unwrap();
        request.set_action("/auth/qr");
        assert_eq!(request.stage(), RequestStage::Built);

        request.get_signed_request(false).unwrap();
        request.add_field_value("currency", "EUR");
        assert_eq!(request.stage(), RequestStage::Built);
        assert_eq!(request.id(), None);
    }

    #[test]
    fn signed_request_without_key_fails() {
        let mut request = demo_request();
        assert_eq!(
            request.get_signed_request(false),
            Err(ProtocolError::NoPrivateKey)
        );
    }

    #[test]
    fn created_response_validates_on_relying_party() {
        let (relying_party, _) = signing_request();
        let url = relying_party.get_request(false).unwrap();

        let holder_key = Arc::new(Ed25519Signer::generate());
        let mut holder = LoginRequest::with_signer(RequestDefaults::default(), holder_key.clone());
        holder.from_url(&url).unwrap();
        holder.set_sign_data(SignData::Message("hello".to_string()));

        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), Value::from("Satoshi"));
        let mut created = holder.create_response_at(fields, NOW - 5).unwrap();
        assert_eq!(created.address(), holder_key.address());
        assert_eq!(created.response_url(), "https://demo.heimdal.app/loginViaQr");
        assert_eq!(created.signed().map(|signed| signed.message.as_str()), Some("hello"));

        let body = created.response_body().unwrap();
        let mut received = relying_party.new_response(&relying_party.server_url(), body, "");
        assert!(received.is_valid_at(NOW));
        assert_eq!(received.field_value("name"), Some(&Value::from("Satoshi")));
    }

    #[test]
    fn unsigned_holder_creates_unsigned_response() {
        let request = demo_request();
        let mut response = request.create_response_at(BTreeMap::new(), NOW).unwrap();
        assert_eq!(response.address(), "");
        assert!(response.response_body().is_none());

        assert!(
            LoginRequest::default()
                .create_response_at(BTreeMap::new(), NOW)
                .is_err()
        );
    }

    #[test]
    fn checksum_is_stable_and_formatted() {
        let code = checksum("heimdal://demo.example/test");
        assert_eq!(code.len(), 9);
        assert_eq!(code.as_bytes()[4], b'-');
        assert_eq!(code, checksum("heimdal://demo.example/test"));
        assert_ne!(code, checksum("heimdal://demo.example/test2"));
    }
}
