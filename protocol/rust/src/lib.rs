// 文件职责：
// 1) 定义 heimdal 挑战链接登录协议：请求链接的构造/解析/签名，响应的构造/校验。
// 2) 提供规范 JSON 序列化，保证签名消息与字段插入顺序无关。
// 3) 作为 Rust 侧协议唯一代码源，供 relay 服务与持钥端复用。

pub mod canonical;
pub mod error;
pub mod random;
pub mod request;
pub mod response;
pub mod signing;
pub mod uri;

use chrono::Utc;

pub use canonical::{CanonicalSerializer, Node, canonical_json};
pub use error::{ProtocolError, Result, ValidationFailure};
pub use request::{
    LoginRequest, RequestDefaults, RequestStage, RequestType, SignData, checksum,
    request_from_url,
};
pub use response::{
    Attestation, LoginResponse, ResponseBody, SignedPayload, Timestamp, VerifiedAttribute,
};
pub use signing::{Ed25519Signer, Ed25519Verifier, MessageSigner, SignatureVerifier};

/// 协议字面量（URL scheme）。
pub const PROTOCOL: &str = "heimdal";

/// 响应签名时间允许的最大滞后秒数。
pub const FRESHNESS_WINDOW_SEC: i64 = 30;

/// 当前 UTC 秒级时间戳。
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}
