//! 协议层错误：请求侧误用与入站 URL 结构错误直接返回 `Err`。

use thiserror::Error;

/// 请求构造/解析、规范序列化与签名阶段的错误。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// 参数不合法（空 authority、未知 type 等）。
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// 请求尚未初始化（缺少 authority 或 challenge）。
    #[error("Not initialized properly")]
    NotInitialized,
    /// 缺少 authority。
    #[error("Domain authority has not been set")]
    MissingAuthority,
    /// 缺少 challenge。
    #[error("Challenge key has not been set")]
    MissingChallenge,
    /// 未加载私钥，无法签名。
    #[error("No private key set for signing")]
    NoPrivateKey,
    /// URL 中含有允许字符集之外的字符。
    #[error("Illegal characters found in QR Code")]
    IllegalCharacters,
    /// scheme 不是期望的协议字面量。
    #[error("Not a valid protocol for {expected}")]
    InvalidProtocol { expected: String },
    /// 百分号编码无法解码为 UTF-8。
    #[error("invalid percent-encoding in `{0}`")]
    InvalidEncoding(String),
    /// 规范序列化遇到循环引用。
    #[error("Converting circular structure to JSON")]
    CyclicStructure,
    /// 私钥格式无效。
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
    /// 签名服务内部失败。
    #[error("signing failed: {0}")]
    Signing(String),
}

/// 协议层统一 Result。
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// 响应校验失败原因；只累积到 `LoginResponse::errors`，不作为 `Err` 返回。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("Not all fields are filled in")]
    Incomplete,
    #[error("Invalid time")]
    InvalidTime,
    #[error("Time is in the future")]
    FutureTime,
    #[error("Signature has expired")]
    Expired,
    #[error("Could not verify signature")]
    BadSignature,
    #[error("Could not verify BAP signature")]
    BadAttestation,
    /// 生成请求体时缺少必填项。
    #[error("Missing one of the required fields")]
    MissingRequired,
}
