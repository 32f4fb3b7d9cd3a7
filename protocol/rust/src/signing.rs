//! 签名服务边界：
//! 1. `MessageSigner` 由持钥方持有，私钥只在实现内部可见。
//! 2. `SignatureVerifier` 只依赖 (消息, 地址, 签名)，任何内部异常都折叠为 `false`。
//! 3. 默认实现为 Ed25519，地址为公钥的 URL-safe base64。

use std::fmt;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use tracing::debug;

use crate::error::{ProtocolError, Result};

/// 持钥签名方。
pub trait MessageSigner: fmt::Debug + Send + Sync {
    /// 签名方标识（地址）。
    fn address(&self) -> &str;

    /// 对消息签名，返回 URL 可安全传输的签名串。
    fn sign(&self, message: &[u8]) -> Result<String>;
}

/// 签名校验方。
pub trait SignatureVerifier: fmt::Debug + Send + Sync {
    /// 校验签名；格式错误、地址无效、验签失败都返回 false，不会 panic。
    fn verify(&self, message: &[u8], address: &str, signature: &str) -> bool;
}

/// 由私钥推导地址。
pub fn derive_address(key: &SigningKey) -> String {
    URL_SAFE_NO_PAD.encode(key.verifying_key().as_bytes())
}

/// Ed25519 签名方。
pub struct Ed25519Signer {
    key: SigningKey,
    address: String,
}

impl Ed25519Signer {
    /// 使用系统随机源生成新私钥。
    pub fn generate() -> Self {
        let mut seed = [0_u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    /// 从 32 字节种子构造。
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let key = SigningKey::from_bytes(&seed);
        let address = derive_address(&key);
        Self { key, address }
    }

    /// 从 base64url 编码的种子构造。
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(encoded.trim().as_bytes())
            .map_err(|err| ProtocolError::InvalidKey(format!("decode seed failed: {err}")))?;
        let seed: [u8; 32] = raw
            .try_into()
            .map_err(|_| ProtocolError::InvalidKey("seed must be 32 bytes".to_string()))?;
        Ok(Self::from_seed(seed))
    }

    /// 导出 base64url 种子，用于配置落盘。
    pub fn export_seed(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.key.to_bytes())
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl MessageSigner for Ed25519Signer {
    fn address(&self) -> &str {
        &self.address
    }

    fn sign(&self, message: &[u8]) -> Result<String> {
        let signature = self.key.sign(message);
        Ok(URL_SAFE_NO_PAD.encode(signature.to_bytes()))
    }
}

/// Ed25519 校验方。
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, message: &[u8], address: &str, signature: &str) -> bool {
        let Ok(pk_raw) = URL_SAFE_NO_PAD.decode(address.as_bytes()) else {
            debug!("verify rejected: address is not base64url");
            return false;
        };
        let Ok(pk_bytes) = <[u8; 32]>::try_from(pk_raw) else {
            debug!("verify rejected: address length invalid");
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&pk_bytes) else {
            debug!("verify rejected: address is not a valid public key");
            return false;
        };

        let Ok(sig_raw) = URL_SAFE_NO_PAD.decode(signature.as_bytes()) else {
            debug!("verify rejected: signature is not base64url");
            return false;
        };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(sig_raw) else {
            debug!("verify rejected: signature length invalid");
            return false;
        };

        verifying_key
            .verify(message, &Signature::from_bytes(&sig_bytes))
            .is_ok()
    }
}
