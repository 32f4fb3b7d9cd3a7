//! 随机串生成（系统随机源）。

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;

/// 默认 challenge 长度。
pub const CHALLENGE_LENGTH: usize = 32;

/// 生成恰好 `length` 个 URL-safe 字符（`[A-Za-z0-9_-]`）。
pub fn secret(length: usize) -> String {
    let mut bytes = vec![0_u8; length];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let mut encoded = URL_SAFE_NO_PAD.encode(bytes);
    encoded.truncate(length);
    encoded
}

/// 生成 `length` 个小写十六进制字符。
pub fn hex_string(length: usize) -> String {
    let mut bytes = vec![0_u8; length.div_ceil(2)];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        use std::fmt::Write;
        let _ = write!(&mut out, "{byte:02x}");
    }
    out.truncate(length);
    out
}
