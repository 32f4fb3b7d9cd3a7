//! URI 编解码：
//! 1. 宽松解析自定义 scheme 登录链接（scheme/authority/host/port/path/query）。
//! 2. query 参数扁平化为 key -> 原始值（不解码，首次出现优先）。
//! 3. 提供与 `encodeURIComponent` 等价的百分号编码与解码。

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

use crate::error::{ProtocolError, Result};

/// 组件编码保留字符：字母数字与 `-_.!~*'()` 不编码。
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// 解析后的 URI 结构。缺失的可选部分为空串，不视为错误。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedUri {
    /// 原始输入。
    pub source: String,
    pub scheme: String,
    /// `[userinfo@]host[:port]`。
    pub authority: String,
    pub user_info: String,
    pub host: String,
    pub port: String,
    pub path: String,
    /// `?` 之后、`#` 之前的原始 query。
    pub query: String,
    pub fragment: String,
    /// query 参数（值未解码）。
    pub params: BTreeMap<String, String>,
}

impl ParsedUri {
    /// 读取 query 参数原始值。
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// 宽松解析 URI，不会失败。
pub fn parse_uri(input: &str) -> ParsedUri {
    let mut rest = input;
    let mut parsed = ParsedUri {
        source: input.to_string(),
        ..ParsedUri::default()
    };

    if let Some(idx) = rest.find(':') {
        let candidate = &rest[..idx];
        if !candidate.is_empty() && !candidate.contains(['/', '?', '#', '.', '@']) {
            parsed.scheme = candidate.to_string();
            rest = &rest[idx + 1..];
        }
    }

    rest = rest.strip_prefix("//").unwrap_or(rest);
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    parsed.authority = rest[..authority_end].to_string();
    rest = &rest[authority_end..];

    let host_port = match parsed.authority.rsplit_once('@') {
        Some((user_info, host_port)) => {
            parsed.user_info = user_info.to_string();
            host_port.to_string()
        }
        None => parsed.authority.clone(),
    };
    match host_port.split_once(':') {
        Some((host, port)) => {
            parsed.host = host.to_string();
            parsed.port = port.to_string();
        }
        None => parsed.host = host_port,
    }

    if let Some((before, fragment)) = rest.split_once('#') {
        parsed.fragment = fragment.to_string();
        rest = before;
    }
    match rest.split_once('?') {
        Some((path, query)) => {
            parsed.path = path.to_string();
            parsed.query = query.to_string();
        }
        None => parsed.path = rest.to_string(),
    }

    parsed.params = parse_query(&parsed.query);
    parsed
}

/// 拆分 query 串；空 key 跳过，重复 key 保留首次出现的值。
pub fn parse_query(query: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key.is_empty() {
            continue;
        }
        params
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }
    params
}

/// 判断字符是否属于登录链接允许的字符集（含百分号转义）。
fn is_allowed_uri_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ";,/?:@&=+$-_.!~*'()%".contains(ch)
}

/// 整条 URL 仅包含允许字符时返回 true；空串视为不合法。
pub fn is_uri_safe(url: &str) -> bool {
    !url.is_empty() && url.chars().all(is_allowed_uri_char)
}

/// 等价于 `encodeURIComponent` 的组件编码。
pub fn encode_component(raw: &str) -> String {
    utf8_percent_encode(raw, COMPONENT).to_string()
}

/// 组件解码；非法 UTF-8 序列返回 `InvalidEncoding`。
pub fn decode_component(raw: &str) -> Result<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| ProtocolError::InvalidEncoding(raw.to_string()))
}

/// 以 `?`/`&` 追加一个 query 参数。
pub(crate) fn push_param(url: &mut String, key: &str, value: &str) {
    url.push(if url.contains('?') { '&' } else { '?' });
    url.push_str(key);
    url.push('=');
    url.push_str(value);
}
