//! 配置模块职责：
//! 1. 读取 relay 运行所需的环境变量并提供默认值。
//! 2. 校验依赖方公开地址（仅 http/https），推导登录链接 authority。
//! 3. 响应路径按请求显式写入链接，协议层默认值保持全协议一致。

use std::sync::Arc;

use anyhow::{Context, anyhow};
use heimdal_protocol::Ed25519Signer;
use url::Url;

/// 默认监听地址。
pub(crate) const DEFAULT_ADDR: &str = "0.0.0.0:18090";
/// 默认依赖方公开地址（开发态默认本机）。
pub(crate) const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:18090";
/// 默认响应提交路径。
pub(crate) const DEFAULT_ACTION: &str = "/loginViaQr";
/// 默认待登录 challenge 有效期（秒）。
pub(crate) const DEFAULT_CHALLENGE_TTL_SEC: u64 = 300;

/// Relay 运行时配置。
#[derive(Debug, Clone)]
pub(crate) struct Config {
    /// HTTP 监听地址。
    pub(crate) listen_addr: String,
    /// 依赖方公开 origin（无末尾 `/`），仅用于展示；签名消息固定使用 `https://<authority>`。
    pub(crate) server_url: String,
    /// 登录链接 authority（host[:port]）。
    pub(crate) authority: String,
    /// 接收登录响应的绝对路径。
    pub(crate) action: String,
    /// 默认请求字段，`*` 后缀为可选字段。
    pub(crate) request_fields: Vec<String>,
    /// challenge 有效期（秒）。
    pub(crate) challenge_ttl_sec: u64,
    /// 依赖方签名私钥（可选）。
    pub(crate) signer: Option<Arc<Ed25519Signer>>,
    /// 是否省略等于默认值的链接参数。
    pub(crate) short_urls: bool,
}

impl Config {
    /// 从进程环境变量构建配置。
    pub(crate) fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意键值来源构建配置；值会去掉首尾空白，空值视为未设置。
    pub(crate) fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let raw_server =
            read("HEIMDAL_SERVER_URL").unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        let (server_url, authority) = normalize_server_url(&raw_server)
            .with_context(|| format!("invalid HEIMDAL_SERVER_URL: {raw_server}"))?;

        let action = read("HEIMDAL_ACTION").unwrap_or_else(|| DEFAULT_ACTION.to_string());
        if !action.starts_with('/') {
            return Err(anyhow!("HEIMDAL_ACTION must be an absolute path, got {action}"));
        }
        if action == "/healthz"
            || action.starts_with("/v1/challenge")
            || action.contains(['{', '}', '*'])
        {
            return Err(anyhow!("HEIMDAL_ACTION conflicts with built-in routes: {action}"));
        }

        let signer = read("HEIMDAL_SIGNING_KEY")
            .map(|seed| Ed25519Signer::from_encoded(&seed))
            .transpose()
            .context("invalid HEIMDAL_SIGNING_KEY")?
            .map(Arc::new);

        Ok(Self {
            listen_addr: read("HEIMDAL_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            server_url,
            authority,
            action,
            request_fields: read("HEIMDAL_REQUEST_FIELDS")
                .map(|raw| csv_list(&raw))
                .unwrap_or_default(),
            challenge_ttl_sec: normalize_ttl_sec(
                read("HEIMDAL_CHALLENGE_TTL_SEC").and_then(|raw| raw.parse::<u64>().ok()),
            ),
            signer,
            short_urls: read("HEIMDAL_SHORT_URLS")
                .and_then(|raw| parse_bool(&raw))
                .unwrap_or(false),
        })
    }
}

/// 规范化公开地址：仅保留 scheme/host/port，返回 (origin, authority)。
fn normalize_server_url(raw: &str) -> anyhow::Result<(String, String)> {
    let parsed = Url::parse(raw).context("parse server url failed")?;
    let scheme = parsed.scheme().to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(anyhow!("server url must use http:// or https://"));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("server url missing host"))?
        .to_ascii_lowercase();
    let authority = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    };
    Ok((format!("{scheme}://{authority}"), authority))
}

/// 归一化 TTL（秒）。
pub(crate) fn normalize_ttl_sec(raw: Option<u64>) -> u64 {
    raw.unwrap_or(DEFAULT_CHALLENGE_TTL_SEC).clamp(30, 3600)
}

/// 逗号分隔列表，忽略空项。
fn csv_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// 解析常见 true/false 文本。
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use heimdal_protocol::{Ed25519Signer, MessageSigner};

    use super::{Config, DEFAULT_ADDR, normalize_ttl_sec};

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_env_is_empty() {
        let config = config_from(&[("HEIMDAL_ADDR", "   ")]).unwrap();
        assert_eq!(config.listen_addr, DEFAULT_ADDR);
        assert_eq!(config.server_url, "http://127.0.0.1:18090");
        assert_eq!(config.authority, "127.0.0.1:18090");
        assert_eq!(config.action, "/loginViaQr");
        assert_eq!(config.challenge_ttl_sec, 300);
        assert!(config.request_fields.is_empty());
        assert!(config.signer.is_none());
        assert!(!config.short_urls);
    }

    #[test]
    fn server_url_is_reduced_to_origin() {
        let config = config_from(&[
            ("HEIMDAL_SERVER_URL", "HTTPS://Demo.Heimdal.app/some/path?x=1"),
            ("HEIMDAL_REQUEST_FIELDS", "name, email*, ,"),
            ("HEIMDAL_SHORT_URLS", "yes"),
        ])
        .unwrap();
        assert_eq!(config.server_url, "https://demo.heimdal.app");
        assert_eq!(config.authority, "demo.heimdal.app");
        assert_eq!(config.request_fields, ["name", "email*"]);
        assert!(config.short_urls);
        assert_eq!(config.action, "/loginViaQr");
    }

    #[test]
    fn custom_action_is_kept_verbatim() {
        let config = config_from(&[("HEIMDAL_ACTION", " /auth/qr ")]).unwrap();
        assert_eq!(config.action, "/auth/qr");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(config_from(&[("HEIMDAL_SERVER_URL", "ftp://demo.heimdal.app")]).is_err());
        assert!(config_from(&[("HEIMDAL_ACTION", "loginViaQr")]).is_err());
        assert!(config_from(&[("HEIMDAL_ACTION", "/v1/challenge")]).is_err());
        assert!(config_from(&[("HEIMDAL_SIGNING_KEY", "short")]).is_err());
    }

    #[test]
    fn signing_key_is_loaded_from_seed() {
        let signer = Ed25519Signer::generate();
        let seed = signer.export_seed();
        let config = config_from(&[("HEIMDAL_SIGNING_KEY", seed.as_str())]).unwrap();
        assert_eq!(
            config.signer.as_ref().map(|loaded| loaded.address().to_string()),
            Some(signer.address().to_string())
        );
    }

    #[test]
    fn ttl_is_clamped_to_allowed_range() {
        assert_eq!(normalize_ttl_sec(Some(1)), 30);
        assert_eq!(normalize_ttl_sec(Some(6000)), 3600);
        assert_eq!(normalize_ttl_sec(None), 300);
    }
}
