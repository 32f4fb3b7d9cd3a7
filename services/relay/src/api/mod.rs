//! HTTP API 公共结构：错误、统一响应包裹、请求/响应类型。

pub(crate) mod error;
pub(crate) mod response;
pub(crate) mod types;
