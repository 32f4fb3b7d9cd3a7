//! 登录模块：challenge 签发、响应校验与会话登记。

pub(crate) mod handlers;
