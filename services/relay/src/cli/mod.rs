//! relay CLI 分发：`run`、`inspect`、`version`、`help`。

use anyhow::{Context, anyhow};
use heimdal_protocol::request_from_url;
use serde_json::{Value, json};

/// CLI 分发结果。
pub(crate) enum CliDispatch {
    /// 继续进入 relay 主循环。
    Run,
    /// 命令已处理完成，主程序应退出。
    Exit,
}

/// 解析并执行 relay CLI。
pub(crate) fn dispatch(args: &[String]) -> anyhow::Result<CliDispatch> {
    if args.is_empty() {
        return Ok(CliDispatch::Run);
    }

    let cmd = args[0].trim();
    if cmd.is_empty() || cmd == "run" {
        return Ok(CliDispatch::Run);
    }

    if matches!(cmd, "-h" | "--help" | "help") {
        print_root_help();
        return Ok(CliDispatch::Exit);
    }

    match cmd {
        "inspect" => {
            let url = args
                .get(1)
                .ok_or_else(|| anyhow!("usage: heimdal-relay inspect <login-url>"))?;
            let report = inspect_url(url)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string())
            );
            Ok(CliDispatch::Exit)
        }
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(CliDispatch::Exit)
        }
        other => Err(anyhow!(
            "unknown command: {other}; run `heimdal-relay --help` for usage"
        )),
    }
}

/// 解析登录链接，输出字段、校验码与签名结论。
fn inspect_url(url: &str) -> anyhow::Result<Value> {
    let request = request_from_url(url.trim()).context("parse login url failed")?;
    Ok(json!({
        "authority": request.authority(),
        "host": request.host(),
        "port": request.port(),
        "challenge": request.challenge(),
        "type": request.request_type(),
        "action": request.action(),
        "fields": request.fields(),
        "requiredFields": request.required_fields(),
        "optionalFields": request.optional_fields(),
        "value": request.value(),
        "checksum": request.checksum(),
        "signed": request.signature().is_some(),
        "id": request.id(),
        "valid": request.verify_request(),
    }))
}

/// 打印 root help。
fn print_root_help() {
    println!("heimdal-relay usage:");
    println!("  heimdal-relay run");
    println!("  heimdal-relay inspect <login-url>");
    println!("  heimdal-relay version");
}
