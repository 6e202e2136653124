//! Raw authenticated request handler.

use serde_json::Value;

use homedash_core::ApiRequest;

use crate::cli::{HttpMethod, RequestArgs};
use crate::error::CliError;
use crate::output;

use super::{Context, util};

fn build_request(args: &RequestArgs) -> Result<ApiRequest, CliError> {
    let path = if args.path.starts_with('/') {
        args.path.clone()
    } else {
        format!("/{}", args.path)
    };

    let request = match args.method {
        HttpMethod::Get => ApiRequest::get(path),
        HttpMethod::Post => ApiRequest::post(path),
        HttpMethod::Put => ApiRequest::put(path),
        HttpMethod::Patch => ApiRequest::patch(path),
        HttpMethod::Delete => ApiRequest::delete(path),
    };

    let body = match (&args.data, &args.from_file) {
        (Some(data), _) => Some(serde_json::from_str::<Value>(data)?),
        (None, Some(file)) => Some(util::read_json_file(file)?),
        (None, None) => None,
    };

    Ok(match body {
        Some(body) => request.with_json(body),
        None => request,
    })
}

fn plain(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(plain).collect::<Vec<_>>().join("\n"),
        other => other.to_string(),
    }
}

pub async fn handle(ctx: &Context<'_>, args: RequestArgs) -> Result<(), CliError> {
    let request = build_request(&args)?;
    let body = ctx.dashboard.request(request).await?;

    let out = output::render_single(
        &ctx.global.output,
        &body,
        |v| {
            if v.is_null() {
                String::new()
            } else {
                output::render_json_pretty(v)
            }
        },
        plain,
    );
    output::print_output(&out, ctx.global.quiet);
    Ok(())
}
