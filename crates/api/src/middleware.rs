use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::Response,
};
use serde_json::Value;

use crate::app::errors::json_error;
use crate::context::{AppContext, ParsedBody};

/// Buffer the request body (up to `limit` bytes) and attach it as
/// [`ParsedBody`].
///
/// The raw bytes are put back on the request so later extractors still see
/// them.
pub async fn body_parser(State(limit): State<usize>, req: Request, next: Next) -> Response {
    let (parts, body) = req.into_parts();

    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return json_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                format!("request body exceeds {limit} bytes"),
            );
        }
    };

    let parsed = match parse_body(&parts.headers, &bytes) {
        Ok(value) => value,
        Err(response) => return response,
    };

    let mut req = Request::from_parts(parts, Body::from(bytes));
    req.extensions_mut().insert(ParsedBody(parsed));
    next.run(req).await
}

/// Attach the [`AppContext`] to every request.
pub async fn inject_context(
    State(ctx): State<AppContext>,
    mut req: Request,
    next: Next,
) -> Response {
    req.extensions_mut().insert(ctx);
    next.run(req).await
}

fn parse_body(headers: &HeaderMap, bytes: &Bytes) -> Result<Value, Response> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.contains("json") {
        return serde_json::from_slice(bytes)
            .map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_json", e.to_string()));
    }

    if content_type.starts_with("text/") {
        return String::from_utf8(bytes.to_vec())
            .map(Value::String)
            .map_err(|_| {
                json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_text",
                    "text body is not valid UTF-8",
                )
            });
    }

    Ok(Value::Null)
}
