use std::time::Instant;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};

// 错误响应体只有 `{code, kind, error}`，超过此长度不记录
const MAX_LOGGED_BODY: usize = 64 * 1024;

/// 记录失败请求
///
/// 4xx 只记录状态与耗时；5xx 额外带上响应体，其中包含错误码与提示信息。
pub async fn log_errors(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;
    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if status.is_client_error() {
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(%method, %path, %status, elapsed_ms, "Request rejected");
        } else {
            tracing::info!(%method, %path, %status, elapsed_ms, "Request rejected");
        }
        return response;
    }
    if !status.is_server_error() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_LOGGED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(%method, %path, %status, elapsed_ms, "Request failed, body unreadable: {}", e);
            parts.headers.remove(axum::http::header::CONTENT_LENGTH);
            return Response::from_parts(parts, Body::empty());
        }
    };

    tracing::error!(
        %method,
        %path,
        %status,
        elapsed_ms,
        body = %String::from_utf8_lossy(&bytes),
        "Request failed"
    );

    // 响应体已读出，重新装回
    Response::from_parts(parts, Body::from(bytes))
}
