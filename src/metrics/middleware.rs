use axum::{extract::MatchedPath, extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::debug;

/// Count requests and record their duration, labelled by route template so
/// ids in paths do not explode label cardinality.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());

    let response = next.run(req).await;
    let status = response.status();
    let elapsed = start.elapsed();

    super::record_request(method.as_str(), path.clone(), status.as_u16(), elapsed);
    debug!(
        http.method = %method,
        url.path = %path,
        http.status_code = status.as_u16(),
        http.response.duration = ?elapsed,
        "metrics_middleware: request handled"
    );

    response
}
