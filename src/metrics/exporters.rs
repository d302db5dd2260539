use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::{info, warn};

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the global Prometheus recorder. Safe to call more than once.
pub fn install_prometheus() -> Result<&'static PrometheusHandle, String> {
    PROMETHEUS.get_or_try_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))?;
        info!("Prometheus metrics recorder installed");
        Ok(handle)
    })
}

/// `GET /metrics`: Prometheus text exposition.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS.get() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => {
            warn!("Metrics requested but no recorder is installed");
            (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response()
        }
    }
}
