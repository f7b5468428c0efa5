//! Pieces shared by the service binaries: graceful shutdown and the
//! Prometheus scrape endpoint.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use courier_metrics::gather_metrics;
use tracing::{info, warn};

/// Resolves on SIGTERM or Ctrl-C
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown..."),
                    _ = tokio::signal::ctrl_c() => info!("SIGINT received, initiating graceful shutdown..."),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler, listening for Ctrl-C only"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received, initiating graceful shutdown...");
}

pub async fn metrics_handler() -> Response {
    match gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to gather metrics: {}", e),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_handler_serves_text_format() {
        courier_metrics::RECLAIMED_ENTRIES_TOTAL.inc_by(0);
        let response = metrics_handler().await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; version=0.0.4; charset=utf-8"
        );
    }
}
