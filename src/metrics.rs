use crate::errors::AppError;
use anyhow::Context;
use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a router exposing `/metrics`.
///
/// Must be called once, before any counter or histogram is touched.
pub fn setup_metrics() -> Result<Router, AppError> {
    let handle: PrometheusHandle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    let router = Router::new().route(
        "/metrics",
        get(move || {
            let body = handle.render();
            async move { body }
        }),
    );
    Ok(router)
}
