//! Prometheus endpoint.
//!
//! `/metrics` renders the recorder in text format, `/health` answers
//! liveness probes.

use axum::{Extension, Router, routing::get};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{MetricsError, PrometheusInitSnafu};

/// Buckets of every `*_duration_seconds` histogram. Batches run on trigger
/// intervals of seconds to minutes.
const DURATION_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

fn builder() -> Result<PrometheusBuilder, MetricsError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .context(PrometheusInitSnafu)
}

/// Install the global recorder and serve it on `addr` in the background.
pub fn init(addr: SocketAddr) -> Result<(), MetricsError> {
    let handle = builder()?.install_recorder().context(PrometheusInitSnafu)?;
    tokio::spawn(serve(addr, handle));
    Ok(())
}

fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(Extension(handle))
}

async fn serve(addr: SocketAddr, handle: PrometheusHandle) {
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "Failed to bind metrics endpoint");
            return;
        }
    };

    info!("Metrics endpoint listening on http://{}/metrics", addr);
    if let Err(e) = axum::serve(listener, router(handle)).await {
        error!(error = %e, "Metrics endpoint stopped");
    }
}

async fn metrics_handler(Extension(handle): Extension<PrometheusHandle>) -> String {
    handle.render()
}

async fn health_handler() -> &'static str {
    "ok\n"
}
