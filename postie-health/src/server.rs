//! Health check HTTP server

use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use postie_common::{Signal, internal};
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;

use crate::{HealthChecker, HealthConfig, HealthError};

/// Serves `/health/live` and `/health/ready`.
pub struct HealthServer {
    listener: TcpListener,
    router: Router,
}

impl HealthServer {
    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn new(
        config: HealthConfig,
        health_checker: Arc<HealthChecker>,
    ) -> Result<Self, HealthError> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|e| HealthError::Bind {
                address: config.listen_address.clone(),
                source: e,
            })?;

        internal!(
            level = INFO,
            address = %config.listen_address,
            "Serving health probes"
        );

        Ok(Self {
            listener,
            router: router(health_checker),
        })
    }

    /// Run until a shutdown signal is received.
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), HealthError> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                // Any signal, or the sender going away, ends probing.
                let _ = shutdown.recv().await;
            })
            .await
            .map_err(|e| HealthError::Serve(e.to_string()))?;

        internal!(level = DEBUG, "Health probes stopped");
        Ok(())
    }
}

fn router(health_checker: Arc<HealthChecker>) -> Router {
    Router::new()
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .with_state(health_checker)
        // Probes must answer within a second
        .layer(TimeoutLayer::new(Duration::from_secs(1)))
}

async fn live(State(checker): State<Arc<HealthChecker>>) -> Response {
    let code = if checker.is_alive() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, code.canonical_reason().unwrap_or_default()).into_response()
}

/// Always answers with the JSON status so operators can see why a pod is
/// held out of rotation.
async fn ready(State(checker): State<Arc<HealthChecker>>) -> Response {
    let status = checker.get_status();
    if status.ready {
        return (StatusCode::OK, Json(status)).into_response();
    }

    tracing::debug!(
        broker_ready = status.broker_ready,
        consumer_ready = status.consumer_ready,
        pending_retries = status.pending_retries,
        "Not ready"
    );
    (StatusCode::SERVICE_UNAVAILABLE, Json(status)).into_response()
}
