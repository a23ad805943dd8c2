//! HTTP surface of the session coordinator.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use coordinator_engine::Coordinator;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod error;

pub mod service {
    pub mod audit_service;
    pub mod health_service;
    pub mod keygen_service;
    pub mod relay;
    pub mod signing_service;
}

use service::{audit_service, health_service, keygen_service, relay, signing_service};

/// Shared by every handler; one coordinator per process.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/keygen/initiate", post(keygen_service::initiate))
        .route("/keygen/:session_id/join", post(keygen_service::join))
        .route(
            "/keygen/:session_id/messages",
            post(relay::submit_keygen).get(relay::retrieve_keygen),
        )
        .route("/keygen/:session_id/status", get(keygen_service::status))
        .route("/sign/initiate", post(signing_service::initiate))
        .route("/sign/:session_id/join", post(signing_service::join))
        .route("/sign/:session_id/broadcast", post(signing_service::stage))
        .route("/sign/:session_id/transaction", get(signing_service::transaction))
        .route(
            "/sign/:session_id/messages",
            post(relay::submit_signing).get(relay::retrieve_signing),
        )
        .route("/sign/:session_id/status", get(signing_service::status))
        .route("/sign/:session_id/finalize", post(signing_service::finalize))
        .route("/health", get(health_service::check))
        .route("/audit", get(audit_service::recent))
        .with_state(AppState { coordinator })
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    coordinator: Arc<Coordinator>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = router(coordinator);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}

pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Periodically drop idle sessions until `cancel` fires. Does nothing without a TTL.
pub fn spawn_sweeper(
    coordinator: Arc<Coordinator>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(ttl) = coordinator.session_ttl() else {
            return;
        };
        let interval = if interval.is_zero() {
            warn!(min_secs = MIN_SWEEP_INTERVAL.as_secs(), "zero sweep interval; using the minimum");
            MIN_SWEEP_INTERVAL
        } else {
            interval
        };
        info!(ttl_secs = ttl.as_secs(), interval_secs = interval.as_secs(), "session sweeper started");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => match coordinator.sweep_expired() {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "expired sessions swept"),
                    Err(e) => warn!(error = %e, "session sweep failed"),
                },
            }
        }
    })
}
