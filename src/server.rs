use axum::routing::{get, post};
use axum::{middleware, Router};
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::ApiError;
use crate::handlers::{
    analyze, demo_analyze, health_check, metrics_snapshot, readiness_check, AppState, SharedState,
};
use crate::middleware::{general_rate_limit, logging_middleware};
use crate::quota::{InMemorySubscriptionStore, InMemoryUsageLedger};
use crate::store::{CounterStore, InMemoryCounterStore, RedisCounterStore};

pub struct Server {
    app: Router,
    state: SharedState,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self, ApiError> {
        config.validate()?;
        let state = build_state(config).await;
        let app = create_app(state.clone());
        Ok(Self { app, state })
    }

    pub async fn run(self) -> Result<(), ApiError> {
        let bind_addr = self.state.config.bind_addr;
        spawn_sweeper(self.state.clone());

        let listener = tokio::net::TcpListener::bind(bind_addr)
            .await
            .map_err(|e| {
                ApiError::InternalServerError(format!("failed to bind {}: {}", bind_addr, e))
            })?;

        info!("errwarden server starting on {}", bind_addr);
        info!("Analysis endpoint at /api/analyze, demo at /api/demo/analyze");
        info!("Health check available at /health");

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ApiError::InternalServerError(format!("server error: {}", e)))?;

        Ok(())
    }
}

/// Build the router with the middleware stack. The analysis routes sit
/// behind the general IP throttle; health, readiness and metrics do not.
pub fn create_app(state: SharedState) -> Router {
    let api = Router::new()
        .route("/api/analyze", post(analyze))
        .route("/api/demo/analyze", post(demo_analyze))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            general_rate_limit,
        ));

    Router::new()
        .merge(api)
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_snapshot))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

async fn build_state(config: Config) -> SharedState {
    let store: Arc<dyn CounterStore> = match &config.redis_url {
        Some(url) => match RedisCounterStore::new(url).await {
            Ok(store) => {
                info!("Connected to Redis counter store");
                Arc::new(store)
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable, falling back to in-memory counters");
                Arc::new(InMemoryCounterStore::new())
            }
        },
        None => {
            info!("REDIS_URL not set, using in-memory counters");
            Arc::new(InMemoryCounterStore::new())
        }
    };

    if !config.providers.any_configured() {
        warn!("No provider API keys configured; every analysis will use the pattern table");
    }

    let subscriptions = Arc::new(InMemorySubscriptionStore::new());
    let ledger = Arc::new(InMemoryUsageLedger::new());

    Arc::new(AppState::new(config, store, subscriptions, ledger))
}

/// Periodically drop expired demo tracking entries and lapsed blocks
fn spawn_sweeper(state: SharedState) {
    let interval = state.config.sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; skip it
        ticker.tick().await;
        loop {
            ticker.tick().await;
            state.abuse_guard.sweep().await;
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
