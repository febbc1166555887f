use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use tracing::info;
use uuid::Uuid;

use crate::handlers::SharedState;
use crate::metrics::AdmissionOutcome;
use crate::response::RejectionBody;

/// Client address resolved once per request and stashed in the request
/// extensions for the admission layers.
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

/// Logging middleware for request/response tracking. Also resolves the
/// client IP so downstream layers agree on one identity.
pub async fn logging_middleware(mut request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = resolve_client_ip(&request);
    request.extensions_mut().insert(ClientIp(client_ip.clone()));

    info!(
        target: "errwarden::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let response = next.run(request).await;

    let status = response.status();
    info!(
        target: "errwarden::middleware",
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %status,
        "Request completed"
    );

    response
}

/// Fixed-window throttle over the analysis routes, keyed by client IP.
pub async fn general_rate_limit(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let identity = request
        .extensions()
        .get::<ClientIp>()
        .map(|ip| ip.0.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let decision = state
        .rate_limiter
        .check(&state.general_policy, &identity)
        .await;

    if !decision.allowed {
        state
            .metrics
            .record_admission(AdmissionOutcome::RateLimited)
            .await;
        let mut response = RejectionBody::rate_limited(&decision).into_response();
        let headers = response.headers_mut();
        headers.insert(
            "X-RateLimit-Limit",
            decision.limit.to_string().parse().unwrap(),
        );
        headers.insert("X-RateLimit-Remaining", "0".parse().unwrap());
        headers.insert(
            "X-RateLimit-Reset",
            decision.reset_at.to_string().parse().unwrap(),
        );
        return response;
    }

    next.run(request).await
}

fn resolve_client_ip(request: &Request) -> String {
    // Proxy headers first, then the connection itself
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                let trimmed = first_ip.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.to_string();
        }
    }

    if let Some(addr) = request.extensions().get::<SocketAddr>() {
        addr.ip().to_string()
    } else {
        "unknown".to_string()
    }
}
