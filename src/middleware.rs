use axum::{extract::Request, middleware::Next, response::Response};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;

/// Logs each management request with its caller and latency.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client = client_addr(&request);
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        target: "turnstile::management",
        method = %method,
        uri = %uri,
        client = %client,
        status = %response.status(),
        latency_ms = started.elapsed().as_millis() as u64,
        "management request"
    );

    response
}

fn client_addr(request: &Request) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                return first.trim().to_string();
            }
        }
    }

    if let Some(addr) = request.extensions().get::<SocketAddr>() {
        return addr.to_string();
    }

    "unknown".to_string()
}
