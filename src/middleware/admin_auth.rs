// src/middleware/admin_auth.rs

use crate::{error::AppError, state::AppState};
use axum::{
    body::Body,
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{debug, warn};

/// Constant-time string comparison to prevent timing attacks
fn secure_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }
    result == 0
}

fn bearer_token(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Require `Authorization: Bearer <admin_token>`. Without a configured token
/// every admin request is rejected.
pub async fn admin_auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.admin_token() else {
        warn!("Admin authentication failed: no admin token configured");
        return Err(AppError::Unauthorized);
    };

    match bearer_token(&req) {
        Some(token) if secure_compare(token, expected.expose_secret()) => {
            debug!("Admin authentication successful");
            Ok(next.run(req).await)
        }
        _ => {
            warn!("Admin authentication failed: invalid or missing token");
            Err(AppError::Unauthorized)
        }
    }
}
