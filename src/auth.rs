use crate::config::ApiConfig;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct AuthState {
    pub config: ApiConfig,
}

/// Validates an API key from `x-api-key` or `Authorization: Bearer` on every
/// request except CORS preflight, when `enable_auth` is set.
pub async fn auth_middleware(
    State(auth_state): State<Arc<AuthState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    let method = request.method().clone();
    let path = request.uri().path();
    let client_ip = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    tracing::debug!(
        "Auth middleware processing request to: {} from IP: {}",
        path,
        client_ip
    );

    // CORS preflight requests need to succeed to enable browser CORS.
    if method == Method::OPTIONS {
        tracing::debug!("Bypassing auth for CORS preflight request to: {}", path);
        return Ok(next.run(request).await);
    }

    if !auth_state.config.enable_auth {
        return Ok(next.run(request).await);
    }

    let provided_key = if let Some(header_value) = headers.get("x-api-key") {
        // Direct API key header
        header_value.to_str().map_err(|_| {
            warn!(
                "Malformed x-api-key header from IP: {} for path: {}",
                client_ip, path
            );
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Unauthorized"})),
            )
                .into_response()
        })?
    } else if let Some(header_value) = headers.get("authorization") {
        // Authorization header - must start with "Bearer "
        let auth_str = header_value.to_str().map_err(|_| {
            warn!(
                "Malformed authorization header from IP: {} for path: {}",
                client_ip, path
            );
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Unauthorized"})),
            )
                .into_response()
        })?;

        if let Some(token) = auth_str.strip_prefix("Bearer ") {
            token
        } else {
            warn!(
                "Invalid authorization header format from IP: {} for path: {}",
                client_ip, path
            );
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Unauthorized"})),
            )
                .into_response());
        }
    } else {
        warn!("Missing API key in request to: {}", path);
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Unauthorized"})),
        )
            .into_response());
    };

    match &auth_state.config.api_key {
        Some(expected_key) => {
            use subtle::ConstantTimeEq;
            if provided_key
                .as_bytes()
                .ct_eq(expected_key.as_bytes())
                .into()
            {
                tracing::debug!(
                    "Authentication successful for path: {} from IP: {}",
                    path,
                    client_ip
                );
                Ok(next.run(request).await)
            } else {
                warn!(
                    "Authentication failed for path: {} from IP: {} (invalid key)",
                    path, client_ip
                );
                Err((
                    StatusCode::UNAUTHORIZED,
                    Json(json!({"error": "Unauthorized"})),
                )
                    .into_response())
            }
        }
        None => {
            warn!("API authentication enabled but no API key configured");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Internal Server Error"})),
            )
                .into_response())
        }
    }
}

pub fn create_auth_state(config: ApiConfig) -> Arc<AuthState> {
    Arc::new(AuthState { config })
}
