use std::sync::Arc;

use axum::{
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use subtle::ConstantTimeEq;

use crate::{api::ApiError, config::AuthConfig};

/// Authenticated caller identity, available to handlers via request extensions.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub name: String,
}

pub async fn auth_middleware<B>(
    Extension(config): Extension<Arc<AuthConfig>>,
    mut req: Request<B>,
    next: Next<B>,
) -> Response {
    if !config.enabled {
        req.extensions_mut().insert(CallerIdentity {
            name: "anonymous".to_string(),
        });
        return next.run(req).await;
    }

    let api_key = req.headers()
        .get("X-API-Key")
        .or_else(|| req.headers().get(header::AUTHORIZATION))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.strip_prefix("Bearer ").unwrap_or(s));

    match api_key {
        Some(key) => {
            match config.api_keys.iter().find(|entry| {
                    entry.key.as_bytes().ct_eq(key.as_bytes()).into()
                }) {
                Some(entry) => {
                    tracing::debug!(caller = %entry.name, "Authenticated request");
                    req.extensions_mut().insert(CallerIdentity {
                        name: entry.name.clone(),
                    });
                    next.run(req).await
                }
                None => {
                    tracing::warn!("Invalid API key presented");
                    ApiError::unauthorized("Invalid API key").into_response()
                }
            }
        }
        None => {
            ApiError::unauthorized("Missing API key. Provide X-API-Key header or Authorization: Bearer <key>")
                .into_response()
        }
    }
}
