//! Request authentication + authorization helpers.
//!
//! Every handler calls [`authenticate`] then [`authorize`] with its
//! operation name; the permission matrix is default-deny, so an operation
//! missing from the table can never be reached with any token.

use axum::http::HeaderMap;

use oms_auth::UserContext;
use oms_schemas::ErrorKind;

use crate::api_types::ApiError;
use crate::state::AppState;

/// Extract and validate the bearer token.
///
/// With no JWKS configured, the daemon refuses authenticated routes
/// unless the explicit dev escape hatch `OMS_DEV_ALLOW_ANON=1` is set, in
/// which case requests run as a local dev identity carrying every scope.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<UserContext, ApiError> {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match (&state.validator, bearer) {
        (Some(validator), Some(token)) => validator.validate(token).await.map_err(|e| {
            ApiError::kind(ErrorKind::Unauthenticated, e.to_string())
        }),
        (Some(_), None) => Err(ApiError::kind(
            ErrorKind::Unauthenticated,
            "missing bearer token",
        )),
        (None, _) => {
            if state.dev_allow_anon {
                Ok(dev_context())
            } else {
                Err(ApiError::kind(
                    ErrorKind::Unauthenticated,
                    "auth is not configured (set JWKS_URL) and OMS_DEV_ALLOW_ANON is not enabled",
                ))
            }
        }
    }
}

/// Scope check against the default-deny matrix.
pub fn authorize(state: &AppState, ctx: &UserContext, operation: &str) -> Result<(), ApiError> {
    if state.matrix.allows(&ctx.scopes, operation) {
        Ok(())
    } else {
        Err(ApiError::kind(
            ErrorKind::Forbidden,
            format!("operation '{operation}' requires a scope the token does not carry"),
        ))
    }
}

fn dev_context() -> UserContext {
    UserContext {
        sub: "dev:anonymous".to_string(),
        username: "dev".to_string(),
        email: None,
        roles: vec!["dev".to_string()],
        scopes: vec![
            "api:schemas:read".to_string(),
            "api:schemas:write".to_string(),
            "api:branches:write".to_string(),
            "api:proposals:approve".to_string(),
            "api:system:admin".to_string(),
            "api:service:account".to_string(),
        ],
        tenant: None,
    }
}
