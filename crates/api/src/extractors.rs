//! Request extractors.

use axum::{extract::FromRequestParts, http::request::Parts};
use jobq_common::AppError;

/// Header carrying the calling tenant.
pub const TENANT_HEADER: &str = "x-tenant-id";

fn tenant_from_parts(parts: &Parts) -> Result<Option<String>, AppError> {
    let Some(value) = parts.headers.get(TENANT_HEADER) else {
        return Ok(None);
    };
    let tenant = value
        .to_str()
        .map_err(|_| AppError::BadRequest("X-Tenant-Id must be visible ASCII".to_string()))?
        .trim();

    Ok((!tenant.is_empty()).then(|| tenant.to_string()))
}

/// Required tenant, from `X-Tenant-Id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantId(pub String);

impl<S> FromRequestParts<S> for TenantId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        tenant_from_parts(parts)?
            .map(TenantId)
            .ok_or_else(|| AppError::BadRequest("X-Tenant-Id header is required".to_string()))
    }
}

/// Optional tenant, from `X-Tenant-Id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaybeTenantId(pub Option<String>);

impl<S> FromRequestParts<S> for MaybeTenantId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        tenant_from_parts(parts).map(Self)
    }
}
