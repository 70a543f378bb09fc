use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::user::{Permission, Role, User};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub role: Option<String>,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| Error::Unauthorized("Malformed token subject".to_string()))
    }

    pub fn role(&self) -> Option<Role> {
        self.role.as_deref().and_then(|r| r.parse().ok())
    }
}

pub fn issue_token(user: &User) -> Result<String> {
    let config = crate::config::get_config();
    let claims = Claims {
        sub: user.id.to_string(),
        exp: (Utc::now() + chrono::Duration::hours(24)).timestamp() as usize,
        role: Some(user.role.as_str().to_string()),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| Error::Internal(format!("Failed to sign token: {}", e)))
}

fn extract_claims(req: &Request) -> std::result::Result<Claims, Response> {
    let unauthorized = |code: &str| {
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": code }))).into_response()
    };

    let Some(auth_header) = req.headers().get(axum::http::header::AUTHORIZATION) else {
        return Err(unauthorized("missing_authorization"));
    };
    let Ok(auth_str) = auth_header.to_str() else {
        return Err(unauthorized("bad_authorization"));
    };
    let Some(token) = auth_str.strip_prefix("Bearer ") else {
        return Err(unauthorized("unsupported_scheme"));
    };

    let config = crate::config::get_config();
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| unauthorized("invalid_token"))
}

pub async fn require_bearer_auth(mut req: Request, next: Next) -> Response {
    match extract_claims(&req) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(response) => response,
    }
}

/// Authorization is resolved through the role's fixed permission set, never
/// by comparing role strings in handlers.
pub async fn require_permission(mut req: Request, next: Next, permission: Permission) -> Response {
    let claims = match extract_claims(&req) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let allowed = claims
        .role()
        .map(|role| role.permissions().allows(permission))
        .unwrap_or(false);
    if !allowed {
        return (StatusCode::FORBIDDEN, Json(json!({ "error": "forbidden" }))).into_response();
    }

    req.extensions_mut().insert(claims);
    next.run(req).await
}
