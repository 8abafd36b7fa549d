use axum::http::StatusCode;
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::config::{AuthMode, Settings};
use crate::models::api::AuthContext;

/// JWT claims structure.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Caller identity.
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub app_role: Option<String>,
    #[serde(default)]
    pub aud: Option<String>,
    /// Expiration time (Unix timestamp).
    #[serde(default)]
    pub exp: Option<u64>,
}

fn parse_algorithm(algorithm: &str) -> Result<jsonwebtoken::Algorithm, String> {
    match algorithm {
        "HS256" => Ok(jsonwebtoken::Algorithm::HS256),
        "HS384" => Ok(jsonwebtoken::Algorithm::HS384),
        "HS512" => Ok(jsonwebtoken::Algorithm::HS512),
        _ => Err(format!("Unsupported algorithm: {algorithm}")),
    }
}

/// Verify a JWT token and extract auth context.
pub fn verify_token(
    token: &str,
    secret: &str,
    algorithm: &str,
    audience: Option<&str>,
) -> Result<AuthContext, String> {
    let mut validation = Validation::new(parse_algorithm(algorithm)?);
    // Allow some clock drift.
    validation.leeway = 60;
    // Expiry is checked when present but not required.
    validation.required_spec_claims = std::collections::HashSet::new();
    match audience {
        Some(aud) => validation.set_audience(&[aud]),
        None => validation.validate_aud = false,
    }

    let key = DecodingKey::from_secret(secret.as_bytes());
    let token_data = decode::<Claims>(token, &key, &validation)
        .map_err(|e| format!("Token validation failed: {e}"))?;

    let claims = token_data.claims;
    Ok(AuthContext {
        subject: claims
            .sub
            .or_else(|| claims.account_id.clone())
            .unwrap_or_else(|| "unknown".to_string()),
        account_id: claims.account_id,
        organization_id: claims.organization_id,
        app_role: claims.app_role,
    })
}

/// Check a static bearer token.
pub fn verify_bearer(token: &str, expected: &str) -> Result<AuthContext, String> {
    if token != expected {
        return Err("Invalid or missing token".to_string());
    }
    Ok(AuthContext {
        subject: "bearer".to_string(),
        ..Default::default()
    })
}

/// Extract auth context from an Authorization header according to the configured mode.
pub fn extract_auth_from_header(
    auth_header: Option<&str>,
    settings: &Settings,
) -> Result<AuthContext, (StatusCode, String)> {
    if settings.auth_mode == AuthMode::None {
        return Ok(AuthContext {
            subject: "anonymous".to_string(),
            ..Default::default()
        });
    }

    let header = auth_header.ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            "Missing Authorization header".to_string(),
        )
    })?;

    let token = header.strip_prefix("Bearer ").ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            "Invalid Authorization header format".to_string(),
        )
    })?;

    let result = if settings.auth_mode == AuthMode::Jwt {
        verify_token(
            token,
            settings.jwt_secret_key.as_deref().unwrap_or_default(),
            &settings.jwt_algorithm,
            settings.jwt_audience.as_deref(),
        )
    } else {
        verify_bearer(token, settings.bearer_token.as_deref().unwrap_or_default())
    };
    result.map_err(|e| (StatusCode::UNAUTHORIZED, e))
}
