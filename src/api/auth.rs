//! Bearer credential handling.
//!
//! Credentials are HS256 JWTs carrying `id`, `email`, `accountType` and
//! `exp`. They are read from `Authorization: Bearer` or a `token` cookie.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error::{ApiError, ApiErrorResponse};
use crate::domain::{AccountType, OwnerId, Requester};

const TOKEN_COOKIE: &str = "token";

// =============================================================================
// Errors
// =============================================================================

/// Authentication failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No credential in the request.
    #[error("Token Missing")]
    MissingToken,

    /// The credential failed verification or has expired.
    #[error("token is invalid")]
    InvalidToken,

    /// A privileged route was called by a regular account.
    #[error("This is a protected route for admin only.")]
    AdminOnly,

    /// A credential could not be issued.
    #[error("Failed to issue token: {0}")]
    Signing(String),
}

impl From<AuthError> for ApiErrorResponse {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::MissingToken | AuthError::InvalidToken => {
                Self::unauthenticated(error.to_string())
            }
            AuthError::AdminOnly => Self::new(
                StatusCode::UNAUTHORIZED,
                ApiError::new("UNAUTHORIZED", error.to_string()),
            ),
            AuthError::Signing(_) => {
                tracing::error!(error = %error, "Token signing failed");
                Self::internal_error("An internal error occurred")
            }
        }
    }
}

// =============================================================================
// Claims and Keys
// =============================================================================

/// JWT claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// User id.
    pub id: OwnerId,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Account type; `user` when absent.
    #[serde(default)]
    pub account_type: AccountType,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
}

impl From<Claims> for Requester {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.id,
            email: claims.email,
            account_type: claims.account_type,
        }
    }
}

/// Signing and verification keys derived from `JWT_SECRET`.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("JwtKeys")
            .field("algorithm", &Algorithm::HS256)
            .finish_non_exhaustive()
    }
}

impl JwtKeys {
    /// Creates HS256 keys from a shared secret.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Issues a credential for `requester`, valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Signing`] if encoding fails.
    pub fn issue(&self, requester: &Requester, ttl: Duration) -> Result<String, AuthError> {
        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        let claims = Claims {
            id: requester.user_id,
            email: requester.email.clone(),
            account_type: requester.account_type,
            exp: now.saturating_add(ttl.as_secs()),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|error| AuthError::Signing(error.to_string()))
    }

    /// Verifies `token` and returns its requester.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] for bad signatures, malformed
    /// claims, and expired credentials.
    pub fn verify(&self, token: &str) -> Result<Requester, AuthError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| Requester::from(data.claims))
            .map_err(|error| {
                tracing::debug!(error = %error, "Rejected bearer credential");
                AuthError::InvalidToken
            })
    }
}

/// Extracts the raw credential from the `token` cookie or the bearer header.
fn credential(headers: &HeaderMap) -> Option<&str> {
    let from_cookie = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == TOKEN_COOKIE)
        .map(|(_, value)| value);

    from_cookie
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.strip_prefix("Bearer ").unwrap_or(value))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

// =============================================================================
// Extractors
// =============================================================================

impl<State> FromRequestParts<State> for Requester
where
    State: Send + Sync,
    Arc<JwtKeys>: FromRef<State>,
{
    type Rejection = ApiErrorResponse;

    async fn from_request_parts(parts: &mut Parts, state: &State) -> Result<Self, Self::Rejection> {
        let token = credential(&parts.headers).ok_or(AuthError::MissingToken)?;
        let keys = Arc::<JwtKeys>::from_ref(state);
        Ok(keys.verify(token)?)
    }
}

/// A requester with an administrative account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminRequester(pub Requester);

impl<State> FromRequestParts<State> for AdminRequester
where
    State: Send + Sync,
    Arc<JwtKeys>: FromRef<State>,
{
    type Rejection = ApiErrorResponse;

    async fn from_request_parts(parts: &mut Parts, state: &State) -> Result<Self, Self::Rejection> {
        let requester = Requester::from_request_parts(parts, state).await?;
        if !requester.is_privileged() {
            return Err(AuthError::AdminOnly.into());
        }
        Ok(Self(requester))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use rstest::rstest;

    const HOUR: Duration = Duration::from_secs(3600);

    #[rstest]
    fn test_issue_then_verify_preserves_requester() {
        let keys = JwtKeys::new("secret");
        let requester = Requester {
            email: Some("a@example.com".to_string()),
            ..Requester::admin(OwnerId::generate())
        };

        let token = keys.issue(&requester, HOUR).unwrap();

        assert_eq!(keys.verify(&token), Ok(requester));
    }

    #[rstest]
    fn test_verify_rejects_foreign_secret() {
        let token = JwtKeys::new("one")
            .issue(&Requester::user(OwnerId::generate()), HOUR)
            .unwrap();

        assert_eq!(JwtKeys::new("two").verify(&token), Err(AuthError::InvalidToken));
    }

    #[rstest]
    fn test_verify_rejects_expired_token() {
        let keys = JwtKeys::new("secret");
        let claims = Claims {
            id: OwnerId::generate(),
            email: None,
            account_type: AccountType::User,
            exp: 1,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding).unwrap();

        assert_eq!(keys.verify(&token), Err(AuthError::InvalidToken));
    }

    #[rstest]
    fn test_claims_default_to_user_account() {
        let id = OwnerId::generate();
        let claims: Claims =
            serde_json::from_value(serde_json::json!({ "id": id, "exp": 10 })).unwrap();

        assert_eq!(claims.account_type, AccountType::User);
    }

    #[rstest]
    #[case("authorization", "Bearer abc", Some("abc"))]
    #[case("cookie", "theme=dark; token=xyz", Some("xyz"))]
    #[case("authorization", "Bearer ", None)]
    #[case("x-other", "abc", None)]
    fn test_credential_sources(
        #[case] header: &'static str,
        #[case] value: &'static str,
        #[case] expected: Option<&str>,
    ) {
        let mut headers = HeaderMap::new();
        headers.insert(header, HeaderValue::from_static(value));

        assert_eq!(credential(&headers), expected);
    }

    #[rstest]
    fn test_admin_only_maps_to_unauthorized() {
        let response = ApiErrorResponse::from(AuthError::AdminOnly);

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.error.message,
            "This is a protected route for admin only."
        );
    }
}
