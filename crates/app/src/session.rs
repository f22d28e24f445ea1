use axum::http::{header, HeaderMap, StatusCode};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::problem::ProblemResponse;
use crate::router::AppState;

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// Verifies HS256 session tokens issued by the authentication provider.
#[derive(Clone)]
pub struct SessionVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl SessionVerifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        // Expiry is checked against the injected clock instead.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Issues a token for `user_id` valid for `ttl` from `now`.
    pub fn issue(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<String, SessionError> {
        let claims = SessionClaims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| SessionError::Invalid(err.to_string()))
    }

    /// Returns the user id carried by a valid, unexpired token.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<String, SessionError> {
        let claims = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| SessionError::Invalid(err.to_string()))?
            .claims;
        if claims.exp <= now.timestamp() {
            return Err(SessionError::Expired);
        }
        if claims.sub.trim().is_empty() {
            return Err(SessionError::Invalid("empty_subject".to_string()));
        }
        Ok(claims.sub)
    }

    /// Extracts and verifies the bearer token from the `Authorization` header.
    pub fn authenticate(
        &self,
        headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> Result<String, SessionError> {
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(SessionError::Missing)?;
        self.verify(token, now)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("missing bearer token")]
    Missing,
    #[error("session expired")]
    Expired,
    #[error("invalid session token: {0}")]
    Invalid(String),
}

/// Resolves the acting user for an API request.
pub fn require_user(state: &AppState, headers: &HeaderMap) -> Result<String, ProblemResponse> {
    state
        .sessions()
        .authenticate(headers, state.now())
        .map_err(|err| {
            debug!(stage = "session", error = %err, "rejected request");
            let problem_type = match err {
                SessionError::Missing => "missing_token",
                SessionError::Expired => "session_expired",
                SessionError::Invalid(_) => "invalid_token",
            };
            ProblemResponse::new(StatusCode::UNAUTHORIZED, problem_type, err.to_string())
        })
}
