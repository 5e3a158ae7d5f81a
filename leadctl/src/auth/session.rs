//! JWT access token creation and verification.
//!
//! Tokens are HS256-signed, carry the user's email as `sub`, and expire absolutely after the
//! configured lifetime. There is no refresh or revocation: a token stays valid until `exp`.

use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{config::Config, errors::Error};

/// Access token claims
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String, // Subject (user email)
    pub exp: i64,    // Expiration time
    pub iat: i64,    // Issued at
}

/// Sign a token for `subject` that expires `ttl` from now.
pub fn issue_token(subject: &str, ttl: Duration, secret: &str) -> Result<String, Error> {
    let now = Utc::now();
    let ttl = chrono::Duration::from_std(ttl).map_err(|e| Error::Internal {
        operation: format!("convert token lifetime: {e}"),
    })?;
    let claims = TokenClaims {
        sub: subject.to_string(),
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
    };

    let key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), &claims, &key).map_err(|e| Error::Internal {
        operation: format!("create JWT: {e}"),
    })
}

/// Validate a token and return its subject.
pub fn validate_token(token: &str, secret: &str) -> Result<String, Error> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::default();
    validation.leeway = 0;

    let token_data = decode::<TokenClaims>(token, &key, &validation).map_err(|e| match e.kind() {
        // Client errors (401) - malformed tokens, invalid claims, expired tokens
        ErrorKind::InvalidToken
        | ErrorKind::InvalidSignature
        | ErrorKind::ExpiredSignature
        | ErrorKind::MissingRequiredClaim(_)
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience
        | ErrorKind::InvalidSubject
        | ErrorKind::ImmatureSignature
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_)
        | ErrorKind::InvalidAlgorithm => Error::Unauthenticated { message: None },

        // Server errors (500) - key issues, internal failures
        ErrorKind::InvalidEcdsaKey
        | ErrorKind::InvalidRsaKey(_)
        | ErrorKind::RsaFailedSigning
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::MissingAlgorithm
        | ErrorKind::Crypto(_) => Error::Internal {
            operation: format!("JWT verification: {e}"),
        },

        _ => Error::Internal {
            operation: format!("JWT verification (unknown error): {e}"),
        },
    })?;

    Ok(token_data.claims.sub)
}

fn secret_key(config: &Config) -> Result<&str, Error> {
    config.secret_key.as_deref().ok_or_else(|| Error::Internal {
        operation: "JWT sessions: secret_key is required".to_string(),
    })
}

/// Create an access token for `email` using the configured secret and lifetime
pub fn create_session_token(email: &str, config: &Config) -> Result<String, Error> {
    issue_token(email, config.auth.token_expiry, secret_key(config)?)
}

/// Verify an access token using the configured secret, returning the subject email
pub fn verify_session_token(token: &str, config: &Config) -> Result<String, Error> {
    validate_token(token, secret_key(config)?)
}
