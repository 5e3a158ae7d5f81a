//! Authentication and authorization.
//!
//! Callers authenticate with a short-lived HS256 access token obtained from `POST /api/token`.
//! The token travels either as an `Authorization: Bearer` header (API clients) or as the session
//! cookie set by the same endpoint (browsers). The header wins when both are present.
//!
//! - [`password`]: Argon2id hashing and verification
//! - [`session`]: token issue and validation
//! - [`current_user`]: axum extractors resolving the caller, with [`current_user::CurrentAttorney`]
//!   gating the lead review endpoints on the attorney role

pub mod current_user;
pub mod password;
pub mod session;
