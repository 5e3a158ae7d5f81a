//! HTTP request handlers for all API endpoints.
//!
//! - [`leads`]: public submission plus the attorney review endpoints
//! - [`auth`]: token issuance, registration and the current-user lookup
//! - [`debug`]: inspection of emails captured by the `log` transport
//!
//! Handlers authenticate through the [`crate::auth::current_user`] extractors and return
//! [`crate::errors::Error`], which renders as a `{"detail": ...}` JSON body.

pub mod auth;
pub mod debug;
pub mod leads;
