//! API request and response data models.
//!
//! These types are serialized as JSON on the wire and documented through utoipa. Database
//! counterparts live in [`crate::db::models`] and convert via `From` impls.

pub mod auth;
pub mod leads;
pub mod pagination;
pub mod users;
