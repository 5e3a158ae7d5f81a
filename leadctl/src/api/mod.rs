//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! - **Leads** (`/api/leads/*`): public submission, attorney listing and review
//! - **Authentication** (`/api/auth/*`): tokens, registration, current user
//! - **Debug** (`/debug/emails`): captured outbound email
//!
//! All endpoints are documented with `utoipa`; the rendered reference is served at `/api/docs`.

pub mod handlers;
pub mod models;
