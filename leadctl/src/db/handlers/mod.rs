//! Repository implementations for database access.
//!
//! Each repository wraps a borrowed [`sqlx::PgConnection`], so the caller decides whether work runs
//! on a plain pooled connection or inside a transaction:
//!
//! ```ignore
//! use leadctl::db::handlers::{Leads, Repository};
//!
//! let mut tx = pool.begin().await?;
//! let lead = Leads::new(&mut tx).get_by_id(42).await?;
//! tx.commit().await?;
//! ```

pub mod leads;
pub mod repository;
pub mod users;

pub use leads::{LeadFilter, Leads};
pub use repository::Repository;
pub use users::{UserFilter, Users};
