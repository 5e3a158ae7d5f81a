//! Common type definitions.
//!
//! Entity identifiers are database-assigned `BIGSERIAL` values wrapped in type aliases, and
//! [`Operation`] names the action a caller attempted when an authorization check fails.

use serde::Deserialize;
use std::fmt;

// Type aliases for IDs
pub type UserId = i64;
pub type LeadId = i64;

/// Operations a caller can attempt against a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Operation {
    Create,
    Read,
    ReadAll,
    Update,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::ReadAll => "list",
            Operation::Update => "update",
        };
        f.write_str(verb)
    }
}
