//! Database models for leads.

use crate::api::models::leads::LeadState;
use crate::types::{LeadId, UserId};
use chrono::{DateTime, Utc};

/// Database request for creating a new lead
#[derive(Debug, Clone)]
pub struct LeadCreateDBRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub resume_path: String,
    pub notes: Option<String>,
}

/// Database request for updating a lead
///
/// `stamp_attribution_for` records the acting attorney on the lead, but only when the lead has
/// no attribution yet. Existing attribution is never overwritten.
#[derive(Debug, Clone, Default)]
pub struct LeadUpdateDBRequest {
    pub state: Option<LeadState>,
    pub notes: Option<String>,
    pub stamp_attribution_for: Option<UserId>,
}

/// Database response for a lead
#[derive(Debug, Clone)]
pub struct LeadDBResponse {
    pub id: LeadId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub resume_path: String,
    pub state: LeadState,
    pub notes: Option<String>,
    pub reached_out_by: Option<UserId>,
    pub reached_out_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
