//! API request/response models for leads.

use super::pagination::Pagination;
use crate::db::handlers::leads::LeadFilter;
use crate::db::models::leads::LeadDBResponse;
use crate::types::{LeadId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Where a lead sits in the follow-up process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "lead_state", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadState {
    Pending,
    ReachedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeadResponse {
    pub id: LeadId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// Stored file name of the uploaded resume
    pub resume_path: String,
    pub state: LeadState,
    pub notes: Option<String>,
    pub reached_out_by: Option<UserId>,
    pub reached_out_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<LeadDBResponse> for LeadResponse {
    fn from(db: LeadDBResponse) -> Self {
        Self {
            id: db.id,
            first_name: db.first_name,
            last_name: db.last_name,
            email: db.email,
            resume_path: db.resume_path,
            state: db.state,
            notes: db.notes,
            reached_out_by: db.reached_out_by,
            reached_out_at: db.reached_out_at,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// Partial update applied by an attorney
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct LeadUpdate {
    pub state: Option<LeadState>,
    pub notes: Option<String>,
}

/// Query parameters for listing leads
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct ListLeadsQuery {
    /// Pagination parameters
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,
    /// Only leads in this state
    pub state: Option<LeadState>,
    /// Created on or after this day (YYYY-MM-DD, UTC)
    pub start_date: Option<String>,
    /// Created on or before this day (YYYY-MM-DD, UTC)
    pub end_date: Option<String>,
    /// Case-insensitive substring of first name, last name or email
    pub search: Option<String>,
}

impl ListLeadsQuery {
    /// Translate query parameters into a repository filter.
    ///
    /// Dates that do not parse as `YYYY-MM-DD` are dropped with a warning rather than failing
    /// the request. The end date is inclusive: it becomes an exclusive bound at the start of the
    /// following day.
    pub fn to_filter(&self) -> LeadFilter {
        let created_from = self
            .start_date
            .as_deref()
            .and_then(|raw| parse_day("start_date", raw))
            .and_then(start_of_day);
        let created_before = self
            .end_date
            .as_deref()
            .and_then(|raw| parse_day("end_date", raw))
            .and_then(|day| day.succ_opt())
            .and_then(start_of_day);
        let search = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        LeadFilter {
            state: self.state,
            created_from,
            created_before,
            search,
            skip: self.pagination.skip(),
            limit: self.pagination.limit(),
        }
    }
}

fn parse_day(param: &str, raw: &str) -> Option<NaiveDate> {
    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(day) => Some(day),
        Err(e) => {
            tracing::warn!(param, value = raw, "Ignoring malformed date filter: {e}");
            None
        }
    }
}

fn start_of_day(day: NaiveDate) -> Option<DateTime<Utc>> {
    day.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc())
}

/// Page of leads with the size of the whole filtered set
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeadListResponse {
    pub leads: Vec<LeadResponse>,
    pub total: i64,
}
