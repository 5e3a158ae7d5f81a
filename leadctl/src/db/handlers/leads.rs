//! Database repository for leads.

use crate::types::{LeadId, UserId};
use crate::{
    api::models::leads::LeadState,
    db::{
        errors::Result,
        handlers::repository::Repository,
        models::leads::{LeadCreateDBRequest, LeadDBResponse, LeadUpdateDBRequest},
    },
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, Postgres, QueryBuilder};
use tracing::instrument;

const LEAD_COLUMNS: &str = "id, first_name, last_name, email, resume_path, state, notes, reached_out_by, reached_out_at, created_at, updated_at";

/// Filter for listing leads. All conditions are optional and combine with AND.
#[derive(Debug, Clone, Default)]
pub struct LeadFilter {
    pub state: Option<LeadState>,
    /// Inclusive lower bound on `created_at`
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`
    pub created_before: Option<DateTime<Utc>>,
    /// Case-insensitive substring match on first name, last name or email
    pub search: Option<String>,
    pub skip: i64,
    pub limit: i64,
}

impl LeadFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            skip,
            limit,
            ..Default::default()
        }
    }
}

// Database entity model
#[derive(Debug, Clone, FromRow)]
struct Lead {
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

impl From<Lead> for LeadDBResponse {
    fn from(lead: Lead) -> Self {
        Self {
            id: lead.id,
            first_name: lead.first_name,
            last_name: lead.last_name,
            email: lead.email,
            resume_path: lead.resume_path,
            state: lead.state,
            notes: lead.notes,
            reached_out_by: lead.reached_out_by,
            reached_out_at: lead.reached_out_at,
            created_at: lead.created_at,
            updated_at: lead.updated_at,
        }
    }
}

/// Escape LIKE metacharacters so user input only ever matches literally
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Append the WHERE conditions shared by the list and count queries
fn push_filter_conditions(query: &mut QueryBuilder<'_, Postgres>, filter: &LeadFilter) {
    if let Some(state) = filter.state {
        query.push(" AND state = ").push_bind(state);
    }
    if let Some(from) = filter.created_from {
        query.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(before) = filter.created_before {
        query.push(" AND created_at < ").push_bind(before);
    }
    if let Some(search) = filter.search.as_deref() {
        let pattern = format!("%{}%", escape_like(search));
        query.push(" AND (first_name ILIKE ").push_bind(pattern.clone());
        query.push(" OR last_name ILIKE ").push_bind(pattern.clone());
        query.push(" OR email ILIKE ").push_bind(pattern);
        query.push(")");
    }
}

pub struct Leads<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Leads<'c> {
    type CreateRequest = LeadCreateDBRequest;
    type UpdateRequest = LeadUpdateDBRequest;
    type Response = LeadDBResponse;
    type Id = LeadId;
    type Filter = LeadFilter;

    #[instrument(skip(self, request), fields(resume = %request.resume_path), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let lead = sqlx::query_as::<_, Lead>(&format!(
            r#"
            INSERT INTO leads (first_name, last_name, email, resume_path, notes)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {LEAD_COLUMNS}
            "#
        ))
        .bind(&request.first_name)
        .bind(&request.last_name)
        .bind(&request.email)
        .bind(&request.resume_path)
        .bind(&request.notes)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(LeadDBResponse::from(lead))
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let lead = sqlx::query_as::<_, Lead>(&format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(lead.map(LeadDBResponse::from))
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::new(format!("SELECT {LEAD_COLUMNS} FROM leads WHERE 1=1"));
        push_filter_conditions(&mut query, filter);

        // id breaks ties between leads created in the same instant
        query.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let leads = query.build_query_as::<Lead>().fetch_all(&mut *self.db).await?;

        Ok(leads.into_iter().map(LeadDBResponse::from).collect())
    }

    /// Apply a partial update.
    ///
    /// Attribution is written in the same statement and only while it is still null, so two
    /// racing updates cannot both stamp it.
    #[instrument(skip(self, request), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let lead = sqlx::query_as::<_, Lead>(&format!(
            r#"
            UPDATE leads SET
                state = COALESCE($2, state),
                notes = COALESCE($3, notes),
                reached_out_by = CASE
                    WHEN $4::BIGINT IS NOT NULL AND reached_out_by IS NULL THEN $4::BIGINT
                    ELSE reached_out_by
                END,
                reached_out_at = CASE
                    WHEN $4::BIGINT IS NOT NULL AND reached_out_by IS NULL THEN NOW()
                    ELSE reached_out_at
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {LEAD_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(request.state)
        .bind(&request.notes)
        .bind(request.stamp_attribution_for)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(LeadDBResponse::from(lead))
    }
}

impl<'c> Leads<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Count the leads matching a filter, ignoring its pagination
    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &LeadFilter) -> Result<i64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM leads WHERE 1=1");
        push_filter_conditions(&mut query, filter);

        let total: i64 = query.build_query_scalar().fetch_one(&mut *self.db).await?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::users::Role;
    use crate::db::errors::DbError;
    use crate::test_utils::create_test_user;
    use sqlx::PgPool;

    fn create_request(first: &str, last: &str, email: &str) -> LeadCreateDBRequest {
        LeadCreateDBRequest {
            first_name: first.to_string(),
            last_name: last.to_string(),
            email: email.to_string(),
            resume_path: format!("{}.pdf", uuid::Uuid::new_v4()),
            notes: None,
        }
    }

    async fn backdate(pool: &PgPool, id: LeadId, ts: &str) {
        sqlx::query("UPDATE leads SET created_at = $2::TIMESTAMPTZ WHERE id = $1")
            .bind(id)
            .bind(ts)
            .execute(pool)
            .await
            .unwrap();
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("ada"), "ada");
        assert_eq!(escape_like("100%_\\"), "100\\%\\_\\\\");
    }

    #[sqlx::test]
    async fn test_create_lead_starts_pending(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Leads::new(&mut conn);

        let lead = repo.create(&create_request("Ada", "Lovelace", "ada@example.com")).await.unwrap();

        assert_eq!(lead.state, LeadState::Pending);
        assert_eq!(lead.first_name, "Ada");
        assert!(lead.reached_out_by.is_none());
        assert!(lead.reached_out_at.is_none());
        assert!(lead.notes.is_none());

        let fetched = repo.get_by_id(lead.id).await.unwrap().unwrap();
        assert_eq!(fetched.email, "ada@example.com");
        assert_eq!(fetched.resume_path, lead.resume_path);
    }

    #[sqlx::test]
    async fn test_blank_required_field_rejected_by_schema(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Leads::new(&mut conn);

        let err = repo.create(&create_request("  ", "Lovelace", "ada@example.com")).await.unwrap_err();
        assert!(matches!(err, DbError::CheckViolation { .. }));
    }

    #[sqlx::test]
    async fn test_list_orders_newest_first_and_counts(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let (a, b, c) = {
            let mut repo = Leads::new(&mut conn);
            let a = repo.create(&create_request("Ada", "Lovelace", "ada@example.com")).await.unwrap();
            let b = repo.create(&create_request("Grace", "Hopper", "grace@example.com")).await.unwrap();
            let c = repo.create(&create_request("Alan", "Turing", "alan@example.com")).await.unwrap();
            (a, b, c)
        };
        backdate(&pool, a.id, "2024-01-01T10:00:00Z").await;
        backdate(&pool, b.id, "2024-01-03T10:00:00Z").await;
        backdate(&pool, c.id, "2024-01-02T10:00:00Z").await;

        let mut repo = Leads::new(&mut conn);
        let all = repo.list(&LeadFilter::new(0, 100)).await.unwrap();
        let ids: Vec<_> = all.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![b.id, c.id, a.id]);

        // Same filter twice yields the same page
        let again = repo.list(&LeadFilter::new(0, 100)).await.unwrap();
        assert_eq!(again.iter().map(|l| l.id).collect::<Vec<_>>(), ids);

        let page = repo.list(&LeadFilter::new(1, 1)).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, c.id);
        assert_eq!(repo.count(&LeadFilter::new(1, 1)).await.unwrap(), 3);
    }

    #[sqlx::test]
    async fn test_search_is_case_insensitive_across_fields(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Leads::new(&mut conn);
        let ada = repo.create(&create_request("Ada", "Lovelace", "ada@example.com")).await.unwrap();
        let grace = repo.create(&create_request("Grace", "Hopper", "admiral@navy.example")).await.unwrap();

        let filter = |s: &str| LeadFilter {
            search: Some(s.to_string()),
            ..LeadFilter::new(0, 100)
        };

        let found = repo.list(&filter("lovelace")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, ada.id);

        let found = repo.list(&filter("NAVY")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, grace.id);

        let found = repo.list(&filter("gRaC")).await.unwrap();
        assert_eq!(found[0].id, grace.id);

        // Wildcards in the search term are literal
        assert!(repo.list(&filter("%")).await.unwrap().is_empty());
        assert_eq!(repo.count(&filter("a")).await.unwrap(), 2);
    }

    #[sqlx::test]
    async fn test_date_bounds(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let (early, late) = {
            let mut repo = Leads::new(&mut conn);
            let early = repo.create(&create_request("Ada", "Lovelace", "ada@example.com")).await.unwrap();
            let late = repo.create(&create_request("Grace", "Hopper", "grace@example.com")).await.unwrap();
            (early, late)
        };
        backdate(&pool, early.id, "2024-03-01T00:00:00Z").await;
        backdate(&pool, late.id, "2024-03-31T23:59:59Z").await;

        let mut repo = Leads::new(&mut conn);
        let march = LeadFilter {
            created_from: Some("2024-03-01T00:00:00Z".parse().unwrap()),
            created_before: Some("2024-04-01T00:00:00Z".parse().unwrap()),
            ..LeadFilter::new(0, 100)
        };
        assert_eq!(repo.count(&march).await.unwrap(), 2);

        let before_last_day = LeadFilter {
            created_before: Some("2024-03-31T00:00:00Z".parse().unwrap()),
            ..LeadFilter::new(0, 100)
        };
        let found = repo.list(&before_last_day).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, early.id);
    }

    #[sqlx::test]
    async fn test_update_stamps_attribution_once(pool: PgPool) {
        let first = create_test_user(&pool, Role::Attorney).await;
        let second = create_test_user(&pool, Role::Attorney).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Leads::new(&mut conn);
        let lead = repo.create(&create_request("Ada", "Lovelace", "ada@example.com")).await.unwrap();

        let reached = repo
            .update(
                lead.id,
                &LeadUpdateDBRequest {
                    state: Some(LeadState::ReachedOut),
                    notes: None,
                    stamp_attribution_for: Some(first.id),
                },
            )
            .await
            .unwrap();
        assert_eq!(reached.state, LeadState::ReachedOut);
        assert_eq!(reached.reached_out_by, Some(first.id));
        let stamped_at = reached.reached_out_at.unwrap();
        assert!(stamped_at >= lead.created_at);

        // A second stamp attempt by someone else leaves attribution untouched
        let again = repo
            .update(
                lead.id,
                &LeadUpdateDBRequest {
                    state: Some(LeadState::ReachedOut),
                    notes: Some("called twice".into()),
                    stamp_attribution_for: Some(second.id),
                },
            )
            .await
            .unwrap();
        assert_eq!(again.reached_out_by, Some(first.id));
        assert_eq!(again.reached_out_at, Some(stamped_at));
        assert_eq!(again.notes.as_deref(), Some("called twice"));
    }

    #[sqlx::test]
    async fn test_state_filter(pool: PgPool) {
        let attorney = create_test_user(&pool, Role::Attorney).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Leads::new(&mut conn);
        let lead = repo.create(&create_request("Ada", "Lovelace", "ada@example.com")).await.unwrap();
        repo.create(&create_request("Grace", "Hopper", "grace@example.com")).await.unwrap();

        let reached_out = LeadFilter {
            state: Some(LeadState::ReachedOut),
            ..LeadFilter::new(0, 100)
        };
        assert_eq!(repo.count(&reached_out).await.unwrap(), 0);

        repo.update(
            lead.id,
            &LeadUpdateDBRequest {
                state: Some(LeadState::ReachedOut),
                notes: None,
                stamp_attribution_for: Some(attorney.id),
            },
        )
        .await
        .unwrap();

        let found = repo.list(&reached_out).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, lead.id);

        let pending = LeadFilter {
            state: Some(LeadState::Pending),
            ..LeadFilter::new(0, 100)
        };
        assert_eq!(repo.count(&pending).await.unwrap(), 1);
    }

    #[sqlx::test]
    async fn test_update_unknown_lead_is_not_found(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Leads::new(&mut conn);

        let err = repo.update(999_999, &LeadUpdateDBRequest::default()).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }
}
