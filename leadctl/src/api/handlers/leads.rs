use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Path, Query, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::QueryRejection,
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info, instrument, warn};

use crate::{
    AppState,
    api::models::leads::{LeadListResponse, LeadResponse, LeadUpdate, ListLeadsQuery},
    auth::current_user::CurrentAttorney,
    db::{
        errors::DbError,
        handlers::{Leads, Repository},
        models::leads::LeadCreateDBRequest,
    },
    errors::{Error, Result},
    lifecycle,
    types::LeadId,
};

/// Classify a multipart failure: an exceeded body limit is 413, anything else is a malformed form
fn multipart_error(e: MultipartError) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge {
            message: "Request body too large".to_string(),
        }
    } else {
        Error::BadRequest {
            message: format!("Failed to parse multipart data: {}", e.body_text()),
        }
    }
}

fn parse_lead_id(raw: &str) -> Result<LeadId> {
    raw.parse::<LeadId>().map_err(|_| Error::BadRequest {
        message: "Invalid lead ID format".to_string(),
    })
}

fn lead_not_found(id: LeadId) -> Error {
    Error::NotFound {
        resource: "Lead".to_string(),
        id: id.to_string(),
    }
}

/// Form fields collected while streaming a submission
#[derive(Debug, Default)]
struct Submission {
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    notes: Option<String>,
    /// Stored name of the resume, once it has been written
    resume: Option<String>,
}

impl Submission {
    fn into_request(self) -> Result<LeadCreateDBRequest> {
        fn required(value: Option<String>, field: &str) -> Result<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::BadRequest {
                    message: format!("Field '{field}' is required"),
                })
        }

        let first_name = required(self.first_name, "first_name")?;
        let last_name = required(self.last_name, "last_name")?;
        let email = required(self.email, "email")?;
        if email.parse::<lettre::Address>().is_err() {
            return Err(Error::BadRequest {
                message: "Invalid email address".to_string(),
            });
        }
        let resume_path = self.resume.ok_or_else(|| Error::BadRequest {
            message: "Resume file is required".to_string(),
        })?;

        Ok(LeadCreateDBRequest {
            first_name,
            last_name,
            email,
            resume_path,
            notes: self.notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
        })
    }
}

/// Read every multipart field, streaming the resume straight into storage
async fn read_submission(state: &AppState, multipart: &mut Multipart, submission: &mut Submission) -> Result<()> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "resume" => {
                if submission.resume.is_some() {
                    return Err(Error::BadRequest {
                        message: "Only one resume file may be uploaded".to_string(),
                    });
                }
                // A part without a filename is a plain form value, not an upload
                let Some(original_name) = field.file_name().map(str::to_string) else {
                    return Err(Error::BadRequest {
                        message: "Resume file is required".to_string(),
                    });
                };
                debug!(%original_name, "Streaming resume upload");

                let chunks = field.map_err(multipart_error).boxed();
                let stored = state.storage.store(Some(&original_name), chunks).await?;
                submission.resume = Some(stored);
            }
            "first_name" | "last_name" | "email" | "notes" => {
                let value = field.text().await.map_err(multipart_error)?;
                let slot = match field_name.as_str() {
                    "first_name" => &mut submission.first_name,
                    "last_name" => &mut submission.last_name,
                    "email" => &mut submission.email,
                    _ => &mut submission.notes,
                };
                *slot = Some(value);
            }
            other => {
                debug!(field = other, "Ignoring unexpected form field");
            }
        }
    }
    Ok(())
}

/// Submit a lead with a resume
#[utoipa::path(
    post,
    path = "/leads",
    tag = "leads",
    summary = "Submit lead",
    description = "Public endpoint. Accepts the prospect's details and a resume file. Attorneys are notified by email in the background.",
    request_body(
        content_type = "multipart/form-data",
        description = "Fields first_name, last_name, email, optional notes, and the resume file"
    ),
    responses(
        (status = 201, description = "Lead created", body = LeadResponse),
        (status = 400, description = "Missing or empty field or resume", body = crate::errors::ErrorBody),
        (status = 413, description = "Resume too large", body = crate::errors::ErrorBody),
        (status = 500, description = "Internal server error")
    )
)]
#[instrument(skip_all)]
pub async fn submit_lead(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<LeadResponse>)> {
    let mut multipart = multipart.map_err(|e| Error::BadRequest {
        message: e.body_text(),
    })?;

    let mut submission = Submission::default();
    if let Err(e) = read_submission(&state, &mut multipart, &mut submission).await {
        discard_resume(&state, submission.resume.take()).await;
        return Err(e);
    }

    let resume = submission.resume.clone();
    let request = match submission.into_request() {
        Ok(request) => request,
        Err(e) => {
            discard_resume(&state, resume).await;
            return Err(e);
        }
    };

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let lead = Leads::new(&mut pool_conn).create(&request).await?;
    drop(pool_conn);

    info!(lead_id = lead.id, resume = %lead.resume_path, "Lead submitted");
    let response = LeadResponse::from(lead);
    state.notifier.dispatch(response.clone());

    Ok((StatusCode::CREATED, Json(response)))
}

async fn discard_resume(state: &AppState, stored: Option<String>) {
    let Some(name) = stored else {
        return;
    };
    if let Err(e) = state.storage.remove(&name).await {
        warn!(resume = %name, error = %e, "Failed to discard resume from rejected submission");
    }
}

/// List leads
#[utoipa::path(
    get,
    path = "/leads",
    tag = "leads",
    summary = "List leads",
    description = "Attorney only. Newest first. Unparseable dates are ignored.",
    params(ListLeadsQuery),
    responses(
        (status = 200, description = "Page of leads with the filtered total", body = LeadListResponse),
        (status = 400, description = "Malformed query parameters", body = crate::errors::ErrorBody),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not an attorney")
    ),
    security(("bearer_auth" = []))
)]
#[instrument(skip_all, fields(attorney_id = attorney.0.id))]
pub async fn list_leads(
    State(state): State<AppState>,
    attorney: CurrentAttorney,
    query: std::result::Result<Query<ListLeadsQuery>, QueryRejection>,
) -> Result<Json<LeadListResponse>> {
    let Query(query) = query.map_err(|e| Error::BadRequest { message: e.body_text() })?;
    let filter = query.to_filter();
    debug!(?filter, "Listing leads");

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Leads::new(&mut pool_conn);

    let leads = repo.list(&filter).await?;
    let total = repo.count(&filter).await?;

    Ok(Json(LeadListResponse {
        leads: leads.into_iter().map(LeadResponse::from).collect(),
        total,
    }))
}

/// Get a lead
#[utoipa::path(
    get,
    path = "/leads/{id}",
    tag = "leads",
    summary = "Get lead",
    params(("id" = i64, Path, description = "Lead ID")),
    responses(
        (status = 200, description = "Lead", body = LeadResponse),
        (status = 404, description = "Lead not found")
    ),
    security(("bearer_auth" = []))
)]
#[instrument(skip_all, fields(attorney_id = attorney.0.id))]
pub async fn get_lead(State(state): State<AppState>, attorney: CurrentAttorney, Path(id): Path<String>) -> Result<Json<LeadResponse>> {
    let id = parse_lead_id(&id)?;

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let lead = Leads::new(&mut pool_conn).get_by_id(id).await?.ok_or_else(|| lead_not_found(id))?;

    Ok(Json(LeadResponse::from(lead)))
}

/// Update a lead's state or notes
#[utoipa::path(
    patch,
    path = "/leads/{id}",
    tag = "leads",
    summary = "Update lead",
    description = "Attorney only. Moving a lead to REACHED_OUT records who reached out and when; this is never overwritten.",
    params(("id" = i64, Path, description = "Lead ID")),
    request_body = LeadUpdate,
    responses(
        (status = 200, description = "Updated lead", body = LeadResponse),
        (status = 400, description = "Invalid transition", body = crate::errors::ErrorBody),
        (status = 404, description = "Lead not found")
    ),
    security(("bearer_auth" = []))
)]
#[instrument(skip_all, fields(attorney_id = attorney.id))]
pub async fn update_lead(
    State(state): State<AppState>,
    CurrentAttorney(attorney): CurrentAttorney,
    Path(id): Path<String>,
    Json(patch): Json<LeadUpdate>,
) -> Result<Json<LeadResponse>> {
    let id = parse_lead_id(&id)?;

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Leads::new(&mut pool_conn);

    let current = repo.get_by_id(id).await?.ok_or_else(|| lead_not_found(id))?;
    let request = lifecycle::plan_update(current.state, &patch, attorney.id)?;

    if request.state.is_none() && request.notes.is_none() {
        debug!(lead_id = id, "Update changes nothing");
        return Ok(Json(LeadResponse::from(current)));
    }

    let updated = repo.update(id, &request).await.map_err(|e| match e {
        DbError::NotFound => lead_not_found(id),
        other => Error::Database(other),
    })?;

    if current.state != updated.state {
        info!(lead_id = id, from = ?current.state, to = ?updated.state, "Lead state changed");
    }
    Ok(Json(LeadResponse::from(updated)))
}

/// Download a lead's resume
#[utoipa::path(
    get,
    path = "/leads/{id}/resume",
    tag = "leads",
    summary = "Download resume",
    params(("id" = i64, Path, description = "Lead ID")),
    responses(
        (status = 200, description = "Resume file", content_type = "application/octet-stream"),
        (status = 404, description = "Lead or file not found")
    ),
    security(("bearer_auth" = []))
)]
#[instrument(skip_all, fields(attorney_id = attorney.0.id))]
pub async fn download_resume(State(state): State<AppState>, attorney: CurrentAttorney, Path(id): Path<String>) -> Result<Response> {
    let id = parse_lead_id(&id)?;

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let lead = Leads::new(&mut pool_conn).get_by_id(id).await?.ok_or_else(|| lead_not_found(id))?;
    drop(pool_conn);

    let stream = state.storage.open(&lead.resume_path).await?;

    let content_type = mime_guess::from_path(&lead.resume_path).first_or_octet_stream();
    let disposition = format!("attachment; filename=\"{}\"", lead.resume_path);

    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(content_type.essence_str()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}
