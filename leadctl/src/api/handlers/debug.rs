//! Development helpers. Only useful with the `log` email transport.

use axum::{Json, extract::State};

use crate::{AppState, auth::current_user::CurrentAttorney, email::CapturedEmail, errors::Result};

/// List emails captured by the `log` transport, oldest first
#[utoipa::path(
    get,
    path = "/debug/emails",
    tag = "debug",
    summary = "Captured emails",
    description = "Returns the most recent emails held by the in-memory outbox. Always empty for the SMTP and file transports.",
    responses(
        (status = 200, description = "Captured emails", body = [CapturedEmail]),
        (status = 401, description = "Not authenticated", body = crate::errors::ErrorBody),
        (status = 403, description = "Attorney role required", body = crate::errors::ErrorBody),
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_captured_emails(State(state): State<AppState>, _attorney: CurrentAttorney) -> Result<Json<Vec<CapturedEmail>>> {
    Ok(Json(state.email.captured().await))
}

#[cfg(test)]
mod tests {
    use crate::api::models::users::Role;
    use crate::test_utils::{auth_header, create_test_app, create_test_user};
    use sqlx::PgPool;

    #[sqlx::test]
    async fn test_captured_emails_require_attorney(pool: PgPool) {
        let (server, _state) = create_test_app(pool.clone()).await;

        server.get("/debug/emails").await.assert_status_unauthorized();

        let user = create_test_user(&pool, Role::User).await;
        let (name, value) = auth_header(&user);
        server.get("/debug/emails").add_header(name, value).await.assert_status_forbidden();

        let attorney = create_test_user(&pool, Role::Attorney).await;
        let (name, value) = auth_header(&attorney);
        let emails: Vec<serde_json::Value> = server.get("/debug/emails").add_header(name, value).await.json();
        assert!(emails.is_empty());
    }
}
