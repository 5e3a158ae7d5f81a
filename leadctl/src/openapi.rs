//! OpenAPI document for the `/api` surface and the debug endpoint.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{api, email, errors};

/// Security scheme for attorney and account endpoints
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "bearer_auth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some(
                            "Access token from `POST /api/auth/token`. Send it in the `Authorization` header:\n\n\
                            ```\nAuthorization: Bearer YOUR_TOKEN\n```\n\n\
                            Browsers may rely on the `access_token` cookie set by the same endpoint instead.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

/// Paths are declared relative to `/api`; [`ApiDoc::document`] prefixes them.
#[derive(OpenApi)]
#[openapi(
    info(title = "Lead intake API", description = "Public lead submission and attorney review."),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::leads::submit_lead,
        api::handlers::leads::list_leads,
        api::handlers::leads::get_lead,
        api::handlers::leads::update_lead,
        api::handlers::leads::download_resume,
        api::handlers::auth::token,
        api::handlers::auth::register,
        api::handlers::auth::me,
        api::handlers::auth::logout,
    ),
    components(
        schemas(
            api::models::leads::LeadState,
            api::models::leads::LeadResponse,
            api::models::leads::LeadUpdate,
            api::models::leads::LeadListResponse,
            api::models::users::Role,
            api::models::users::UserCreate,
            api::models::users::UserResponse,
            api::models::auth::TokenRequest,
            api::models::auth::TokenResponse,
            api::models::auth::AuthSuccessResponse,
            errors::ErrorBody,
        )
    ),
    tags(
        (name = "leads", description = "Lead submission and review. Submission is public; everything else requires an attorney."),
        (name = "authentication", description = "Access tokens, registration and the current account."),
    )
)]
pub struct ApiDoc;

#[derive(OpenApi)]
#[openapi(
    paths(api::handlers::debug::list_captured_emails),
    components(schemas(email::CapturedEmail)),
    tags((name = "debug", description = "Development helpers."))
)]
struct DebugDoc;

impl ApiDoc {
    /// The full document: `/api` paths plus the root-level debug endpoint
    pub fn document() -> utoipa::openapi::OpenApi {
        let mut doc = ApiDoc::openapi();
        let paths = std::mem::take(&mut doc.paths.paths);
        doc.paths.paths = paths.into_iter().map(|(path, item)| (format!("/api{path}"), item)).collect();
        doc.merge(DebugDoc::openapi());
        doc
    }
}
