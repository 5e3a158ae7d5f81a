//! # leadctl: lead intake for a law practice
//!
//! Prospective clients submit their name, email, optional notes and a resume through a public
//! multipart endpoint. Attorneys authenticate with a JWT (bearer header or `access_token` cookie),
//! browse and search the submitted leads, download resumes, and mark a lead as reached out. The
//! first attorney to do so is recorded on the lead.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum) and all records live in PostgreSQL.
//! Resumes are written to a local directory behind the [`storage::ResumeStorage`] trait.
//!
//! - **API layer** ([`api`]): handlers mounted under `/api`, plus their request/response models
//! - **Authentication** ([`auth`]): argon2 password hashing, token issuance, request extractors
//! - **Database layer** ([`db`]): one repository per table over a `&mut PgConnection`
//! - **Lifecycle** ([`lifecycle`]): the `PENDING -> REACHED_OUT` transition rules
//! - **Notifications** ([`notifications`]): a background worker emailing the prospect and the
//!   attorneys after each submission. Delivery is best effort and never fails a submission.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use leadctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = leadctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     leadctl::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     }).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Database Setup
//!
//! Migrations run automatically on startup, followed by the legacy role upgrade and the default
//! attorney bootstrap. To run the migrations alone:
//!
//! ```no_run
//! # use sqlx::PgPool;
//! # async fn example(pool: PgPool) -> Result<(), sqlx::migrate::MigrateError> {
//! leadctl::migrator().run(&pool).await?;
//! # Ok(())
//! # }
//! ```
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod email;
pub mod errors;
pub mod lifecycle;
pub mod notifications;
mod openapi;
pub mod storage;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use crate::{
    api::models::users::Role,
    auth::password::{self, Argon2Params},
    config::CorsOrigin,
    db::handlers::{Repository, Users},
    db::models::users::{UserCreateDBRequest, UserUpdateDBRequest},
    email::EmailService,
    notifications::NotificationDispatcher,
    openapi::ApiDoc,
    storage::{LocalResumeStorage, ResumeStorage},
};
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderValue},
    routing::{get, post},
};
use bon::Builder;
pub use config::Config;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::sync::Arc;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument, warn};
use utoipa_scalar::{Scalar, Servable};

pub use types::{LeadId, UserId};

/// Headroom on top of the resume ceiling for the text fields and multipart framing
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .db(pool)
///     .config(config)
///     .storage(storage)
///     .email(email)
///     .notifier(notifier)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub storage: Arc<dyn ResumeStorage>,
    pub email: Arc<EmailService>,
    pub notifier: NotificationDispatcher,
}

/// Get the leadctl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Make sure the configured default attorney exists and holds the attorney role.
///
/// - No account with that email: one is created, provided a password is configured. Without a
///   password the bootstrap is skipped with a warning.
/// - Existing account: promoted to attorney if needed, and its password replaced when one is
///   configured.
///
/// Returns the attorney's user id, or `None` when the bootstrap was skipped.
#[instrument(skip_all, fields(email = %config.default_attorney.email))]
pub async fn ensure_attorney_user(config: &Config, db: &PgPool) -> anyhow::Result<Option<UserId>> {
    let attorney = &config.default_attorney;
    let params = Argon2Params::from(&config.auth.password);
    let password_hash = match attorney.password.as_deref() {
        Some(pwd) => Some(password::hash_string_with_params(pwd, Some(params))?),
        None => None,
    };

    let mut tx = db.begin().await?;
    let mut user_repo = Users::new(&mut tx);

    if let Some(existing) = user_repo.get_user_by_email(&attorney.email).await? {
        if existing.role != Role::Attorney || password_hash.is_some() {
            let update = UserUpdateDBRequest {
                full_name: None,
                password_hash,
                role: Some(Role::Attorney),
            };
            user_repo.update(existing.id, &update).await?;
            info!(user_id = existing.id, "Updated default attorney account");
        }
        tx.commit().await?;
        return Ok(Some(existing.id));
    }

    let Some(password_hash) = password_hash else {
        warn!("No default attorney password configured, skipping attorney bootstrap");
        return Ok(None);
    };

    let created = user_repo
        .create(&UserCreateDBRequest {
            email: attorney.email.clone(),
            full_name: attorney.full_name.clone(),
            password_hash,
            role: Role::Attorney,
        })
        .await?;
    tx.commit().await?;

    info!(user_id = created.id, "Created default attorney account");
    Ok(Some(created.id))
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            // Url serializes with a trailing slash, which never matches an Origin header
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::PATCH])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .allow_credentials(config.cors.allow_credentials)
        .expose_headers(vec![http::header::CONTENT_DISPOSITION]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router: `/api` routes, the debug and health endpoints, API docs, and the
/// body limit, CORS and tracing layers.
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    use api::handlers::{auth, debug, leads};

    let api_routes = Router::new()
        // Leads: submission is public, everything else checks for an attorney
        .route("/leads", post(leads::submit_lead).get(leads::list_leads))
        .route("/leads/direct", post(leads::submit_lead))
        .route("/leads/{id}", get(leads::get_lead).patch(leads::update_lead))
        .route("/leads/{id}/resume", get(leads::download_resume))
        // Authentication
        .route("/auth/token", post(auth::token))
        .route("/auth/register", post(auth::register))
        .route("/auth/me", get(auth::me))
        .route("/auth/logout", post(auth::logout))
        .route("/openapi.json", get(|| async { Json(ApiDoc::document()) }));

    let body_limit = usize::try_from(state.config.uploads.max_file_size)?.saturating_add(MULTIPART_OVERHEAD);

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/debug/emails", get(debug::list_captured_emails))
        .nest("/api", api_routes)
        .with_state(state.clone())
        .merge(Scalar::with_url("/api/docs", ApiDoc::document()))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(create_cors_layer(&state.config)?)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

/// Connect, migrate, upgrade legacy schemas, and bootstrap the default attorney.
async fn setup_database(config: &Config, pool: Option<PgPool>) -> anyhow::Result<PgPool> {
    let pool = match pool {
        Some(pool) => pool,
        None => {
            info!("Connecting to database");
            PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .acquire_timeout(config.database.acquire_timeout)
                .connect(&config.database.url)
                .await?
        }
    };

    migrator().run(&pool).await?;
    // Needs the user_role type created by the migrations
    db::upgrade_legacy_schema(&pool).await;
    ensure_attorney_user(config, &pool).await?;

    Ok(pool)
}

/// Main application struct that owns all resources and lifecycle.
///
/// 1. **Create**: [`Application::new`] connects to the database, runs migrations, prepares the
///    resume directory and starts the notification worker
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: when the shutdown future resolves, in-flight requests finish, the
///    notification worker stops and connections are closed
pub struct Application {
    router: Router,
    app_state: AppState,
    config: Config,
    pool: PgPool,
    shutdown_token: CancellationToken,
    notification_worker: Option<JoinHandle<()>>,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        Self::new_with_pool(config, None).await
    }

    /// Create the application on an existing pool (tests), or connect using the config when
    /// `pool` is `None`.
    pub async fn new_with_pool(config: Config, pool: Option<PgPool>) -> anyhow::Result<Self> {
        debug!("Starting lead intake service with configuration: {:#?}", config);

        let pool = setup_database(&config, pool).await?;

        let storage: Arc<dyn ResumeStorage> = Arc::new(LocalResumeStorage::new(&config.uploads.dir, config.uploads.max_file_size).await?);
        let email = Arc::new(EmailService::new(&config)?);

        let shutdown_token = CancellationToken::new();
        let (notifier, notification_worker) = NotificationDispatcher::spawn(email.clone(), storage.clone(), &config, shutdown_token.clone());

        let app_state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .storage(storage)
            .email(email)
            .notifier(notifier)
            .build();

        let router = build_router(&app_state)?;

        Ok(Self {
            router,
            app_state,
            config,
            pool,
            shutdown_token,
            notification_worker,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, AppState) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.app_state)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Lead intake service listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        // Queued notifications are dropped on shutdown
        info!("Stopping notification worker...");
        self.shutdown_token.cancel();
        if let Some(handle) = self.notification_worker {
            if let Err(e) = handle.await {
                warn!("Notification worker ended abnormally: {e}");
            }
        }

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
