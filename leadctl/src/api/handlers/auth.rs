use axum::{
    Form, Json,
    extract::{State, rejection::FormRejection},
    http::StatusCode,
};

use crate::{
    AppState,
    api::models::{
        auth::{AuthSuccessResponse, LoginResponse, LogoutResponse, TokenRequest, TokenResponse},
        users::{CurrentUser, Role, UserCreate, UserResponse},
    },
    auth::{
        password::{self, Argon2Params},
        session,
    },
    config::Config,
    db::{
        handlers::{Repository, Users},
        models::users::UserCreateDBRequest,
    },
    errors::Error,
};

fn invalid_credentials() -> Error {
    Error::Unauthenticated {
        message: Some("Incorrect email or password".to_string()),
    }
}

/// Issue an access token (OAuth2 password grant style)
#[utoipa::path(
    post,
    path = "/auth/token",
    tag = "authentication",
    summary = "Obtain access token",
    description = "Form fields `username` (the account email) and `password`. The token is returned in the body and also set as the session cookie.",
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 401, description = "Incorrect email or password", body = crate::errors::ErrorBody),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn token(
    State(state): State<AppState>,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Result<LoginResponse, Error> {
    let Form(request) = form.map_err(|e| Error::BadRequest { message: e.body_text() })?;

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut pool_conn)
        .get_user_by_email(&request.username)
        .await?
        .ok_or_else(invalid_credentials)?;
    drop(pool_conn);

    // Verify password on a blocking thread to avoid blocking async runtime
    let password = request.password;
    let hash = user.password_hash.clone();
    let is_valid = tokio::task::spawn_blocking(move || password::verify_string(&password, &hash))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password verification task: {e}"),
        })?;

    if !is_valid {
        tracing::info!(user_id = user.id, "Rejected login with wrong password");
        return Err(invalid_credentials());
    }

    let token = session::create_session_token(&user.email, &state.config)?;
    let cookie = create_session_cookie(&token, &state.config);

    Ok(LoginResponse {
        token: TokenResponse::bearer(token),
        cookie,
    })
}

/// Register a new account
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = UserCreate,
    tag = "authentication",
    summary = "Register",
    description = "Creates a plain user account. Attorney accounts are provisioned by operators.",
    responses(
        (status = 201, description = "User registered", body = UserResponse),
        (status = 400, description = "Invalid input or email already registered", body = crate::errors::ErrorBody),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn register(State(state): State<AppState>, Json(request): Json<UserCreate>) -> Result<(StatusCode, Json<UserResponse>), Error> {
    if !state.config.auth.allow_registration {
        return Err(Error::BadRequest {
            message: "User registration is disabled".to_string(),
        });
    }

    let email = request.email.trim().to_string();
    if email.parse::<lettre::Address>().is_err() {
        return Err(Error::BadRequest {
            message: "Invalid email address".to_string(),
        });
    }
    let full_name = request.full_name.trim().to_string();
    if full_name.is_empty() {
        return Err(Error::BadRequest {
            message: "Full name is required".to_string(),
        });
    }

    // Validate password length
    let password_config = &state.config.auth.password;
    let password_len = request.password.chars().count();
    if password_len < password_config.min_length {
        return Err(Error::BadRequest {
            message: format!("Password must be at least {} characters", password_config.min_length),
        });
    }
    if password_len > password_config.max_length {
        return Err(Error::BadRequest {
            message: format!("Password must be no more than {} characters", password_config.max_length),
        });
    }

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if Users::new(&mut pool_conn).get_user_by_email(&email).await?.is_some() {
        return Err(Error::BadRequest {
            message: "Email already registered".to_string(),
        });
    }

    // Hash the password on a blocking thread to avoid blocking async runtime
    let password = request.password;
    let params = Argon2Params::from(password_config);
    let password_hash = tokio::task::spawn_blocking(move || password::hash_string_with_params(&password, Some(params)))
        .await
        .map_err(|e| Error::Internal {
            operation: format!("spawn password hashing task: {e}"),
        })??;

    // A concurrent registration for the same email surfaces as a unique violation, also a 400
    let created = Users::new(&mut pool_conn)
        .create(&UserCreateDBRequest {
            email,
            full_name,
            password_hash,
            role: Role::User,
        })
        .await?;

    tracing::info!(user_id = created.id, "Registered new user");
    Ok((StatusCode::CREATED, Json(UserResponse::from(created))))
}

/// Get the authenticated user
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "authentication",
    summary = "Current user",
    responses(
        (status = 200, description = "The caller's account", body = UserResponse),
        (status = 401, description = "Not authenticated", body = crate::errors::ErrorBody),
    ),
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = current_user.id))]
pub async fn me(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<UserResponse>, Error> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut pool_conn)
        .get_by_id(current_user.id)
        .await?
        .ok_or(Error::Unauthenticated { message: None })?;

    Ok(Json(UserResponse::from(user)))
}

/// Logout (clear the session cookie)
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "authentication",
    summary = "Logout",
    description = "Clears the session cookie. Issued tokens stay valid until they expire.",
    responses(
        (status = 200, description = "Logout successful", body = AuthSuccessResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<AppState>) -> Result<LogoutResponse, Error> {
    // Create expired cookie to clear session
    let cookie = format!(
        "{}=; Path=/; HttpOnly{}; SameSite={}; Max-Age=0",
        state.config.auth.cookie_name,
        if state.config.auth.cookie_secure { "; Secure" } else { "" },
        state.config.auth.cookie_same_site
    );

    let auth_response = AuthSuccessResponse {
        message: "Logout successful".to_string(),
    };

    Ok(LogoutResponse { auth_response, cookie })
}

fn create_session_cookie(token: &str, config: &Config) -> String {
    let auth = &config.auth;
    let max_age = auth.token_expiry.as_secs();

    format!(
        "{}={}; Path=/; HttpOnly{}; SameSite={}; Max-Age={}",
        auth.cookie_name,
        token,
        if auth.cookie_secure { "; Secure" } else { "" },
        auth.cookie_same_site,
        max_age
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TEST_PASSWORD, auth_header, create_test_app, create_test_app_with_config, create_test_config, create_test_user};
    use serde_json::json;
    use sqlx::PgPool;

    #[test]
    fn test_session_cookie_format() {
        let mut config = create_test_config();
        config.auth.cookie_secure = false;
        let cookie = create_session_cookie("abc", &config);
        assert_eq!(cookie, "access_token=abc; Path=/; HttpOnly; SameSite=lax; Max-Age=1800");

        config.auth.cookie_secure = true;
        assert!(create_session_cookie("abc", &config).contains("; Secure;"));
    }

    #[sqlx::test]
    async fn test_token_success_sets_cookie(pool: PgPool) {
        let (server, _state) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::User).await;

        let response = server
            .post("/api/auth/token")
            .form(&[("username", user.email.as_str()), ("password", TEST_PASSWORD)])
            .await;

        response.assert_status_ok();
        let body: TokenResponse = response.json();
        assert_eq!(body.token_type, "bearer");
        assert_eq!(session::verify_session_token(&body.access_token, &create_test_config()).unwrap(), user.email);

        let cookie = response.header("set-cookie");
        assert!(cookie.to_str().unwrap().starts_with(&format!("access_token={}", body.access_token)));
    }

    #[sqlx::test]
    async fn test_token_rejects_bad_credentials(pool: PgPool) {
        let (server, _state) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::User).await;

        let response = server
            .post("/api/auth/token")
            .form(&[("username", user.email.as_str()), ("password", "wrong-password")])
            .await;
        response.assert_status_unauthorized();
        assert_eq!(response.header("www-authenticate"), "Bearer");
        assert_eq!(response.json::<serde_json::Value>()["detail"], "Incorrect email or password");

        let response = server
            .post("/api/auth/token")
            .form(&[("username", "nobody@example.com"), ("password", TEST_PASSWORD)])
            .await;
        response.assert_status_unauthorized();
    }

    #[sqlx::test]
    async fn test_register_then_login(pool: PgPool) {
        let (server, _state) = create_test_app(pool.clone()).await;

        let response = server
            .post("/api/auth/register")
            .json(&json!({"email": "new@example.com", "full_name": "New Person", "password": "password123"}))
            .await;
        response.assert_status(StatusCode::CREATED);
        let user: UserResponse = response.json();
        assert_eq!(user.email, "new@example.com");
        assert_eq!(user.role, Role::User);

        server
            .post("/api/auth/token")
            .form(&[("username", "new@example.com"), ("password", "password123")])
            .await
            .assert_status_ok();
    }

    #[sqlx::test]
    async fn test_register_duplicate_email(pool: PgPool) {
        let (server, _state) = create_test_app(pool.clone()).await;
        let body = json!({"email": "dup@example.com", "full_name": "Dup", "password": "password123"});

        server.post("/api/auth/register").json(&body).await.assert_status(StatusCode::CREATED);
        let response = server.post("/api/auth/register").json(&body).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<serde_json::Value>()["detail"], "Email already registered");
    }

    #[sqlx::test]
    async fn test_register_validation(pool: PgPool) {
        let (server, _state) = create_test_app(pool.clone()).await;

        for body in [
            json!({"email": "not-an-email", "full_name": "X", "password": "password123"}),
            json!({"email": "a@example.com", "full_name": "  ", "password": "password123"}),
            json!({"email": "a@example.com", "full_name": "X", "password": "short"}),
        ] {
            server.post("/api/auth/register").json(&body).await.assert_status(StatusCode::BAD_REQUEST);
        }
    }

    #[sqlx::test]
    async fn test_register_disabled(pool: PgPool) {
        let mut config = create_test_config();
        config.auth.allow_registration = false;
        let (server, _state) = create_test_app_with_config(pool.clone(), config).await;

        server
            .post("/api/auth/register")
            .json(&json!({"email": "a@example.com", "full_name": "X", "password": "password123"}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[sqlx::test]
    async fn test_me_with_header_and_cookie(pool: PgPool) {
        let (server, _state) = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, Role::Attorney).await;

        let (name, value) = auth_header(&user);
        let me: UserResponse = server.get("/api/auth/me").add_header(name, value).await.json();
        assert_eq!(me.id, user.id);
        assert_eq!(me.role, Role::Attorney);

        let token = session::create_session_token(&user.email, &create_test_config()).unwrap();
        let me: UserResponse = server
            .get("/api/auth/me")
            .add_header("cookie", format!("access_token={token}"))
            .await
            .json();
        assert_eq!(me.id, user.id);
    }

    #[sqlx::test]
    async fn test_header_token_beats_cookie(pool: PgPool) {
        let (server, _state) = create_test_app(pool.clone()).await;
        let header_user = create_test_user(&pool, Role::User).await;
        let cookie_user = create_test_user(&pool, Role::Attorney).await;
        let config = create_test_config();

        let cookie_token = session::create_session_token(&cookie_user.email, &config).unwrap();
        let (name, value) = auth_header(&header_user);
        let me: UserResponse = server
            .get("/api/auth/me")
            .add_header(name, value)
            .add_header("cookie", format!("access_token={cookie_token}"))
            .await
            .json();
        assert_eq!(me.id, header_user.id);

        // An invalid header token does not fall back to a valid cookie
        server
            .get("/api/auth/me")
            .add_header("authorization", "Bearer not-a-token")
            .add_header("cookie", format!("access_token={cookie_token}"))
            .await
            .assert_status_unauthorized();
    }

    #[sqlx::test]
    async fn test_me_rejects_missing_expired_and_unknown(pool: PgPool) {
        let (server, _state) = create_test_app(pool.clone()).await;
        let config = create_test_config();

        let response = server.get("/api/auth/me").await;
        response.assert_status_unauthorized();
        assert_eq!(response.header("www-authenticate"), "Bearer");

        let expired = {
            use jsonwebtoken::{EncodingKey, Header, encode};
            let now = chrono::Utc::now().timestamp();
            let claims = session::TokenClaims {
                sub: "ghost@example.com".to_string(),
                exp: now - 60,
                iat: now - 120,
            };
            encode(&Header::default(), &claims, &EncodingKey::from_secret(config.secret_key.as_deref().unwrap().as_bytes())).unwrap()
        };
        server
            .get("/api/auth/me")
            .add_header("authorization", format!("Bearer {expired}"))
            .await
            .assert_status_unauthorized();

        // Valid signature, but no such account
        let unknown = session::create_session_token("ghost@example.com", &config).unwrap();
        server
            .get("/api/auth/me")
            .add_header("authorization", format!("Bearer {unknown}"))
            .await
            .assert_status_unauthorized();
    }

    #[sqlx::test]
    async fn test_logout_clears_cookie(pool: PgPool) {
        let (server, _state) = create_test_app(pool).await;

        let response = server.post("/api/auth/logout").await;
        response.assert_status_ok();
        let cookie = response.header("set-cookie");
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.starts_with("access_token=;"));
        assert!(cookie.contains("Max-Age=0"));
    }
}
