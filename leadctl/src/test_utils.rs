//! Test utilities shared by handler and repository tests.

use crate::{
    AppState,
    api::models::users::{Role, UserResponse},
    auth::{
        password::{self, Argon2Params},
        session,
    },
    config::{Config, EmailConfig, EmailTransportConfig, PasswordConfig},
    db::{
        handlers::{Repository, Users},
        models::users::UserCreateDBRequest,
    },
};
use axum_test::TestServer;
use sqlx::PgPool;
use uuid::Uuid;

/// Password given to every user made by [`create_test_user`]
pub const TEST_PASSWORD: &str = "password123";

pub async fn create_test_app(pool: PgPool) -> (TestServer, AppState) {
    create_test_app_with_config(pool, create_test_config()).await
}

pub async fn create_test_app_with_config(pool: PgPool, config: Config) -> (TestServer, AppState) {
    let app = crate::Application::new_with_pool(config, Some(pool))
        .await
        .expect("Failed to create application");

    app.into_test_server()
}

pub fn create_test_config() -> Config {
    // Each app gets its own upload directory so tests can count stored files
    let uploads_dir = std::env::temp_dir().join(format!("leadctl-test-uploads-{}", Uuid::new_v4().simple()));

    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        email: EmailConfig {
            transport: EmailTransportConfig::Log { capacity: 100 },
            ..Default::default()
        },
        ..Default::default()
    };
    config.auth.cookie_secure = false;
    // Fast hashing for tests
    config.auth.password = PasswordConfig {
        argon2_memory_kib: 1024,
        argon2_iterations: 1,
        argon2_parallelism: 1,
        ..Default::default()
    };
    config.uploads.dir = uploads_dir;
    config
}

pub async fn create_test_user(pool: &PgPool, role: Role) -> UserResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let email = format!("testuser_{}@example.com", Uuid::new_v4().simple());
    let params = Argon2Params::from(&create_test_config().auth.password);
    let password_hash = password::hash_string_with_params(TEST_PASSWORD, Some(params)).expect("Failed to hash test password");

    let user = Users::new(&mut conn)
        .create(&UserCreateDBRequest {
            email,
            full_name: "Test User".to_string(),
            password_hash,
            role,
        })
        .await
        .expect("Failed to create test user");
    UserResponse::from(user)
}

/// `Authorization` header carrying a fresh token for `user`
pub fn auth_header(user: &UserResponse) -> (String, String) {
    let token = session::create_session_token(&user.email, &create_test_config()).expect("Failed to create test token");
    ("authorization".to_string(), format!("Bearer {token}"))
}

/// How the `role` column looks in a legacy `users` table
#[derive(Debug, Clone, Copy)]
pub enum LegacyRoleColumn {
    /// Created before roles existed; only `is_attorney` marks attorneys
    Missing,
    /// Declared as a model enum, stored in a `userrole` type
    Enum,
    /// Added later by hand as free text
    Varchar,
}

/// Build the `users`/`leads` tables written by the earlier deployment, on an empty database.
///
/// Seeds an attorney (`counsel@legacy.example`, flagged through `is_attorney`), a plain user
/// with NULL name and timestamps, and one lead reached out to by the attorney.
pub async fn create_legacy_schema(pool: &PgPool, role_column: LegacyRoleColumn) {
    let role_definition = match role_column {
        LegacyRoleColumn::Missing => "",
        LegacyRoleColumn::Enum => "role userrole,",
        LegacyRoleColumn::Varchar => "role VARCHAR(50) DEFAULT 'USER' NOT NULL,",
    };

    let statements = [
        "CREATE TYPE userrole AS ENUM ('USER', 'ATTORNEY')".to_string(),
        "CREATE TYPE leadstate AS ENUM ('PENDING', 'REACHED_OUT')".to_string(),
        format!(
            r#"
            CREATE TABLE users (
                id SERIAL PRIMARY KEY,
                email VARCHAR UNIQUE,
                hashed_password VARCHAR,
                full_name VARCHAR,
                {role_definition}
                is_attorney INTEGER,
                created_at TIMESTAMP WITHOUT TIME ZONE,
                updated_at TIMESTAMP WITHOUT TIME ZONE
            )
            "#
        ),
        r#"
        CREATE TABLE leads (
            id SERIAL PRIMARY KEY,
            first_name VARCHAR NOT NULL,
            last_name VARCHAR NOT NULL,
            email VARCHAR NOT NULL,
            resume_path VARCHAR,
            state leadstate,
            notes TEXT,
            created_at TIMESTAMP WITHOUT TIME ZONE,
            updated_at TIMESTAMP WITHOUT TIME ZONE,
            reached_out_by INTEGER REFERENCES users (id),
            reached_out_at TIMESTAMP WITHOUT TIME ZONE
        )
        "#
        .to_string(),
    ];
    for statement in &statements {
        sqlx::query(statement).execute(pool).await.expect("Failed to create legacy table");
    }

    let attorney_role = match role_column {
        LegacyRoleColumn::Missing => "",
        LegacyRoleColumn::Enum | LegacyRoleColumn::Varchar => ", role",
    };
    let attorney_role_value = match role_column {
        LegacyRoleColumn::Missing => "",
        LegacyRoleColumn::Enum | LegacyRoleColumn::Varchar => ", 'ATTORNEY'",
    };
    sqlx::query(&format!(
        r#"
        INSERT INTO users (email, hashed_password, full_name, is_attorney, created_at, updated_at{attorney_role})
        VALUES ('counsel@legacy.example', '$2b$12$legacybcrypthashlegacybcrypthashlegacybcrypthash12', 'Legacy Counsel', 1,
                '2024-05-01 10:00:00', '2024-05-01 10:00:00'{attorney_role_value})
        "#
    ))
    .execute(pool)
    .await
    .expect("Failed to seed legacy attorney");

    sqlx::query("INSERT INTO users (email, hashed_password, is_attorney) VALUES ('client@legacy.example', 'x', 0)")
        .execute(pool)
        .await
        .expect("Failed to seed legacy user");

    sqlx::query(
        r#"
        INSERT INTO leads (first_name, last_name, email, resume_path, state, created_at, updated_at, reached_out_by, reached_out_at)
        VALUES ('Ada', 'Lovelace', 'ada@example.com', 'legacy.pdf', 'REACHED_OUT',
                '2024-05-02 09:30:00', '2024-05-03 12:00:00', 1, '2024-05-03 12:00:00')
        "#,
    )
    .execute(pool)
    .await
    .expect("Failed to seed legacy lead");
}
