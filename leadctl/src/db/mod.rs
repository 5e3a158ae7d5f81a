//! Database layer for data persistence and access.
//!
//! - [`handlers`]: repositories, one per table
//! - [`models`]: request and response records passed to and from the repositories
//! - [`errors`]: database error classification
//!
//! Schema changes live in `migrations/` and are applied at startup by [`crate::migrator`].
//! The migrations leave existing `users` and `leads` tables alone, so [`upgrade_legacy_schema`]
//! runs after them to reshape tables created by the earlier deployment.

pub mod errors;
pub mod handlers;
pub mod models;

use sqlx::{PgConnection, PgPool};
use tracing::{info, instrument, warn};

/// Column types the repositories decode, as `(table, column, udt_name, ALTER target)`.
///
/// `leads.reached_out_by` comes before `users.id` so the foreign key is never narrower than the
/// key it references.
const COLUMN_TYPES: &[(&str, &str, &str, &str)] = &[
    ("leads", "reached_out_by", "int8", "BIGINT"),
    ("users", "id", "int8", "BIGINT"),
    ("leads", "id", "int8", "BIGINT"),
    ("users", "role", "user_role", "user_role USING upper(btrim(role::text))::user_role"),
    ("leads", "state", "lead_state", "lead_state USING upper(btrim(state::text))::lead_state"),
    ("users", "created_at", "timestamptz", "TIMESTAMPTZ USING created_at AT TIME ZONE 'UTC'"),
    ("users", "updated_at", "timestamptz", "TIMESTAMPTZ USING updated_at AT TIME ZONE 'UTC'"),
    ("leads", "created_at", "timestamptz", "TIMESTAMPTZ USING created_at AT TIME ZONE 'UTC'"),
    ("leads", "updated_at", "timestamptz", "TIMESTAMPTZ USING updated_at AT TIME ZONE 'UTC'"),
    ("leads", "reached_out_at", "timestamptz", "TIMESTAMPTZ USING reached_out_at AT TIME ZONE 'UTC'"),
];

/// Columns the repositories read as non-null, with the value backfilled into legacy NULLs and
/// the default new rows get.
const REQUIRED_COLUMNS: &[(&str, &str, &str, Option<&str>)] = &[
    ("users", "password_hash", "''", None),
    ("users", "full_name", "''", None),
    ("users", "role", "'USER'", Some("'USER'")),
    ("users", "created_at", "NOW()", Some("NOW()")),
    ("users", "updated_at", "NOW()", Some("NOW()")),
    ("leads", "resume_path", "''", None),
    ("leads", "state", "'PENDING'", Some("'PENDING'")),
    ("leads", "created_at", "NOW()", Some("NOW()")),
    ("leads", "updated_at", "NOW()", Some("NOW()")),
];

/// `udt_name` of a column in the current schema, `None` when the column does not exist
async fn column_type(conn: &mut PgConnection, table: &str, column: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        r#"
        SELECT udt_name::text FROM information_schema.columns
        WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2
        "#,
    )
    .bind(table)
    .bind(column)
    .fetch_optional(conn)
    .await
}

async fn column_exists(conn: &mut PgConnection, table: &str, column: &str) -> Result<bool, sqlx::Error> {
    Ok(column_type(conn, table, column).await?.is_some())
}

/// `(nullable, has_default)` for an existing column
async fn column_constraints(conn: &mut PgConnection, table: &str, column: &str) -> Result<Option<(bool, bool)>, sqlx::Error> {
    sqlx::query_as::<_, (bool, bool)>(
        r#"
        SELECT is_nullable = 'YES', column_default IS NOT NULL FROM information_schema.columns
        WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2
        "#,
    )
    .bind(table)
    .bind(column)
    .fetch_optional(conn)
    .await
}

/// Apply every pending legacy fix in one transaction, returning a description of each change.
async fn try_upgrade_legacy_schema(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut changes = Vec::new();

    if !column_exists(&mut tx, "users", "password_hash").await? && column_exists(&mut tx, "users", "hashed_password").await? {
        sqlx::query("ALTER TABLE users RENAME COLUMN hashed_password TO password_hash")
            .execute(&mut *tx)
            .await?;
        changes.push("renamed users.hashed_password to password_hash".to_string());
    }

    if !column_exists(&mut tx, "users", "role").await? {
        sqlx::query("ALTER TABLE users ADD COLUMN role user_role NOT NULL DEFAULT 'USER'")
            .execute(&mut *tx)
            .await?;
        changes.push("added users.role".to_string());

        if column_exists(&mut tx, "users", "is_attorney").await? {
            let promoted = sqlx::query("UPDATE users SET role = 'ATTORNEY' WHERE is_attorney = 1")
                .execute(&mut *tx)
                .await?
                .rows_affected();
            info!(promoted, "Carried legacy attorney flags over to roles");
        }
    }

    for &(table, column, expected, target) in COLUMN_TYPES {
        let Some(actual) = column_type(&mut tx, table, column).await? else {
            continue;
        };
        if actual == expected {
            continue;
        }
        // A default of the old type would block the conversion; REQUIRED_COLUMNS restores it
        sqlx::query(&format!("ALTER TABLE {table} ALTER COLUMN {column} DROP DEFAULT"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("ALTER TABLE {table} ALTER COLUMN {column} TYPE {target}"))
            .execute(&mut *tx)
            .await?;
        if column == "id" {
            restore_id_sequence(&mut tx, table).await?;
        }
        changes.push(format!("converted {table}.{column} from {actual} to {expected}"));
    }

    for &(table, column, fill, default) in REQUIRED_COLUMNS {
        let Some((nullable, has_default)) = column_constraints(&mut tx, table, column).await? else {
            continue;
        };
        if let Some(default) = default.filter(|_| !has_default) {
            sqlx::query(&format!("ALTER TABLE {table} ALTER COLUMN {column} SET DEFAULT {default}"))
                .execute(&mut *tx)
                .await?;
            changes.push(format!("set default for {table}.{column}"));
        }
        if !nullable {
            continue;
        }
        let filled = sqlx::query(&format!("UPDATE {table} SET {column} = {fill} WHERE {column} IS NULL"))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query(&format!("ALTER TABLE {table} ALTER COLUMN {column} SET NOT NULL"))
            .execute(&mut *tx)
            .await?;
        changes.push(format!("made {table}.{column} required ({filled} rows backfilled)"));
    }

    tx.commit().await?;
    Ok(changes)
}

/// Re-attach the serial default dropped while widening an id column, and widen its sequence.
async fn restore_id_sequence(conn: &mut PgConnection, table: &str) -> Result<(), sqlx::Error> {
    let sequence: Option<String> = sqlx::query_scalar("SELECT pg_get_serial_sequence($1, 'id')")
        .bind(table)
        .fetch_one(&mut *conn)
        .await?;
    let Some(sequence) = sequence else {
        return Ok(());
    };

    sqlx::query(&format!("ALTER SEQUENCE {sequence} AS BIGINT"))
        .execute(&mut *conn)
        .await?;
    sqlx::query(&format!("ALTER TABLE {table} ALTER COLUMN id SET DEFAULT nextval('{sequence}'::regclass)"))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Bring a `users`/`leads` pair created by the earlier deployment up to the current schema.
///
/// - the `hashed_password` column is renamed to `password_hash`
/// - a missing `role` column is added, and users flagged through the legacy integer
///   `is_attorney` column become attorneys while everyone else defaults to `USER`
/// - an existing `role` or `state` column stored as a free-form enum or `VARCHAR` is converted
///   to `user_role` / `lead_state`
/// - integer ids become `BIGINT` and naive timestamps are read as UTC
/// - NULLs in columns the repositories require are backfilled
///
/// Safe to run on every startup: it does nothing once the schema is current. Failures are
/// logged and swallowed so a half-migrated database still boots.
#[instrument(skip(pool))]
pub async fn upgrade_legacy_schema(pool: &PgPool) {
    match try_upgrade_legacy_schema(pool).await {
        Ok(changes) if changes.is_empty() => {}
        Ok(changes) => info!(?changes, "Upgraded legacy schema"),
        Err(e) => warn!(error = %e, "Legacy schema upgrade failed, continuing"),
    }
}
