//! Test database helpers
//!
//! Tests that hit the database expect `SIGNOFF_DATABASE_URL` to point at a
//! throwaway Postgres database and run with `--ignored`.

use sqlx::PgPool;

/// Connect to the test database and ensure the schema is migrated.
pub async fn test_pool() -> PgPool {
    let pool = super::create_pool()
        .await
        .expect("SIGNOFF_DATABASE_URL must point at a test database");

    super::migrate(&pool).await.expect("migrations run");

    pool
}

/// Reset the test database by truncating all workflow tables.
pub async fn reset_db(pool: &PgPool) {
    sqlx::query(
        r#"
        TRUNCATE TABLE
            workflow_completion_events,
            workflow_assignments,
            workflow_object_refs,
            workflow_instances,
            workflow_definitions
        CASCADE
        "#,
    )
    .execute(pool)
    .await
    .unwrap();
}
