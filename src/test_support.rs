//! Fixtures for tests that run against a migrated database (`#[sqlx::test]`).

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    auth::TokenKeys,
    middleware::auth_context::AuthContext,
    models::{AppState, AppointmentStatus, Role},
};

pub fn state(db: PgPool) -> AppState {
    AppState {
        db,
        tokens: TokenKeys::new("test-secret", Duration::hours(1)),
    }
}

pub fn caller(user_id: Uuid, role: Role) -> AuthContext {
    AuthContext {
        user_id,
        email: format!("{user_id}@example.com"),
        role,
    }
}

pub async fn insert_user(db: &PgPool, email: &str, role: Role) -> Uuid {
    sqlx::query_scalar(
        r#"
        INSERT INTO users (email, password_hash, full_name, role)
        VALUES ($1, 'not-a-hash', $2, $3)
        RETURNING id
        "#,
    )
    .bind(email)
    .bind(format!("User {email}"))
    .bind(role)
    .fetch_one(db)
    .await
    .unwrap()
}

/// Writes a 30 minute appointment directly, bypassing the handlers.
pub async fn insert_appointment(
    db: &PgPool,
    patient_id: Uuid,
    doctor_id: Uuid,
    start: DateTime<Utc>,
    status: AppointmentStatus,
) -> Result<Uuid, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        INSERT INTO appointments
            (patient_id, doctor_id, appointment_date, duration, ends_at, status)
        VALUES
            ($1, $2, $3, 30, $4, $5)
        RETURNING id
        "#,
    )
    .bind(patient_id)
    .bind(doctor_id)
    .bind(start)
    .bind(start + Duration::minutes(30))
    .bind(status)
    .fetch_one(db)
    .await
}
