// src/routes/user_routes.rs

use axum::{
    extract::State,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgArguments, query::QueryAs, Postgres};
use uuid::Uuid;

use crate::{
    auth::{hash_password, verify_password},
    error::{db_error, user_write_error, ApiError},
    middleware::auth_context::AuthContext,
    models::*,
};

pub const MIN_PASSWORD_LEN: usize = 6;

/// Statuses in the order `appointment_counts_sql` expects them bound.
const COUNTED_STATUSES: [AppointmentStatus; 4] = [
    AppointmentStatus::Pending,
    AppointmentStatus::Confirmed,
    AppointmentStatus::Completed,
    AppointmentStatus::Cancelled,
];

/// Per-status counters over `appointments a`. The status codes are bind
/// parameters `$first..$first+3`; bind them with `bind_status_codes`.
pub fn appointment_counts_sql(first: usize) -> String {
    format!(
        r#"
        COUNT(*)                                AS total_appointments,
        COUNT(*) FILTER (WHERE a.status = ${})  AS pending,
        COUNT(*) FILTER (WHERE a.status = ${})  AS confirmed,
        COUNT(*) FILTER (WHERE a.status = ${})  AS completed,
        COUNT(*) FILTER (WHERE a.status = ${})  AS cancelled
        "#,
        first,
        first + 1,
        first + 2,
        first + 3
    )
}

pub fn bind_status_codes<'q, O>(
    query: QueryAs<'q, Postgres, O, PgArguments>,
) -> QueryAs<'q, Postgres, O, PgArguments> {
    COUNTED_STATUSES
        .into_iter()
        .fold(query, |q, status| q.bind(status))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
    /// Empty string clears the phone number.
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DoctorStats {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub counts: AppointmentCounts,
    pub total_patients: i64,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum UserStats {
    Doctor(DoctorStats),
    Appointments(AppointmentCounts),
}

#[derive(Debug, Serialize)]
pub struct UserStatsData {
    pub stats: UserStats,
}

pub fn router() -> Router<AppState> {
    Router::new()
        // /api/users/doctors
        .route("/doctors", get(list_doctors))
        // /api/users/profile
        .route("/profile", get(get_profile).put(update_profile))
        // /api/users/password
        .route("/password", put(change_password))
        // /api/users/stats
        .route("/stats", get(user_stats))
}

/* -------------------------
   Field validation (shared with auth/admin routes)
--------------------------*/

pub fn normalize_email(email: &str) -> Result<String, ApiError> {
    let e = email.trim().to_lowercase();
    let valid = match e.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !e.contains(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(ApiError::validation("a valid email is required"));
    }
    Ok(e)
}

pub fn validate_password(pw: &str) -> Result<(), ApiError> {
    if pw.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub fn normalize_full_name(full_name: &str) -> Result<String, ApiError> {
    let n = full_name.trim();
    if n.chars().count() < 2 {
        return Err(ApiError::validation(
            "full_name must be at least 2 characters",
        ));
    }
    Ok(n.to_string())
}

pub fn normalize_phone(phone: Option<&str>) -> Option<String> {
    phone
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

/* -------------------------
   Shared lookups
--------------------------*/

pub async fn load_public_user(state: &AppState, user_id: Uuid) -> Result<UserPublicRow, ApiError> {
    sqlx::query_as::<_, UserPublicRow>(
        r#"
        SELECT id, email, full_name, phone, role, created_at
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)?
    .ok_or_else(|| ApiError::not_found("user not found"))
}

/// Rejects `email` if another account already uses it.
pub async fn ensure_email_free(
    state: &AppState,
    email: &str,
    except: Option<Uuid>,
) -> Result<(), ApiError> {
    let taken: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM users
        WHERE email = $1
          AND ($2::uuid IS NULL OR id <> $2)
        "#,
    )
    .bind(email)
    .bind(except)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)?;

    match taken {
        Some(_) => Err(ApiError::email_taken()),
        None => Ok(()),
    }
}

/* -------------------------
   Handlers
--------------------------*/

pub async fn list_doctors(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<DoctorsData>>, ApiError> {
    let doctors: Vec<DoctorRow> = sqlx::query_as::<_, DoctorRow>(
        r#"
        SELECT id, email, full_name, phone, created_at
        FROM users
        WHERE role = $1
        ORDER BY full_name ASC
        "#,
    )
    .bind(Role::Doctor)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiOk::new(DoctorsData { doctors })))
}

pub async fn get_profile(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<UserData>>, ApiError> {
    let user = load_public_user(&state, auth.user_id).await?;
    Ok(Json(ApiOk::new(UserData { user })))
}

pub async fn update_profile(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ApiOk<UserData>>, ApiError> {
    if req.full_name.is_none() && req.phone.is_none() && req.email.is_none() {
        return Err(ApiError::validation("no changes provided"));
    }

    let existing = load_public_user(&state, auth.user_id).await?;

    let full_name = match req.full_name.as_deref() {
        Some(n) => normalize_full_name(n)?,
        None => existing.full_name.clone(),
    };
    let phone = match req.phone.as_deref() {
        Some(p) => normalize_phone(Some(p)),
        None => existing.phone.clone(),
    };
    let email = match req.email.as_deref() {
        Some(e) => {
            let e = normalize_email(e)?;
            ensure_email_free(&state, &e, Some(auth.user_id)).await?;
            e
        }
        None => existing.email.clone(),
    };

    let user: UserPublicRow = sqlx::query_as::<_, UserPublicRow>(
        r#"
        UPDATE users
        SET full_name = $1,
            phone = $2,
            email = $3
        WHERE id = $4
        RETURNING id, email, full_name, phone, role, created_at
        "#,
    )
    .bind(&full_name)
    .bind(phone.as_deref())
    .bind(&email)
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await
    .map_err(user_write_error)?;

    Ok(Json(ApiOk::with_message("Profile updated", UserData { user })))
}

pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<ApiOk<Empty>>, ApiError> {
    if req.current_password.is_empty() {
        return Err(ApiError::validation("current_password is required"));
    }
    validate_password(&req.new_password)?;

    // Load current hash
    let current_hash: String = sqlx::query_scalar(
        r#"
        SELECT password_hash
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)?
    .ok_or_else(|| ApiError::not_found("user not found"))?;

    if !verify_password(&req.current_password, &current_hash) {
        return Err(ApiError::Unauthorized(
            "INVALID_CREDENTIALS",
            "Current password is incorrect".into(),
        ));
    }

    let new_hash = hash_password(&req.new_password).map_err(ApiError::Internal)?;

    sqlx::query(
        r#"
        UPDATE users
        SET password_hash = $1
        WHERE id = $2
        "#,
    )
    .bind(new_hash)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    tracing::info!(user_id = %auth.user_id, "password changed");

    Ok(Json(ApiOk::with_message("Password changed", Empty {})))
}

pub async fn user_stats(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<UserStatsData>>, ApiError> {
    let stats = match auth.role {
        Role::Patient => {
            let sql = format!(
                "SELECT {} FROM appointments a WHERE a.patient_id = $1",
                appointment_counts_sql(2)
            );
            let counts = bind_status_codes(
                sqlx::query_as::<_, AppointmentCounts>(&sql).bind(auth.user_id),
            )
            .fetch_one(&state.db)
            .await
            .map_err(db_error)?;
            UserStats::Appointments(counts)
        }
        Role::Doctor => {
            let sql = format!(
                "SELECT {}, COUNT(DISTINCT a.patient_id) AS total_patients \
                 FROM appointments a WHERE a.doctor_id = $1",
                appointment_counts_sql(2)
            );
            let stats = bind_status_codes(sqlx::query_as::<_, DoctorStats>(&sql).bind(auth.user_id))
                .fetch_one(&state.db)
                .await
                .map_err(db_error)?;
            UserStats::Doctor(stats)
        }
        Role::Admin => {
            let sql = format!("SELECT {} FROM appointments a", appointment_counts_sql(1));
            let counts = bind_status_codes(sqlx::query_as::<_, AppointmentCounts>(&sql))
                .fetch_one(&state.db)
                .await
                .map_err(db_error)?;
            UserStats::Appointments(counts)
        }
    };

    Ok(Json(ApiOk::new(UserStatsData { stats })))
}
