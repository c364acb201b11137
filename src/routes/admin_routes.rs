// src/routes/admin_routes.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    auth::{generate_temp_password, hash_password},
    error::{db_error, tx_db_error, user_write_error, ApiError},
    middleware::auth_context::AuthContext,
    models::*,
    routes::user_routes::{
        appointment_counts_sql, bind_status_codes, ensure_email_free, normalize_email,
        normalize_full_name, normalize_phone, validate_password,
    },
    scheduling::parse_appointment_date,
};

fn ensure_admin(auth: &AuthContext) -> Result<(), ApiError> {
    if auth.role == Role::Admin {
        Ok(())
    } else {
        Err(ApiError::forbidden("Administrator access required"))
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(admin_stats))
        .route("/users", get(list_users).post(create_user))
        .route("/users/{user_id}", put(update_user).delete(delete_user))
        .route("/users/{user_id}/reset-password", post(reset_password))
        .route("/appointments", get(list_appointments))
}

/* ============================================================
   DTOs
   ============================================================ */

#[derive(Debug, Default, Serialize, sqlx::FromRow)]
pub struct UserCounts {
    pub total_users: i64,
    pub total_patients: i64,
    pub total_doctors: i64,
    pub total_admins: i64,
}

#[derive(Debug, Serialize)]
pub struct AdminStats {
    pub users: UserCounts,
    pub appointments: AppointmentCounts,
    pub today: i64,
    pub week: i64,
}

#[derive(Debug, Serialize)]
pub struct AdminStatsData {
    pub stats: AdminStats,
}

#[derive(Debug, Deserialize)]
pub struct UsersQuery {
    pub role: Option<Role>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub full_name: Option<String>,
    /// Empty string clears the phone number.
    pub phone: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    /// If omitted, a temporary password is generated and returned.
    pub new_password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResetPasswordData {
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporary_password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentsQuery {
    pub status: Option<AppointmentStatus>,
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

/* ============================================================
   GET /admin/stats
   ============================================================ */

pub async fn admin_stats(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<AdminStatsData>>, ApiError> {
    ensure_admin(&auth)?;

    let users: UserCounts = sqlx::query_as::<_, UserCounts>(
        r#"
        SELECT
          COUNT(*)                            AS total_users,
          COUNT(*) FILTER (WHERE role = $1)   AS total_patients,
          COUNT(*) FILTER (WHERE role = $2)   AS total_doctors,
          COUNT(*) FILTER (WHERE role = $3)   AS total_admins
        FROM users
        "#,
    )
    .bind(Role::Patient)
    .bind(Role::Doctor)
    .bind(Role::Admin)
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    let sql = format!("SELECT {} FROM appointments a", appointment_counts_sql(1));
    let appointments = bind_status_codes(sqlx::query_as::<_, AppointmentCounts>(&sql))
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?;

    let (today, week): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
          COUNT(*) FILTER (WHERE appointment_date::date = CURRENT_DATE),
          COUNT(*) FILTER (WHERE date_trunc('week', appointment_date) = date_trunc('week', now()))
        FROM appointments
        "#,
    )
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;

    Ok(Json(ApiOk::new(AdminStatsData {
        stats: AdminStats {
            users,
            appointments,
            today,
            week,
        },
    })))
}

/* ============================================================
   Users
   ============================================================ */

pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<UsersQuery>,
) -> Result<Json<ApiOk<UsersData>>, ApiError> {
    ensure_admin(&auth)?;

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT id, email, full_name, phone, role, created_at FROM users WHERE TRUE",
    );
    if let Some(role) = q.role {
        qb.push(" AND role = ").push_bind(role);
    }
    if let Some(search) = q.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", escape_like(search));
        qb.push(" AND (full_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    qb.push(" ORDER BY created_at DESC");

    let users: Vec<UserPublicRow> = qb
        .build_query_as::<UserPublicRow>()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(ApiOk::new(UsersData { users })))
}

pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<ApiOk<UserData>>), ApiError> {
    ensure_admin(&auth)?;

    let email = normalize_email(&req.email)?;
    validate_password(&req.password)?;
    let full_name = normalize_full_name(&req.full_name)?;
    let phone = normalize_phone(req.phone.as_deref());

    ensure_email_free(&state, &email, None).await?;

    let pw_hash = hash_password(&req.password).map_err(ApiError::Internal)?;

    let user: UserPublicRow = sqlx::query_as::<_, UserPublicRow>(
        r#"
        INSERT INTO users (email, password_hash, full_name, phone, role)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, email, full_name, phone, role, created_at
        "#,
    )
    .bind(&email)
    .bind(&pw_hash)
    .bind(&full_name)
    .bind(phone.as_deref())
    .bind(req.role)
    .fetch_one(&state.db)
    .await
    .map_err(user_write_error)?;

    tracing::info!(admin_id = %auth.user_id, user_id = %user.id, role = user.role.as_str(), "user created");

    Ok((
        StatusCode::CREATED,
        Json(ApiOk::with_message("User created", UserData { user })),
    ))
}

pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<ApiOk<UserData>>, ApiError> {
    ensure_admin(&auth)?;

    if req.full_name.is_none() && req.phone.is_none() && req.email.is_none() && req.role.is_none() {
        return Err(ApiError::validation("no changes provided"));
    }

    // The row lock makes a role change wait for in-flight bookings that
    // share-lock this user, so the live-appointment count below is final.
    let mut tx = state.db.begin().await.map_err(db_error)?;

    let existing: UserPublicRow = sqlx::query_as::<_, UserPublicRow>(
        r#"
        SELECT id, email, full_name, phone, role, created_at
        FROM users
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(db_error)?
    .ok_or_else(|| ApiError::not_found("user not found"))?;

    // Compute updates
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
            ensure_email_free(&state, &e, Some(user_id)).await?;
            e
        }
        None => existing.email.clone(),
    };
    let role = match req.role {
        Some(r) if r != existing.role => {
            ensure_role_change_allowed(&mut *tx, &auth, &existing, r).await?;
            r
        }
        _ => existing.role,
    };

    // Apply
    let user: UserPublicRow = sqlx::query_as::<_, UserPublicRow>(
        r#"
        UPDATE users
        SET full_name = $1,
            phone = $2,
            email = $3,
            role = $4
        WHERE id = $5
        RETURNING id, email, full_name, phone, role, created_at
        "#,
    )
    .bind(&full_name)
    .bind(phone.as_deref())
    .bind(&email)
    .bind(role)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(user_write_error)?;

    tx.commit().await.map_err(tx_db_error)?;

    if role != existing.role {
        tracing::info!(
            admin_id = %auth.user_id,
            %user_id,
            from = existing.role.as_str(),
            to = role.as_str(),
            "user role changed"
        );
    }

    Ok(Json(ApiOk::with_message("User updated", UserData { user })))
}

/// Admins cannot change their own role, and a doctor with live bookings keeps
/// the doctor role so every appointment still points at a doctor.
/// Run with the target row locked `FOR UPDATE`.
async fn ensure_role_change_allowed(
    conn: &mut PgConnection,
    auth: &AuthContext,
    target: &UserPublicRow,
    new_role: Role,
) -> Result<(), ApiError> {
    if target.id == auth.user_id {
        return Err(ApiError::validation("You cannot change your own role"));
    }
    if target.role == Role::Doctor && new_role != Role::Doctor {
        let live: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM appointments
            WHERE doctor_id = $1
              AND status <> $2
            "#,
        )
        .bind(target.id)
        .bind(AppointmentStatus::Cancelled)
        .fetch_one(&mut *conn)
        .await
        .map_err(db_error)?;

        if live > 0 {
            return Err(ApiError::validation(
                "This doctor still has active appointments",
            ));
        }
    }
    Ok(())
}

pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiOk<Empty>>, ApiError> {
    ensure_admin(&auth)?;

    if user_id == auth.user_id {
        return Err(ApiError::validation("You cannot delete your own account"));
    }

    let res = sqlx::query(
        r#"
        DELETE FROM users
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("user not found"));
    }

    tracing::info!(admin_id = %auth.user_id, %user_id, "user deleted");

    Ok(Json(ApiOk::with_message("User deleted", Empty {})))
}

pub async fn reset_password(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<ApiOk<ResetPasswordData>>, ApiError> {
    ensure_admin(&auth)?;

    let (new_pw, temporary_password) =
        match req.new_password.as_deref().filter(|s| !s.is_empty()) {
            Some(pw) => {
                validate_password(pw)?;
                (pw.to_string(), None)
            }
            None => {
                let temp = generate_temp_password();
                (temp.clone(), Some(temp))
            }
        };

    let new_hash = hash_password(&new_pw).map_err(ApiError::Internal)?;

    let res = sqlx::query(
        r#"
        UPDATE users
        SET password_hash = $1
        WHERE id = $2
        "#,
    )
    .bind(new_hash)
    .bind(user_id)
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("user not found"));
    }

    tracing::info!(admin_id = %auth.user_id, %user_id, "password reset");

    Ok(Json(ApiOk::with_message(
        "Password reset",
        ResetPasswordData {
            user_id,
            temporary_password,
        },
    )))
}

/* ============================================================
   GET /admin/appointments
   ============================================================ */

pub async fn list_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<AppointmentsQuery>,
) -> Result<Json<ApiOk<AppointmentsData>>, ApiError> {
    ensure_admin(&auth)?;

    let from = q.date_from.as_deref().map(|d| parse_date_bound(d, false)).transpose()?;
    let to = q.date_to.as_deref().map(|d| parse_date_bound(d, true)).transpose()?;

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(APPOINTMENT_VIEW_SELECT);
    qb.push(" WHERE TRUE");
    if let Some(status) = q.status {
        qb.push(" AND a.status = ").push_bind(status);
    }
    if let Some(doctor_id) = q.doctor_id {
        qb.push(" AND a.doctor_id = ").push_bind(doctor_id);
    }
    if let Some(patient_id) = q.patient_id {
        qb.push(" AND a.patient_id = ").push_bind(patient_id);
    }
    if let Some(from) = from {
        qb.push(" AND a.appointment_date >= ").push_bind(from);
    }
    if let Some(to) = to {
        qb.push(" AND a.appointment_date < ").push_bind(to);
    }
    qb.push(" ORDER BY a.appointment_date DESC");

    let appointments: Vec<AppointmentView> = qb
        .build_query_as::<AppointmentView>()
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(ApiOk::new(AppointmentsData { appointments })))
}

/// Date filters take a plain `YYYY-MM-DD` (whole day, inclusive on both ends)
/// or a full date-time. Returns an exclusive upper bound when `upper` is set.
fn parse_date_bound(raw: &str, upper: bool) -> Result<DateTime<Utc>, ApiError> {
    let s = raw.trim();
    if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let midnight = day.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc()).ok_or_else(|| {
            ApiError::validation("invalid date")
        })?;
        return Ok(if upper { midnight + Duration::days(1) } else { midnight });
    }
    let at = parse_appointment_date(s)?;
    Ok(if upper { at + Duration::seconds(1) } else { at })
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::appointment_routes::{begin_serializable, lock_booking_parties};
    use crate::test_support::{caller, insert_appointment, insert_user, state};
    use chrono::TimeZone;
    use sqlx::PgPool;

    #[test]
    fn date_only_bounds_cover_whole_day() {
        let from = parse_date_bound("2025-03-10", false).unwrap();
        let to = parse_date_bound("2025-03-10", true).unwrap();
        assert_eq!(from, Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2025, 3, 11, 0, 0, 0).unwrap());
    }

    #[test]
    fn datetime_bounds_are_inclusive() {
        let to = parse_date_bound("2025-03-10T10:00:00Z", true).unwrap();
        assert_eq!(to, Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 1).unwrap());
        assert!(parse_date_bound("yesterday", false).is_err());
    }

    #[test]
    fn like_patterns_are_escaped() {
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn admin_guard() {
        let mk = |role| AuthContext {
            user_id: Uuid::new_v4(),
            email: "x@example.com".into(),
            role,
        };
        assert!(ensure_admin(&mk(Role::Admin)).is_ok());
        assert_eq!(
            ensure_admin(&mk(Role::Doctor)).unwrap_err().status_code(),
            StatusCode::FORBIDDEN
        );
        assert!(ensure_admin(&mk(Role::Patient)).is_err());
    }

    #[test]
    fn users_query_parses_role_filter() {
        let q: UsersQuery = serde_json::from_str(r#"{"role":"doctor","search":"smith"}"#).unwrap();
        assert_eq!(q.role, Some(Role::Doctor));
        assert_eq!(q.search.as_deref(), Some("smith"));
    }

    fn role_change(role: Role) -> Json<UpdateUserRequest> {
        Json(UpdateUserRequest {
            full_name: None,
            phone: None,
            email: None,
            role: Some(role),
        })
    }

    async fn stored_role(pool: &PgPool, user_id: Uuid) -> Role {
        sqlx::query_scalar("SELECT role FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn demotion_waits_for_in_flight_booking(pool: PgPool) {
        let state = state(pool.clone());
        let admin = insert_user(&pool, "admin@example.com", Role::Admin).await;
        let doctor = insert_user(&pool, "doc@example.com", Role::Doctor).await;
        let patient = insert_user(&pool, "pat@example.com", Role::Patient).await;

        // A booking that has validated the doctor but not yet inserted.
        let mut tx = begin_serializable(&state).await.unwrap();
        lock_booking_parties(&mut *tx, patient, doctor).await.unwrap();

        let demote = tokio::spawn(update_user(
            State(state.clone()),
            caller(admin, Role::Admin),
            Path(doctor),
            role_change(Role::Patient),
        ));
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        assert!(!demote.is_finished(), "role change must wait for the booking");

        let start = Utc.with_ymd_and_hms(2030, 3, 10, 10, 0, 0).unwrap();
        sqlx::query(
            r#"
            INSERT INTO appointments (patient_id, doctor_id, appointment_date, duration, ends_at, status)
            VALUES ($1, $2, $3, 30, $4, $5)
            "#,
        )
        .bind(patient)
        .bind(doctor)
        .bind(start)
        .bind(start + Duration::minutes(30))
        .bind(AppointmentStatus::Pending)
        .execute(&mut *tx)
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let res = demote.await.unwrap();
        assert!(matches!(res, Err(ApiError::BadRequest("VALIDATION_ERROR", _))));
        assert_eq!(stored_role(&pool, doctor).await, Role::Doctor);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn role_change_guards(pool: PgPool) {
        let state = state(pool.clone());
        let admin = insert_user(&pool, "admin@example.com", Role::Admin).await;
        let busy = insert_user(&pool, "busy@example.com", Role::Doctor).await;
        let idle = insert_user(&pool, "idle@example.com", Role::Doctor).await;
        let patient = insert_user(&pool, "pat@example.com", Role::Patient).await;

        let start = Utc.with_ymd_and_hms(2030, 3, 10, 10, 0, 0).unwrap();
        insert_appointment(&pool, patient, busy, start, AppointmentStatus::Confirmed)
            .await
            .unwrap();
        insert_appointment(&pool, patient, idle, start, AppointmentStatus::Cancelled)
            .await
            .unwrap();

        let res = update_user(State(state.clone()), caller(admin, Role::Admin), Path(busy), role_change(Role::Patient)).await;
        assert!(res.is_err());
        assert_eq!(stored_role(&pool, busy).await, Role::Doctor);

        // Only cancelled bookings left: demotion goes through.
        let Json(body) = update_user(State(state.clone()), caller(admin, Role::Admin), Path(idle), role_change(Role::Patient))
            .await
            .unwrap();
        assert_eq!(body.data.user.role, Role::Patient);

        let res = update_user(State(state.clone()), caller(admin, Role::Admin), Path(admin), role_change(Role::Doctor)).await;
        assert!(res.is_err());
        assert_eq!(stored_role(&pool, admin).await, Role::Admin);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn stats_count_roles_and_statuses(pool: PgPool) {
        let state = state(pool.clone());
        let admin = insert_user(&pool, "admin@example.com", Role::Admin).await;
        let doctor = insert_user(&pool, "doc@example.com", Role::Doctor).await;
        let patient = insert_user(&pool, "pat@example.com", Role::Patient).await;

        let ten = Utc.with_ymd_and_hms(2030, 3, 10, 10, 0, 0).unwrap();
        insert_appointment(&pool, patient, doctor, ten, AppointmentStatus::Completed)
            .await
            .unwrap();
        insert_appointment(&pool, patient, doctor, ten, AppointmentStatus::Cancelled)
            .await
            .unwrap();

        let Json(body) = admin_stats(State(state.clone()), caller(admin, Role::Admin)).await.unwrap();
        let stats = body.data.stats;
        assert_eq!(stats.users.total_users, 3);
        assert_eq!(stats.users.total_patients, 1);
        assert_eq!(stats.users.total_doctors, 1);
        assert_eq!(stats.users.total_admins, 1);
        assert_eq!(stats.appointments.total_appointments, 2);
        assert_eq!(stats.appointments.completed, 1);
        assert_eq!(stats.appointments.cancelled, 1);
        assert_eq!(stats.appointments.pending, 0);
    }
}
