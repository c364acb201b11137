// src/routes/appointment_routes.rs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Deserializer};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::{
    error::{booking_db_error, db_error, tx_db_error, ApiError},
    lifecycle::{authorize_transition, ensure_access, ensure_can_reschedule},
    middleware::auth_context::AuthContext,
    models::*,
    scheduling::{check_doctor_availability, parse_appointment_date, validate_duration, Slot},
};

/*
Visibility:
patient -> own bookings
doctor  -> own schedule
admin   -> everything
*/

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_appointments).post(create_appointment))
        .route(
            "/{appointment_id}",
            get(get_appointment)
                .put(update_appointment)
                .delete(delete_appointment),
        )
}

/* ============================================================
   Request DTOs
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub doctor_id: Uuid,
    pub appointment_date: String,
    pub duration: Option<i32>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub status: Option<AppointmentStatus>,
    /// Absent keeps the notes, `null` (or blank) clears them.
    #[serde(default, deserialize_with = "present")]
    pub notes: Option<Option<String>>,
    pub appointment_date: Option<String>,
}

/// Tells an explicit `null` apart from a missing key.
fn present<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/* ============================================================
   Shared loaders
   ============================================================ */

pub async fn load_appointment_view(
    state: &AppState,
    appointment_id: Uuid,
) -> Result<AppointmentView, ApiError> {
    let sql = format!("{APPOINTMENT_VIEW_SELECT} WHERE a.id = $1");
    sqlx::query_as::<_, AppointmentView>(&sql)
        .bind(appointment_id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("appointment not found"))
}

async fn load_appointment_row(
    conn: &mut PgConnection,
    appointment_id: Uuid,
) -> Result<AppointmentRow, ApiError> {
    sqlx::query_as::<_, AppointmentRow>(
        r#"
        SELECT id, patient_id, doctor_id, appointment_date, duration, status, notes
        FROM appointments
        WHERE id = $1
        "#,
    )
    .bind(appointment_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_error)?
    .ok_or_else(|| ApiError::not_found("appointment not found"))
}

pub(crate) async fn begin_serializable(
    state: &AppState,
) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, ApiError> {
    let mut tx = state.db.begin().await.map_err(db_error)?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
    Ok(tx)
}

/// Share-locks the patient and doctor rows until the booking commits, so a
/// concurrent account deletion or role change waits for it (and then sees it).
/// Fails if the caller's account is gone or the doctor is not a doctor.
pub(crate) async fn lock_booking_parties(
    conn: &mut PgConnection,
    patient_id: Uuid,
    doctor_id: Uuid,
) -> Result<(), ApiError> {
    let patient: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM users WHERE id = $1 FOR SHARE
        "#,
    )
    .bind(patient_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(tx_db_error)?;

    if patient.is_none() {
        tracing::warn!(%patient_id, "booking by a deleted account");
        return Err(ApiError::token_invalid());
    }

    let doctor_role: Option<Role> = sqlx::query_scalar(
        r#"
        SELECT role FROM users WHERE id = $1 FOR SHARE
        "#,
    )
    .bind(doctor_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(tx_db_error)?;

    if doctor_role != Some(Role::Doctor) {
        return Err(ApiError::BadRequest("INVALID_DOCTOR", "Invalid doctor".into()));
    }
    Ok(())
}

/* ============================================================
   GET /appointments
   ============================================================ */

pub async fn list_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<AppointmentsData>>, ApiError> {
    let filter = match auth.role {
        Role::Patient => Some("WHERE a.patient_id = $1"),
        Role::Doctor => Some("WHERE a.doctor_id = $1"),
        Role::Admin => None,
    };
    let sql = format!(
        "{APPOINTMENT_VIEW_SELECT} {} ORDER BY a.appointment_date DESC",
        filter.unwrap_or_default()
    );

    let mut query = sqlx::query_as::<_, AppointmentView>(&sql);
    if filter.is_some() {
        query = query.bind(auth.user_id);
    }
    let appointments: Vec<AppointmentView> = query
        .fetch_all(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(ApiOk::new(AppointmentsData { appointments })))
}

/* ============================================================
   GET /appointments/{id}
   ============================================================ */

pub async fn get_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentData>>, ApiError> {
    let appointment = load_appointment_view(&state, appointment_id).await?;
    ensure_access(&auth, appointment.patient_id, appointment.doctor_id)?;
    Ok(Json(ApiOk::new(AppointmentData { appointment })))
}

/* ============================================================
   POST /appointments (create)
   ============================================================ */

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<ApiOk<AppointmentData>>), ApiError> {
    if auth.role != Role::Patient {
        return Err(ApiError::forbidden("Only patients can book appointments"));
    }

    let start = parse_appointment_date(&req.appointment_date)?;
    let duration = validate_duration(req.duration)?;
    let slot = Slot::new(start, duration);
    let reason = req
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string);

    let mut tx = begin_serializable(&state).await?;

    lock_booking_parties(&mut *tx, auth.user_id, req.doctor_id).await?;

    if let Some(clash) = check_doctor_availability(&mut *tx, req.doctor_id, &slot, None)
        .await
        .map_err(booking_db_error)?
    {
        tracing::warn!(
            doctor_id = %req.doctor_id,
            requested = %slot.start,
            existing = %clash.id,
            "booking rejected: slot taken"
        );
        return Err(ApiError::slot_unavailable());
    }

    let appointment_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO appointments
            (patient_id, doctor_id, appointment_date, duration, ends_at, status, reason)
        VALUES
            ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id
        "#,
    )
    .bind(auth.user_id)
    .bind(req.doctor_id)
    .bind(slot.start)
    .bind(slot.duration_minutes)
    .bind(slot.end())
    .bind(AppointmentStatus::Pending)
    .bind(reason)
    .fetch_one(&mut *tx)
    .await
    .map_err(booking_db_error)?;

    tx.commit().await.map_err(booking_db_error)?;

    tracing::info!(
        %appointment_id,
        patient_id = %auth.user_id,
        doctor_id = %req.doctor_id,
        start = %slot.start,
        duration,
        "appointment booked"
    );

    let appointment = load_appointment_view(&state, appointment_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiOk::with_message(
            "Appointment created",
            AppointmentData { appointment },
        )),
    ))
}

/* ============================================================
   PUT /appointments/{id}
   ============================================================ */

pub async fn update_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<UpdateAppointmentRequest>,
) -> Result<Json<ApiOk<AppointmentData>>, ApiError> {
    if req.status.is_none() && req.notes.is_none() && req.appointment_date.is_none() {
        return Err(ApiError::validation("no changes provided"));
    }

    let mut tx = begin_serializable(&state).await?;

    let current = load_appointment_row(&mut *tx, appointment_id).await?;
    ensure_access(&auth, current.patient_id, current.doctor_id)?;

    let status = match req.status {
        Some(next) => {
            authorize_transition(auth.role, current.status, next).inspect_err(|_| {
                tracing::warn!(
                    %appointment_id,
                    user_id = %auth.user_id,
                    from = ?current.status,
                    to = ?next,
                    "status change denied"
                );
            })?;
            next
        }
        None => current.status,
    };

    let start = match req.appointment_date.as_deref() {
        Some(raw) => {
            ensure_can_reschedule(auth.role, current.status)?;
            parse_appointment_date(raw)?
        }
        None => current.appointment_date,
    };
    let slot = Slot::new(start, current.duration);

    let moved = start != current.appointment_date;
    let reopened = current.status == AppointmentStatus::Cancelled && status != AppointmentStatus::Cancelled;
    let claims_slot = status != AppointmentStatus::Cancelled && (moved || reopened);
    // A serialization failure only means "slot taken" when this write claims one.
    let write_error: fn(sqlx::Error) -> ApiError = if claims_slot {
        booking_db_error
    } else {
        tx_db_error
    };
    if claims_slot {
        let clash = check_doctor_availability(&mut *tx, current.doctor_id, &slot, Some(appointment_id))
            .await
            .map_err(booking_db_error)?;
        if let Some(clash) = clash {
            tracing::warn!(
                %appointment_id,
                doctor_id = %current.doctor_id,
                existing = %clash.id,
                "update rejected: slot taken"
            );
            return Err(ApiError::slot_unavailable());
        }
    }

    let notes = match req.notes {
        Some(n) => n
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string),
        None => current.notes,
    };

    sqlx::query(
        r#"
        UPDATE appointments
        SET appointment_date = $2,
            ends_at = $3,
            status = $4,
            notes = $5,
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(appointment_id)
    .bind(slot.start)
    .bind(slot.end())
    .bind(status)
    .bind(notes)
    .execute(&mut *tx)
    .await
    .map_err(write_error)?;

    tx.commit().await.map_err(write_error)?;

    if status != current.status {
        tracing::info!(
            %appointment_id,
            user_id = %auth.user_id,
            from = ?current.status,
            to = ?status,
            "appointment status changed"
        );
    }

    let appointment = load_appointment_view(&state, appointment_id).await?;
    Ok(Json(ApiOk::with_message(
        "Appointment updated",
        AppointmentData { appointment },
    )))
}

/* ============================================================
   DELETE /appointments/{id}
   ============================================================ */

pub async fn delete_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<Empty>>, ApiError> {
    let mut conn = state.db.acquire().await.map_err(db_error)?;
    let current = load_appointment_row(&mut *conn, appointment_id).await?;
    ensure_access(&auth, current.patient_id, current.doctor_id)?;

    let res = sqlx::query(
        r#"
        DELETE FROM appointments
        WHERE id = $1
        "#,
    )
    .bind(appointment_id)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("appointment not found"));
    }

    tracing::info!(%appointment_id, user_id = %auth.user_id, "appointment deleted");

    Ok(Json(ApiOk::with_message("Appointment deleted", Empty {})))
}
