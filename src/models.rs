use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::auth::TokenKeys;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub tokens: TokenKeys,
}

/* -------------------------
   Enums (stored as smallint)
--------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum Role {
    Patient = 0,
    Doctor = 1,
    Admin = 2,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum AppointmentStatus {
    Pending = 0,
    Confirmed = 1,
    Completed = 2,
    Cancelled = 3,
}

impl AppointmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }
}

/* -------------------------
   Response envelope
--------------------------*/

/// `{"success": true, "message"?: ..., <payload keys>}`
#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub data: T,
}

impl<T> ApiOk<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data,
        }
    }

    pub fn with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data,
        }
    }
}

/// Payload for responses that only carry a message.
#[derive(Debug, Serialize)]
pub struct Empty {}

/* -------------------------
   Auth DTOs
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub phone: Option<String>,
    /// Only "doctor" is honored; anything else registers a patient.
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterData {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginData {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserPublicRow,
}

#[derive(Debug, Serialize)]
pub struct UserData {
    pub user: UserPublicRow,
}

#[derive(Debug, Serialize)]
pub struct UsersData {
    pub users: Vec<UserPublicRow>,
}

#[derive(Debug, Serialize)]
pub struct DoctorsData {
    pub doctors: Vec<DoctorRow>,
}

/* -------------------------
   Appointment DTOs
--------------------------*/

#[derive(Debug, Serialize)]
pub struct AppointmentsData {
    pub appointments: Vec<AppointmentView>,
}

#[derive(Debug, Serialize)]
pub struct AppointmentData {
    pub appointment: AppointmentView,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn into_public(self) -> UserPublicRow {
        UserPublicRow {
            id: self.id,
            email: self.email,
            full_name: self.full_name,
            phone: self.phone,
            role: self.role,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserPublicRow {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DoctorRow {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Bare appointment row, used for permission and lifecycle checks.
#[derive(Debug, Clone, FromRow)]
pub struct AppointmentRow {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_date: DateTime<Utc>,
    pub duration: i32,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

/// Appointment joined with both parties' contact details.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AppointmentView {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_date: DateTime<Utc>,
    pub duration: i32,
    pub ends_at: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub patient_name: String,
    pub patient_email: String,
    pub patient_phone: Option<String>,
    pub doctor_name: String,
    pub doctor_email: String,
    pub doctor_phone: Option<String>,
}

/// Shared SELECT list for `AppointmentView`; callers append WHERE/ORDER BY.
pub const APPOINTMENT_VIEW_SELECT: &str = r#"
    SELECT
      a.id,
      a.patient_id,
      a.doctor_id,
      a.appointment_date,
      a.duration,
      a.ends_at,
      a.status,
      a.reason,
      a.notes,
      a.created_at,
      a.updated_at,
      p.full_name AS patient_name,
      p.email     AS patient_email,
      p.phone     AS patient_phone,
      d.full_name AS doctor_name,
      d.email     AS doctor_email,
      d.phone     AS doctor_phone
    FROM appointments a
    JOIN users p ON p.id = a.patient_id
    JOIN users d ON d.id = a.doctor_id
"#;

/* -------------------------
   Stats
--------------------------*/

#[derive(Debug, Default, Serialize, FromRow)]
pub struct AppointmentCounts {
    pub total_appointments: i64,
    pub pending: i64,
    pub confirmed: i64,
    pub completed: i64,
    pub cancelled: i64,
}
