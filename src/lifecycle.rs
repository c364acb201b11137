//! Who may see an appointment and which status changes each role may make.

use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::auth_context::AuthContext;
use crate::models::{AppointmentStatus, Role};

use AppointmentStatus::*;

/// Admins see everything; everyone else only appointments they take part in.
pub fn can_access(auth: &AuthContext, patient_id: Uuid, doctor_id: Uuid) -> bool {
    auth.role == Role::Admin || auth.user_id == patient_id || auth.user_id == doctor_id
}

pub fn ensure_access(auth: &AuthContext, patient_id: Uuid, doctor_id: Uuid) -> Result<(), ApiError> {
    if can_access(auth, patient_id, doctor_id) {
        Ok(())
    } else {
        Err(ApiError::forbidden("You do not have access to this appointment"))
    }
}

/// Edges of the appointment state machine. Terminal states have none.
pub fn is_valid_edge(from: AppointmentStatus, to: AppointmentStatus) -> bool {
    matches!(
        (from, to),
        (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Completed) | (Confirmed, Cancelled)
    )
}

/// Checks a requested status change for the caller's role.
/// Access to the appointment itself is checked separately.
pub fn authorize_transition(
    role: Role,
    from: AppointmentStatus,
    to: AppointmentStatus,
) -> Result<(), ApiError> {
    match role {
        Role::Admin => Ok(()),
        Role::Patient => {
            if to != Cancelled {
                return Err(ApiError::forbidden(
                    "Patients may only cancel their appointments",
                ));
            }
            match from {
                Pending | Cancelled => Ok(()),
                _ => Err(ApiError::forbidden(
                    "Only pending appointments can be cancelled by the patient",
                )),
            }
        }
        Role::Doctor => {
            if from == to || is_valid_edge(from, to) {
                Ok(())
            } else {
                Err(invalid_transition(from, to))
            }
        }
    }
}

/// Only staff may move an appointment in time; doctors only while it is open.
pub fn ensure_can_reschedule(role: Role, current: AppointmentStatus) -> Result<(), ApiError> {
    match role {
        Role::Patient => Err(ApiError::forbidden("Patients cannot change the appointment date")),
        Role::Doctor if current.is_terminal() => Err(ApiError::BadRequest(
            "INVALID_TRANSITION",
            format!("a {} appointment cannot be rescheduled", status_name(current)),
        )),
        _ => Ok(()),
    }
}

fn invalid_transition(from: AppointmentStatus, to: AppointmentStatus) -> ApiError {
    ApiError::BadRequest(
        "INVALID_TRANSITION",
        format!("cannot change status from {} to {}", status_name(from), status_name(to)),
    )
}

fn status_name(s: AppointmentStatus) -> &'static str {
    match s {
        Pending => "pending",
        Confirmed => "confirmed",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}
