//! Doctor schedule slots and the double-booking rule.
//!
//! A slot occupies the half-open interval `[start, start + duration)`, so two
//! slots that merely touch (one ends exactly when the next begins) do not
//! conflict.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::ApiError;

pub const DEFAULT_DURATION_MINUTES: i32 = 30;
pub const MAX_DURATION_MINUTES: i32 = 480;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub duration_minutes: i32,
}

impl Slot {
    pub fn new(start: DateTime<Utc>, duration_minutes: i32) -> Self {
        Self {
            start,
            duration_minutes,
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// A live (non-cancelled) booking already on a doctor's schedule.
#[derive(Debug, Clone, FromRow)]
pub struct BookedSlot {
    pub id: Uuid,
    pub appointment_date: DateTime<Utc>,
    pub duration: i32,
}

impl BookedSlot {
    pub fn slot(&self) -> Slot {
        Slot::new(self.appointment_date, self.duration)
    }
}

pub fn find_conflict<'a>(candidate: &Slot, booked: &'a [BookedSlot]) -> Option<&'a BookedSlot> {
    booked.iter().find(|b| b.slot().overlaps(candidate))
}

/// Loads the doctor's live bookings that could overlap `candidate` and returns
/// the first one that does. `exclude` skips the appointment being edited.
///
/// Run this inside the transaction that performs the write.
pub async fn check_doctor_availability(
    conn: &mut sqlx::PgConnection,
    doctor_id: Uuid,
    candidate: &Slot,
    exclude: Option<Uuid>,
) -> Result<Option<BookedSlot>, sqlx::Error> {
    // Nothing starting earlier than this can reach into the candidate.
    let earliest_start = candidate.start - Duration::minutes(i64::from(MAX_DURATION_MINUTES));

    let booked: Vec<BookedSlot> = sqlx::query_as::<_, BookedSlot>(
        r#"
        SELECT id, appointment_date, duration
        FROM appointments
        WHERE doctor_id = $1
          AND status <> $2
          AND ($3::uuid IS NULL OR id <> $3)
          AND appointment_date < $4
          AND appointment_date > $5
        ORDER BY appointment_date ASC
        "#,
    )
    .bind(doctor_id)
    .bind(crate::models::AppointmentStatus::Cancelled)
    .bind(exclude)
    .bind(candidate.end())
    .bind(earliest_start)
    .fetch_all(&mut *conn)
    .await?;

    Ok(find_conflict(candidate, &booked).cloned())
}

pub fn validate_duration(duration: Option<i32>) -> Result<i32, ApiError> {
    let d = duration.unwrap_or(DEFAULT_DURATION_MINUTES);
    if !(1..=MAX_DURATION_MINUTES).contains(&d) {
        return Err(ApiError::validation(format!(
            "duration must be between 1 and {MAX_DURATION_MINUTES} minutes"
        )));
    }
    Ok(d)
}

/// Accepts RFC 3339 or the browser `datetime-local` form (`YYYY-MM-DDTHH:MM[:SS]`),
/// the latter read as UTC.
pub fn parse_appointment_date(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(ApiError::validation(
        "appointment_date must be an ISO 8601 date-time",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, h, m, 0).unwrap()
    }

    fn booked(h: u32, m: u32, duration: i32) -> BookedSlot {
        BookedSlot {
            id: Uuid::new_v4(),
            appointment_date: at(h, m),
            duration,
        }
    }

    #[test]
    fn end_adds_duration() {
        assert_eq!(Slot::new(at(10, 0), 30).end(), at(10, 30));
        assert_eq!(Slot::new(at(23, 45), 30).end(), Utc.with_ymd_and_hms(2025, 3, 11, 0, 15, 0).unwrap());
    }

    #[test]
    fn partial_overlap_conflicts() {
        // 10:00-10:30 booked; 10:15-10:45 requested
        let existing = [booked(10, 0, 30)];
        let candidate = Slot::new(at(10, 15), 30);
        assert!(find_conflict(&candidate, &existing).is_some());
    }

    #[test]
    fn touching_boundaries_do_not_conflict() {
        let existing = [booked(10, 0, 30)];
        assert!(find_conflict(&Slot::new(at(10, 30), 30), &existing).is_none());
        assert!(find_conflict(&Slot::new(at(9, 30), 30), &existing).is_none());
    }

    #[test]
    fn containment_conflicts_both_ways() {
        let long = [booked(9, 0, 120)];
        assert!(find_conflict(&Slot::new(at(10, 0), 15), &long).is_some());

        let short = [booked(10, 0, 15)];
        assert!(find_conflict(&Slot::new(at(9, 0), 120), &short).is_some());
    }

    #[test]
    fn identical_slot_conflicts() {
        let existing = [booked(14, 0, 30)];
        assert!(find_conflict(&Slot::new(at(14, 0), 30), &existing).is_some());
    }

    #[test]
    fn overlap_is_symmetric() {
        let a = Slot::new(at(8, 0), 45);
        let b = Slot::new(at(8, 30), 10);
        let c = Slot::new(at(8, 45), 10);
        assert_eq!(a.overlaps(&b), b.overlaps(&a));
        assert_eq!(a.overlaps(&c), c.overlaps(&a));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn first_conflict_is_reported() {
        let existing = [booked(8, 0, 30), booked(10, 0, 30), booked(10, 20, 30)];
        let hit = find_conflict(&Slot::new(at(10, 10), 20), &existing).unwrap();
        assert_eq!(hit.id, existing[1].id);
    }

    #[test]
    fn duration_defaults_and_bounds() {
        assert_eq!(validate_duration(None).unwrap(), 30);
        assert_eq!(validate_duration(Some(45)).unwrap(), 45);
        assert_eq!(validate_duration(Some(MAX_DURATION_MINUTES)).unwrap(), MAX_DURATION_MINUTES);
        assert!(validate_duration(Some(0)).is_err());
        assert!(validate_duration(Some(-15)).is_err());
        assert!(validate_duration(Some(MAX_DURATION_MINUTES + 1)).is_err());
    }

    #[test]
    fn parses_rfc3339_and_datetime_local() {
        assert_eq!(parse_appointment_date("2025-03-10T10:00:00Z").unwrap(), at(10, 0));
        assert_eq!(parse_appointment_date("2025-03-10T12:00:00+02:00").unwrap(), at(10, 0));
        assert_eq!(parse_appointment_date("2025-03-10T10:00").unwrap(), at(10, 0));
        assert_eq!(parse_appointment_date(" 2025-03-10T10:00:00 ").unwrap(), at(10, 0));
        assert!(parse_appointment_date("next tuesday").is_err());
        assert!(parse_appointment_date("").is_err());
    }
}
