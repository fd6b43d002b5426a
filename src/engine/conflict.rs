use chrono::{Datelike, NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::geo::GeoPoint;
use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Statuses that never hold a time range.
pub const NON_BLOCKING: &[ReservationStatus] = &[ReservationStatus::Cancelled];

/// First reservation on `date` overlapping `range`, ignoring rows whose status
/// is in `excluded` and the row `ignore` (the one being edited).
pub fn find_conflict(
    state: &SpaceState,
    date: NaiveDate,
    range: &TimeRange,
    ignore: Option<Ulid>,
    excluded: &[ReservationStatus],
) -> Option<Ulid> {
    state
        .overlapping(date, range)
        .filter(|r| Some(r.id) != ignore && !excluded.contains(&r.status))
        .map(|r| r.id)
        .next()
}

pub fn has_conflict(state: &SpaceState, date: NaiveDate, range: &TimeRange) -> bool {
    find_conflict(state, date, range, None, NON_BLOCKING).is_some()
}

/// Caller must hold the space lock for the result to stay true until commit.
pub(crate) fn check_no_conflict(
    state: &SpaceState,
    date: NaiveDate,
    range: &TimeRange,
    ignore: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(state, date, range, ignore, NON_BLOCKING) {
        Some(existing) => {
            metrics::counter!(crate::observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
            Err(EngineError::Conflict(existing))
        }
        None => Ok(()),
    }
}

pub(crate) fn validate_date(date: NaiveDate) -> Result<(), EngineError> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&date.year()) {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    Ok(())
}

pub(crate) fn validate_range(start: NaiveTime, end: NaiveTime) -> Result<TimeRange, EngineError> {
    TimeRange::try_new(start, end)
        .ok_or_else(|| EngineError::validation(format!("start {start} must be before end {end}")))
}

fn required(field: &str, value: &str, max: usize) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::validation(format!("{field} is required")));
    }
    if value.len() > max {
        return Err(EngineError::validation(format!("{field} is too long")));
    }
    Ok(())
}

pub(crate) fn validate_requester(requester: &Requester, capacity: u32) -> Result<(), EngineError> {
    required("organization name", &requester.organization_name, MAX_NAME_LEN)?;
    required("event name", &requester.event_name, MAX_NAME_LEN)?;
    required("phone", &requester.phone, MAX_TEXT_LEN)?;
    required("email", &requester.email, MAX_TEXT_LEN)?;
    if requester.organization_type.len() > MAX_NAME_LEN {
        return Err(EngineError::validation("organization type is too long"));
    }
    if !requester.email.contains('@') {
        return Err(EngineError::validation("email is malformed"));
    }
    if requester.headcount == 0 {
        return Err(EngineError::validation("headcount must be at least 1"));
    }
    if requester.headcount > MAX_HEADCOUNT {
        return Err(EngineError::LimitExceeded("headcount too large"));
    }
    if requester.headcount > capacity {
        return Err(EngineError::validation(format!(
            "headcount {} exceeds capacity {capacity}",
            requester.headcount
        )));
    }
    Ok(())
}

pub(crate) fn validate_point(point: &GeoPoint) -> Result<(), EngineError> {
    point.validate().map_err(EngineError::validation)
}

pub(crate) fn validate_space(space: &NewSpace) -> Result<(), EngineError> {
    required("space name", &space.name, MAX_NAME_LEN)?;
    for (field, value) in [
        ("category", &space.category),
        ("sub-category", &space.sub_category),
        ("location", &space.location),
    ] {
        if value.len() > MAX_NAME_LEN {
            return Err(EngineError::validation(format!("{field} is too long")));
        }
    }
    if space.capacity == 0 {
        return Err(EngineError::validation("capacity must be positive"));
    }
    if let Some(point) = &space.coordinates {
        validate_point(point)?;
    }
    Ok(())
}
