//! Reservation lifecycle rules.
//!
//! ```text
//! create ──► pending ──confirm──► confirmed ──check-in──► in-use
//!              │  ▲                  │
//!              │  └──────edit────────┤
//!              └──cancel──► cancelled ◄──cancel
//! ```
//!
//! These are pure checks. The engine runs them under the space lock and only
//! writes when they pass.

use chrono::{NaiveDateTime, TimeDelta};

use crate::geo::{GeoDistance, GeoPoint};
use crate::model::{Reservation, ReservationStatus};

use super::conflict::validate_point;
use super::{EngineError, TransitionError};

/// Check-in gating parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckInPolicy {
    /// How long before the start check-in opens.
    pub lead: TimeDelta,
    /// Maximum distance from the space's registered coordinates.
    pub radius_m: f64,
}

impl Default for CheckInPolicy {
    fn default() -> Self {
        Self {
            lead: TimeDelta::minutes(15),
            radius_m: 50.0,
        }
    }
}

/// Outcome of a successful check-in precondition check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckIn {
    /// Move to in-use now.
    Admit,
    /// Already in use; nothing to write.
    AlreadyInUse,
}

fn open_for_change(r: &Reservation) -> Result<(), TransitionError> {
    match r.status {
        ReservationStatus::Pending | ReservationStatus::Confirmed => Ok(()),
        other => Err(TransitionError::AlreadyFinal(other)),
    }
}

pub fn can_cancel(r: &Reservation) -> Result<(), TransitionError> {
    open_for_change(r)
}

/// Edits are allowed from pending or confirmed and always land in pending.
pub fn can_edit(r: &Reservation) -> Result<(), TransitionError> {
    open_for_change(r)
}

pub fn can_confirm(r: &Reservation) -> Result<(), TransitionError> {
    match r.status {
        ReservationStatus::Pending => Ok(()),
        ReservationStatus::Confirmed => Err(TransitionError::WrongStatus {
            actual: r.status,
            expected: "pending",
        }),
        other => Err(TransitionError::AlreadyFinal(other)),
    }
}

/// Decide whether `r` may be checked in at local time `now`.
///
/// Re-checking an in-use reservation succeeds without looking at time or
/// location. Otherwise the reservation must be confirmed, dated today, and
/// `now` must fall in `[start - lead, end)`. When the space has coordinates the
/// caller must report a position within `policy.radius_m` of them.
pub fn check_in(
    r: &Reservation,
    space_coordinates: Option<&GeoPoint>,
    caller: Option<&GeoPoint>,
    now: NaiveDateTime,
    policy: &CheckInPolicy,
    geo: &dyn GeoDistance,
) -> Result<CheckIn, EngineError> {
    match r.status {
        ReservationStatus::InUse => return Ok(CheckIn::AlreadyInUse),
        ReservationStatus::Confirmed => {}
        ReservationStatus::Cancelled => {
            return Err(TransitionError::AlreadyFinal(r.status).into());
        }
        ReservationStatus::Pending => {
            return Err(TransitionError::WrongStatus {
                actual: r.status,
                expected: "confirmed",
            }
            .into());
        }
    }

    let today = now.date();
    if r.date != today {
        return Err(TransitionError::WrongDate {
            reserved: r.date,
            today,
        }
        .into());
    }

    let closes_at = r.ends_at();
    if now >= closes_at {
        return Err(TransitionError::WindowClosed { closed_at: closes_at }.into());
    }
    let opens_at = r.starts_at() - policy.lead;
    if now < opens_at {
        return Err(TransitionError::TooEarly { opens_at }.into());
    }

    if let Some(anchor) = space_coordinates {
        let Some(caller) = caller else {
            return Err(EngineError::validation("current location is required to check in"));
        };
        validate_point(caller)?;
        let distance_m = geo.distance_m(anchor, caller);
        if distance_m > policy.radius_m {
            return Err(TransitionError::TooFar {
                distance_m,
                limit_m: policy.radius_m,
            }
            .into());
        }
    }

    Ok(CheckIn::Admit)
}
