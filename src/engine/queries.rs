use std::cmp::Reverse;
use std::collections::HashSet;

use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{daily_grid, first_of_month, free_spaces, last_of_month, summarize_month};
use super::conflict::{NON_BLOCKING, find_conflict, validate_date, validate_range};
use super::{Engine, EngineError, SpaceHandle};

// Reads take the shared lock only. A result reflects some commit order but
// may be stale by the time the caller looks at it.

impl Engine {
    pub fn get_space(&self, id: Ulid) -> Result<Space, EngineError> {
        self.handle(&id)
            .map(|h| (*h.info).clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// Every space, ordered by name.
    pub fn list_spaces(&self) -> Vec<Space> {
        let mut spaces: Vec<Space> = self.spaces.iter().map(|e| (*e.value().info).clone()).collect();
        spaces.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        spaces
    }

    /// Owner-only read. Someone else's reservation is `NotFound`.
    pub async fn get_reservation(&self, user: &UserId, id: Ulid) -> Result<Reservation, EngineError> {
        let space_id = self.space_for_reservation(&id).ok_or(EngineError::NotFound(id))?;
        let handle = self.handle(&space_id).ok_or(EngineError::NotFound(id))?;
        let rows = handle.rows.read().await;
        rows.get(id)
            .filter(|r| &r.user_id == user)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// The user's reservations with space name and location, newest first.
    pub async fn reservations_for_user(&self, user: &UserId) -> Vec<ReservationView> {
        let mut views = Vec::new();
        for handle in self.all_handles() {
            let rows = handle.rows.read().await;
            views.extend(rows.reservations.iter().filter(|r| &r.user_id == user).map(|r| {
                ReservationView {
                    reservation: r.clone(),
                    space_name: handle.info.name.clone(),
                    space_location: handle.info.location.clone(),
                }
            }));
        }
        views.sort_by_key(|v| Reverse((v.reservation.date, v.reservation.time.start)));
        views
    }

    /// Whether `[start, end)` on `date` overlaps a non-cancelled reservation.
    /// Advisory only: the answer is rechecked under the lock on create.
    pub async fn has_conflict(
        &self,
        space_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<bool, EngineError> {
        let range = validate_range(start, end)?;
        let handle = self.handle(&space_id).ok_or(EngineError::NotFound(space_id))?;
        let rows = handle.rows.read().await;
        Ok(find_conflict(&rows, date, &range, None, NON_BLOCKING).is_some())
    }

    pub async fn daily_availability(
        &self,
        space_id: Ulid,
        date: NaiveDate,
    ) -> Result<DailyAvailability, EngineError> {
        validate_date(date)?;
        let handle = self.handle(&space_id).ok_or(EngineError::NotFound(space_id))?;
        let rows = handle.rows.read().await;
        Ok(DailyAvailability {
            space_id,
            date,
            grid: daily_grid(rows.on_date(date)),
        })
    }

    /// Per-day summaries for a month, from one read of the month's rows.
    pub async fn monthly_availability(
        &self,
        space_id: Ulid,
        year: i32,
        month: u32,
    ) -> Result<MonthlyAvailability, EngineError> {
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(EngineError::LimitExceeded("year out of range"));
        }
        let (Some(first), Some(last)) = (first_of_month(year, month), last_of_month(year, month)) else {
            return Err(EngineError::validation(format!("invalid month {month}")));
        };
        let handle = self.handle(&space_id).ok_or(EngineError::NotFound(space_id))?;
        let rows = handle.rows.read().await;
        let days = summarize_month(first, last, rows.between(first, last));
        Ok(MonthlyAvailability {
            space_id,
            year,
            month,
            days,
        })
    }

    /// Spaces with nothing booked in `[start, end)` on `date`, ordered by name.
    ///
    /// One pass collects the busy spaces, the answer is everything else.
    pub async fn spaces_available_for_interval(
        &self,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Vec<Space>, EngineError> {
        let range = validate_range(start, end)?;
        validate_date(date)?;

        let handles = self.all_handles();
        let mut busy = HashSet::new();
        for handle in &handles {
            let rows = handle.rows.read().await;
            if rows.overlapping(date, &range).any(|r| r.status.blocks()) {
                busy.insert(handle.info.id);
            }
        }

        let mut spaces: Vec<Space> = free_spaces(handles, &busy, |h| h.info.id)
            .into_iter()
            .map(|h| (*h.info).clone())
            .collect();
        spaces.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(spaces)
    }

    /// Pending or confirmed reservations starting exactly at `date` `start`
    /// whose reminder has not gone out yet.
    pub async fn due_reminders(&self, date: NaiveDate, start: NaiveTime) -> Vec<Ulid> {
        let mut due = Vec::new();
        for handle in self.all_handles() {
            let rows = handle.rows.read().await;
            due.extend(
                rows.on_date(date)
                    .iter()
                    .filter(|r| r.time.start == start && r.status.is_open() && !r.reminder_sent)
                    .map(|r| r.id),
            );
        }
        due
    }

    pub fn space_count(&self) -> usize {
        self.spaces.len()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservation_index.len()
    }

    fn all_handles(&self) -> Vec<SpaceHandle> {
        self.spaces.iter().map(|e| e.value().clone()).collect()
    }
}
