use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::geo::GeoPoint;
use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_date, validate_range, validate_requester, validate_space};
use super::transition::{self, CheckIn};
use super::{Commit, Engine, EngineError, SpaceHandle, WalCommand, WalControl};

fn transition_metric(name: &'static str) {
    metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "transition" => name).increment(1);
}

impl Engine {
    pub async fn create_space(&self, id: Ulid, draft: NewSpace) -> Result<Space, EngineError> {
        validate_space(&draft)?;
        let _catalog = self.catalog.read().await;
        if self.spaces.len() >= MAX_SPACES {
            return Err(EngineError::LimitExceeded("too many spaces"));
        }
        if self.spaces.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let space = draft.into_space(id);
        let event = Event::SpaceCreated { space: space.clone() };
        self.wal_append(&event).await?;
        self.insert_space(space.clone());
        metrics::gauge!(crate::observability::SPACES_ACTIVE).set(self.spaces.len() as f64);
        tracing::info!(space_id = %id, name = %space.name, "space created");
        Ok(space)
    }

    /// Delete a space together with all of its reservations. Returns how many
    /// reservations went with it.
    pub async fn delete_space(&self, id: Ulid) -> Result<usize, EngineError> {
        let _catalog = self.catalog.read().await;
        let lock = self.lock_space(id).await?;
        let event = Event::SpaceDeleted { id };
        self.wal_append(&event).await?;
        let removed = lock.reservations.len();
        for r in &lock.reservations {
            self.reservation_index.remove(&r.id);
        }
        self.spaces.remove(&id);
        drop(lock);
        metrics::gauge!(crate::observability::SPACES_ACTIVE).set(self.spaces.len() as f64);
        tracing::info!(space_id = %id, removed, "space deleted");
        Ok(removed)
    }

    /// Book `[start, end)` on a space for `user`. The new reservation is
    /// pending.
    ///
    /// Input is validated before the space lock is taken. The overlap check
    /// and the insert run under the lock, so of two concurrent requests for the
    /// same range at most one succeeds.
    pub async fn create_reservation(
        &self,
        user: &UserId,
        request: NewReservation,
    ) -> Result<Reservation, EngineError> {
        let time = validate_range(request.start, request.end)?;
        validate_date(request.date)?;
        let SpaceHandle { info, .. } = self
            .handle(&request.space_id)
            .ok_or(EngineError::NotFound(request.space_id))?;
        validate_requester(&request.requester, info.capacity)?;

        let reservation = Reservation {
            id: Ulid::new(),
            user_id: user.clone(),
            space_id: request.space_id,
            date: request.date,
            time,
            requester: request.requester,
            status: ReservationStatus::Pending,
            cancel_reason: None,
            checked_in_at: None,
            reminder_sent: false,
        };

        let created = self
            .with_space_lock(request.space_id, |_, rows| {
                if rows.reservations.len() >= MAX_RESERVATIONS_PER_SPACE {
                    return Err(EngineError::LimitExceeded("too many reservations on space"));
                }
                check_no_conflict(rows, reservation.date, &reservation.time, None)?;
                let event = Event::ReservationCreated {
                    reservation: reservation.clone(),
                };
                Ok(Commit::Write(event, reservation))
            })
            .await?;

        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        tracing::info!(
            reservation_id = %created.id,
            space_id = %created.space_id,
            date = %created.date,
            time = %created.time,
            "reservation created"
        );
        Ok(created)
    }

    /// Replace date, time and requester details. The reservation goes back to
    /// pending for re-approval.
    pub async fn edit_reservation(
        &self,
        user: &UserId,
        id: Ulid,
        edit: ReservationEdit,
    ) -> Result<Reservation, EngineError> {
        let time = validate_range(edit.start, edit.end)?;
        validate_date(edit.date)?;
        let space_id = self.space_for_reservation(&id).ok_or(EngineError::NotFound(id))?;
        let SpaceHandle { info, .. } = self.handle(&space_id).ok_or(EngineError::NotFound(id))?;
        validate_requester(&edit.requester, info.capacity)?;

        let edited = self
            .with_space_lock(space_id, |_, rows| {
                let current = owned_row(rows, id, user)?;
                transition::can_edit(current)?;
                check_no_conflict(rows, edit.date, &time, Some(id))?;

                let mut updated = current.clone();
                if updated.date != edit.date || updated.time.start != time.start {
                    updated.reminder_sent = false;
                }
                updated.date = edit.date;
                updated.time = time;
                updated.requester = edit.requester.clone();
                updated.status = ReservationStatus::Pending;

                let event = Event::ReservationEdited {
                    id,
                    space_id,
                    date: edit.date,
                    time,
                    requester: edit.requester,
                };
                Ok(Commit::Write(event, updated))
            })
            .await?;

        transition_metric("edit");
        tracing::info!(reservation_id = %id, date = %edited.date, time = %edited.time, "reservation edited");
        Ok(edited)
    }

    /// Cancel a pending or confirmed reservation. Cancelled is final.
    pub async fn cancel_reservation(
        &self,
        user: &UserId,
        id: Ulid,
        reason: Option<String>,
    ) -> Result<Reservation, EngineError> {
        if reason.as_ref().is_some_and(|r| r.len() > MAX_CANCEL_REASON_LEN) {
            return Err(EngineError::LimitExceeded("cancel reason too long"));
        }
        let space_id = self.space_for_reservation(&id).ok_or(EngineError::NotFound(id))?;

        let cancelled = self
            .with_space_lock(space_id, |_, rows| {
                let current = owned_row(rows, id, user)?;
                transition::can_cancel(current)?;
                let mut updated = current.clone();
                updated.status = ReservationStatus::Cancelled;
                updated.cancel_reason = reason.clone();
                let event = Event::ReservationCancelled { id, space_id, reason };
                Ok(Commit::Write(event, updated))
            })
            .await?;

        transition_metric("cancel");
        tracing::info!(reservation_id = %id, "reservation cancelled");
        Ok(cancelled)
    }

    /// Approval hook: pending → confirmed.
    pub async fn confirm_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let space_id = self.space_for_reservation(&id).ok_or(EngineError::NotFound(id))?;

        let confirmed = self
            .with_space_lock(space_id, |_, rows| {
                let current = rows.get(id).ok_or(EngineError::NotFound(id))?;
                transition::can_confirm(current)?;
                let mut updated = current.clone();
                updated.status = ReservationStatus::Confirmed;
                Ok(Commit::Write(Event::ReservationConfirmed { id, space_id }, updated))
            })
            .await?;

        transition_metric("confirm");
        tracing::info!(reservation_id = %id, "reservation confirmed");
        Ok(confirmed)
    }

    /// Move a confirmed reservation to in-use if the caller is on time and on
    /// site. Checking in again once in use is a no-op success.
    pub async fn check_in(
        &self,
        user: &UserId,
        id: Ulid,
        location: Option<GeoPoint>,
    ) -> Result<Reservation, EngineError> {
        let space_id = self.space_for_reservation(&id).ok_or(EngineError::NotFound(id))?;
        let now = self.clock.now();
        let policy = self.settings.check_in;
        let geo = self.geo.clone();

        let result = self
            .with_space_lock(space_id, |space, rows| {
                let current = owned_row(rows, id, user)?;
                let outcome = transition::check_in(
                    current,
                    space.coordinates.as_ref(),
                    location.as_ref(),
                    now.naive_local(),
                    &policy,
                    geo.as_ref(),
                )?;
                match outcome {
                    CheckIn::AlreadyInUse => Ok(Commit::Skip(current.clone())),
                    CheckIn::Admit => {
                        let at = now.with_timezone(&Utc);
                        let mut updated = current.clone();
                        updated.status = ReservationStatus::InUse;
                        updated.checked_in_at = Some(at);
                        Ok(Commit::Write(Event::CheckedIn { id, space_id, at }, updated))
                    }
                }
            })
            .await;

        match &result {
            Ok(r) => {
                transition_metric("check_in");
                tracing::info!(reservation_id = %id, checked_in_at = ?r.checked_in_at, "checked in");
            }
            Err(EngineError::InvalidTransition(e)) => {
                metrics::counter!(crate::observability::CHECK_IN_REJECTED_TOTAL, "reason" => e.label())
                    .increment(1);
                tracing::debug!(reservation_id = %id, "check-in refused: {e}");
            }
            Err(_) => {}
        }
        result
    }

    /// Mark a reservation's reminder as sent, once, for the start minute it was
    /// scanned at. Returns the reservation and its space when this call set the
    /// flag; `None` if it was already set, the reservation is no longer
    /// pending/confirmed, or it has since moved off `date`/`start`.
    pub async fn claim_reminder(
        &self,
        id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
    ) -> Result<Option<(Reservation, Arc<Space>)>, EngineError> {
        let space_id = self.space_for_reservation(&id).ok_or(EngineError::NotFound(id))?;
        self.with_space_lock(space_id, |space, rows| {
            let current = rows.get(id).ok_or(EngineError::NotFound(id))?;
            if current.reminder_sent || !current.status.is_open() {
                return Ok(Commit::Skip(None));
            }
            if current.date != date || current.time.start != start {
                return Ok(Commit::Skip(None));
            }
            let mut updated = current.clone();
            updated.reminder_sent = true;
            let claimed = Some((updated, Arc::clone(space)));
            Ok(Commit::Write(Event::ReminderSent { id, space_id }, claimed))
        })
        .await
    }

    /// Rewrite the journal as the minimal event set reproducing current state.
    ///
    /// Holds the catalog exclusively and every space's read lock until the
    /// swap is done, so no append can land between snapshot and swap.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.write().await;
        let handles: Vec<SpaceHandle> = self.spaces.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        let mut held = Vec::with_capacity(handles.len());
        for handle in handles {
            let rows = handle.rows.clone().read_owned().await;
            events.push(Event::SpaceCreated {
                space: (*handle.info).clone(),
            });
            for r in &rows.reservations {
                events.push(Event::ReservationCreated { reservation: r.clone() });
            }
            held.push(rows);
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Control(WalControl::Compact { events, response: tx }))
            .await
            .map_err(|_| EngineError::Journal("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Journal("journal writer dropped response".into()))?
            .map_err(|e| EngineError::Journal(e.to_string()))?;
        drop(held);
        tracing::info!(events = count, "journal compacted");
        Ok(())
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::Control(WalControl::AppendsSinceCompact { response: tx }))
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// The row `id` if it belongs to `user`. Someone else's reservation is
/// reported as not found.
fn owned_row<'a>(rows: &'a SpaceState, id: Ulid, user: &UserId) -> Result<&'a Reservation, EngineError> {
    rows.get(id)
        .filter(|r| &r.user_id == user)
        .ok_or(EngineError::NotFound(id))
}
