mod availability;
mod conflict;
mod error;
mod lock;
mod mutations;
mod queries;
mod transition;
#[cfg(test)]
mod tests;

pub use availability::{daily_grid, free_spaces, summarize_day, summarize_month};
pub use conflict::{NON_BLOCKING, find_conflict, has_conflict};
pub use error::{EngineError, ErrorKind, TransitionError};
pub use lock::{Commit, SpaceLock};
pub use transition::{CheckIn, CheckInPolicy, can_cancel, can_confirm, can_edit, check_in};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::clock::Clock;
use crate::geo::{GeoDistance, Haversine};
use crate::model::*;
use crate::wal::Wal;

pub type SharedSpaceState = Arc<RwLock<SpaceState>>;

/// A registered space: immutable details plus the lockable reservation rows.
#[derive(Clone)]
pub struct SpaceHandle {
    pub info: Arc<Space>,
    pub rows: SharedSpaceState,
}

/// Tunables that are not part of any single request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    /// Longest wait for a space lock before giving up with `LockContention`.
    pub lock_timeout: Duration,
    pub check_in: CheckInPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            check_in: CheckInPolicy::default(),
        }
    }
}

// ── Group-commit journal channel ─────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Control(WalControl),
}

/// Writer requests other than appends, run between batches.
enum WalControl {
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the journal. Waits for one append, drains whatever else is already
/// queued, and commits the whole batch with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            WalCommand::Control(control) => {
                handle_control(&mut wal, control);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(WalCommand::Control(control)) => {
                    deferred = Some(control);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(control) = deferred {
            handle_control(&mut wal, control);
        }
    }
    tracing::debug!("journal writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let result = wal.append_batch(batch.iter().map(|(event, _)| event));
    if let Err(e) = &result {
        tracing::error!(batch = batch.len(), "journal batch rejected: {e}");
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, control: WalControl) {
    match control {
        WalControl::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalControl::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
    }
}

/// The reservation store: one lockable row set per space, every change
/// journaled before it becomes visible.
pub struct Engine {
    spaces: DashMap<Ulid, SpaceHandle>,
    /// Reverse lookup: reservation id → space id.
    reservation_index: DashMap<Ulid, Ulid>,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Shared by space create/delete, exclusive during compaction.
    catalog: RwLock<()>,
    clock: Arc<dyn Clock>,
    geo: Arc<dyn GeoDistance>,
    settings: EngineSettings,
}

/// Apply a row-level event to a space's rows. Caller holds the write lock.
fn apply_to_space(st: &mut SpaceState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ReservationCreated { reservation } => {
            index.insert(reservation.id, reservation.space_id);
            st.insert_reservation(reservation.clone());
        }
        Event::ReservationEdited {
            id,
            date,
            time,
            requester,
            ..
        } => {
            if let Some(mut r) = st.remove_reservation(*id) {
                if r.date != *date || r.time.start != time.start {
                    r.reminder_sent = false;
                }
                r.date = *date;
                r.time = *time;
                r.requester = requester.clone();
                r.status = ReservationStatus::Pending;
                st.insert_reservation(r);
            }
        }
        Event::ReservationConfirmed { id, .. } => {
            if let Some(r) = st.get_mut(*id) {
                r.status = ReservationStatus::Confirmed;
            }
        }
        Event::ReservationCancelled { id, reason, .. } => {
            if let Some(r) = st.get_mut(*id) {
                r.status = ReservationStatus::Cancelled;
                r.cancel_reason = reason.clone();
            }
        }
        Event::CheckedIn { id, at, .. } => {
            if let Some(r) = st.get_mut(*id) {
                r.status = ReservationStatus::InUse;
                r.checked_in_at = Some(*at);
            }
        }
        Event::ReminderSent { id, .. } => {
            if let Some(r) = st.get_mut(*id) {
                r.reminder_sent = true;
            }
        }
        // Space lifecycle is handled at the map level.
        Event::SpaceCreated { .. } | Event::SpaceDeleted { .. } => {}
    }
}

impl Engine {
    /// Open the journal at `wal_path`, replay it, and start the writer task.
    /// Must be called inside a Tokio runtime.
    pub fn new(wal_path: PathBuf, clock: Arc<dyn Clock>, settings: EngineSettings) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            spaces: DashMap::new(),
            reservation_index: DashMap::new(),
            wal_tx,
            catalog: RwLock::new(()),
            clock,
            geo: Arc::new(Haversine),
            settings,
        };

        // Nothing else holds these locks yet, so try_write never fails here.
        // Never block: this may run inside an async context.
        for event in &events {
            match event {
                Event::SpaceCreated { space } => engine.insert_space(space.clone()),
                Event::SpaceDeleted { id } => engine.remove_space(id),
                other => {
                    let Some(space_id) = other.space_id() else { continue };
                    let Some(handle) = engine.handle(&space_id) else { continue };
                    if let Ok(mut rows) = handle.rows.try_write() {
                        apply_to_space(&mut rows, other, &engine.reservation_index);
                    }
                }
            }
        }

        metrics::gauge!(crate::observability::SPACES_ACTIVE).set(engine.spaces.len() as f64);
        tracing::info!(
            spaces = engine.spaces.len(),
            reservations = engine.reservation_index.len(),
            replayed = events.len(),
            "engine opened"
        );
        Ok(engine)
    }

    /// Replace the distance function used for the check-in geofence.
    pub fn with_geo(mut self, geo: Arc<dyn GeoDistance>) -> Self {
        self.geo = geo;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn insert_space(&self, space: Space) {
        let id = space.id;
        let handle = SpaceHandle {
            info: Arc::new(space),
            rows: Arc::new(RwLock::new(SpaceState::new(id))),
        };
        self.spaces.insert(id, handle);
    }

    /// Drop a space and every index entry of its reservations.
    fn remove_space(&self, id: &Ulid) {
        if let Some((_, handle)) = self.spaces.remove(id) {
            if let Ok(rows) = handle.rows.try_read() {
                for r in &rows.reservations {
                    self.reservation_index.remove(&r.id);
                }
            } else {
                self.reservation_index.retain(|_, space_id| space_id != id);
            }
        }
    }

    pub(crate) fn handle(&self, id: &Ulid) -> Option<SpaceHandle> {
        self.spaces.get(id).map(|e| e.value().clone())
    }

    pub(crate) fn space_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_index.get(reservation_id).map(|e| *e.value())
    }

    /// Send one event through the group-commit writer and wait for the fsync.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Journal("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Journal("journal writer dropped response".into()))?
            .map_err(|e| EngineError::Journal(e.to_string()))
    }

    /// Journal, then apply. Nothing is applied if the journal write fails.
    async fn persist_and_apply(&self, rows: &mut SpaceState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_space(rows, event, &self.reservation_index);
        Ok(())
    }
}
