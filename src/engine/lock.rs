use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::OwnedRwLockWriteGuard;
use ulid::Ulid;

use crate::model::{Event, Space, SpaceState};

use super::{Engine, EngineError};

/// Exclusive hold on one space's reservation rows. Released on drop, which
/// covers both commit and every early-return path.
pub struct SpaceLock {
    space: Arc<Space>,
    guard: OwnedRwLockWriteGuard<SpaceState>,
    acquired_at: Instant,
}

impl SpaceLock {
    pub fn space(&self) -> &Space {
        &self.space
    }
}

impl Deref for SpaceLock {
    type Target = SpaceState;

    fn deref(&self) -> &SpaceState {
        &self.guard
    }
}

impl DerefMut for SpaceLock {
    fn deref_mut(&mut self) -> &mut SpaceState {
        &mut self.guard
    }
}

impl Drop for SpaceLock {
    fn drop(&mut self) {
        metrics::histogram!(crate::observability::LOCK_HOLD_SECONDS)
            .record(self.acquired_at.elapsed().as_secs_f64());
    }
}

/// What a locked critical section decided.
pub enum Commit<T> {
    /// Journal and apply `Event`, then return `T`.
    Write(Event, T),
    /// Nothing to write.
    Skip(T),
}

impl Engine {
    /// Take the space's exclusive lock, waiting at most `lock_timeout`.
    ///
    /// A timeout is `LockContention`, distinct from `Conflict`: the caller may
    /// retry the same request shortly.
    pub async fn lock_space(&self, space_id: Ulid) -> Result<SpaceLock, EngineError> {
        let handle = self.handle(&space_id).ok_or(EngineError::NotFound(space_id))?;
        let started = Instant::now();
        let acquire = handle.rows.clone().write_owned();
        let guard = match tokio::time::timeout(self.settings.lock_timeout, acquire).await {
            Ok(guard) => guard,
            Err(_) => {
                metrics::counter!(crate::observability::LOCK_CONTENTION_TOTAL).increment(1);
                tracing::warn!(%space_id, timeout = ?self.settings.lock_timeout, "space lock wait timed out");
                return Err(EngineError::LockContention(space_id));
            }
        };
        metrics::histogram!(crate::observability::LOCK_WAIT_SECONDS)
            .record(started.elapsed().as_secs_f64());

        // Deleted while we waited: the rows we hold are orphaned.
        if !self.spaces.contains_key(&space_id) {
            return Err(EngineError::NotFound(space_id));
        }
        Ok(SpaceLock {
            space: handle.info,
            guard,
            acquired_at: Instant::now(),
        })
    }

    /// Run `decide` under the space lock and commit what it returns.
    ///
    /// `decide` sees the rows as of lock acquisition; no other writer can
    /// change them until the event is journaled and applied. Any error from
    /// `decide` or the journal leaves the rows untouched.
    pub async fn with_space_lock<T>(
        &self,
        space_id: Ulid,
        decide: impl FnOnce(&Arc<Space>, &SpaceState) -> Result<Commit<T>, EngineError>,
    ) -> Result<T, EngineError> {
        let mut lock = self.lock_space(space_id).await?;
        match decide(&lock.space, &*lock.guard)? {
            Commit::Skip(value) => Ok(value),
            Commit::Write(event, value) => {
                self.persist_and_apply(&mut lock, &event).await?;
                Ok(value)
            }
        }
    }
}
