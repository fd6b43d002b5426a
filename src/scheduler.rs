use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta};
use futures::future::join_all;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::clock::floor_to_minute;
use crate::engine::{Engine, EngineError};
use crate::mail::{MailSender, reminder_mail};

#[derive(Debug, Clone, PartialEq)]
pub struct ReminderSettings {
    /// How often the scheduler wakes up.
    pub interval: Duration,
    /// Reminders go out this long before the start time.
    pub lead: TimeDelta,
    /// Furthest back a late tick will catch up on missed minutes.
    pub grace: TimeDelta,
    /// Shown in the mail subject and signature.
    pub brand: String,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            lead: TimeDelta::minutes(10),
            grace: TimeDelta::minutes(15),
            brand: "Roombook".into(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReminderReport {
    pub due: usize,
    pub sent: usize,
    /// Already claimed by another run, or no longer eligible.
    pub skipped: usize,
    /// Claimed but not delivered. Not retried.
    pub failed: usize,
}

impl AddAssign for ReminderReport {
    fn add_assign(&mut self, other: Self) {
        self.due += other.due;
        self.sent += other.sent;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

enum Outcome {
    Sent,
    Skipped,
    Failed,
}

/// Sends one reminder per reservation, `lead` before it starts.
///
/// Each reservation is claimed (its sent flag journaled) before the mail goes
/// out, so overlapping or repeated runs for the same minute never send twice.
/// A failed send is logged and not retried.
pub struct ReminderScheduler {
    engine: Arc<Engine>,
    mailer: Arc<dyn MailSender>,
    settings: ReminderSettings,
    last_target: Option<NaiveDateTime>,
}

impl ReminderScheduler {
    pub fn new(engine: Arc<Engine>, mailer: Arc<dyn MailSender>, settings: ReminderSettings) -> Self {
        Self {
            engine,
            mailer,
            settings,
            last_target: None,
        }
    }

    /// Start minutes to scan when the local time is `now`: the minute `lead`
    /// ahead, plus any minutes skipped since the previous tick, no further back
    /// than `grace`.
    pub fn targets(&self, now: NaiveDateTime) -> Vec<NaiveDateTime> {
        let target = floor_to_minute(now + self.settings.lead);
        let Some(last) = self.last_target else {
            return vec![target];
        };
        if last >= target {
            return Vec::new();
        }

        let oldest = target - self.settings.grace;
        let next = last + TimeDelta::minutes(1);
        if next < oldest {
            warn!(from = %next, to = %oldest, "reminder minutes past grace window skipped");
        }
        let mut minute = next.max(oldest);
        let mut out = Vec::new();
        while minute <= target {
            out.push(minute);
            minute += TimeDelta::minutes(1);
        }
        out
    }

    pub async fn tick(&mut self) -> ReminderReport {
        let now = self.engine.clock().local_now();
        let targets = self.targets(now);
        let mut report = ReminderReport::default();
        for target in &targets {
            report += self.run_for_target(*target).await;
        }
        if let Some(last) = targets.last() {
            self.last_target = Some(*last);
        }
        report
    }

    /// Remind every reservation starting exactly at `target`. Safe to call
    /// more than once for the same minute.
    pub async fn run_for_target(&self, target: NaiveDateTime) -> ReminderReport {
        let due = self.engine.due_reminders(target.date(), target.time()).await;
        let mut report = ReminderReport {
            due: due.len(),
            ..ReminderReport::default()
        };
        if due.is_empty() {
            return report;
        }

        for outcome in join_all(due.into_iter().map(|id| self.remind(id, target))).await {
            match outcome {
                Outcome::Sent => report.sent += 1,
                Outcome::Skipped => report.skipped += 1,
                Outcome::Failed => report.failed += 1,
            }
        }
        info!(
            target = %target,
            due = report.due,
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            "reminders processed"
        );
        report
    }

    async fn remind(&self, id: Ulid, target: NaiveDateTime) -> Outcome {
        let (reservation, space) = match self.engine.claim_reminder(id, target.date(), target.time()).await {
            Ok(Some(claimed)) => claimed,
            Ok(None) | Err(EngineError::NotFound(_)) => {
                debug!(reservation_id = %id, "reminder skip");
                return Outcome::Skipped;
            }
            Err(e) => {
                metrics::counter!(crate::observability::REMINDERS_FAILED_TOTAL).increment(1);
                warn!(reservation_id = %id, "reminder claim failed: {e}");
                return Outcome::Failed;
            }
        };

        let mail = reminder_mail(&self.settings.brand, &reservation, &space);
        match self.mailer.send(mail).await {
            Ok(()) => {
                metrics::counter!(crate::observability::REMINDERS_SENT_TOTAL).increment(1);
                debug!(reservation_id = %id, "reminder sent");
                Outcome::Sent
            }
            Err(e) => {
                metrics::counter!(crate::observability::REMINDERS_FAILED_TOTAL).increment(1);
                warn!(reservation_id = %id, to = %reservation.requester.email, "reminder not delivered: {e}");
                Outcome::Failed
            }
        }
    }

    /// Background loop. Never returns.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }
}

/// Background task that compacts the journal once `threshold` appends have
/// piled up since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appends = engine.journal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_journal().await {
            Ok(()) => info!(appends, "compacted journal"),
            Err(e) => tracing::error!("journal compaction failed: {e}"),
        }
    }
}
