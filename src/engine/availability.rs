use std::collections::HashSet;

use chrono::{Datelike, NaiveDate};
use ulid::Ulid;

use crate::model::*;
use crate::slots::{Period, SLOT_COUNT, SlotGrid};

// ── Availability aggregation ──────────────────────────────────────

/// Slot grid for one day built from that day's rows. Cancelled rows are ignored.
pub fn daily_grid<'a>(rows: impl IntoIterator<Item = &'a Reservation>) -> SlotGrid {
    let mut grid = SlotGrid::new();
    for r in rows {
        if r.status.blocks() {
            grid.mark(&r.time);
        }
    }
    grid
}

/// Day-level summary derived from one grid, so slot count and period status
/// always agree.
pub fn summarize_day(date: NaiveDate, grid: &SlotGrid) -> DayAvailability {
    let booked = grid.booked_count();
    let status = grid.occupancy();
    let occupancy = if booked >= SLOT_COUNT {
        1.0
    } else {
        round2(booked as f64 / SLOT_COUNT as f64)
    };
    DayAvailability {
        date,
        booked_slots: booked,
        status,
        occupancy,
        periods: Period::ALL.map(|p| (p, grid.period_occupancy(p))),
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn first_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

pub fn last_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    first_of_month(ny, nm)?.pred_opt()
}

/// One summary per calendar day of the month. `rows` are the month's rows in
/// `(date, start)` order, as `SpaceState::between` returns them.
pub fn summarize_month(first: NaiveDate, last: NaiveDate, rows: &[Reservation]) -> Vec<DayAvailability> {
    let mut days = Vec::with_capacity(last.day() as usize);
    let mut rest = rows;
    for date in first.iter_days().take_while(|d| *d <= last) {
        let split = rest.partition_point(|r| r.date <= date);
        let (today, later) = rest.split_at(split);
        let today = today.iter().filter(|r| r.date == date);
        days.push(summarize_day(date, &daily_grid(today)));
        rest = later;
    }
    days
}

/// Spaces with no blocking row in the queried interval: everything minus the
/// busy set.
pub fn free_spaces<T>(
    all: impl IntoIterator<Item = T>,
    busy: &HashSet<Ulid>,
    id_of: impl Fn(&T) -> Ulid,
) -> Vec<T> {
    all.into_iter().filter(|space| !busy.contains(&id_of(space))).collect()
}
