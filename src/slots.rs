//! The fixed 10-minute grid used for availability.
//!
//! Slots start at 07:00 and repeat every 10 minutes up to 21:50 inclusive,
//! so the grid covers 07:00–22:00 in 90 slots.
//! A slot is occupied by a reservation iff `range.start <= slot < range.end`,
//! so a reservation ending on a slot boundary leaves that slot free.

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::model::TimeRange;

pub const SLOT_MINUTES: u32 = 10;
pub const FIRST_SLOT_MINUTE: u32 = 7 * 60;
pub const LAST_SLOT_MINUTE: u32 = 21 * 60 + 50;
pub const SLOT_COUNT: usize = ((LAST_SLOT_MINUTE - FIRST_SLOT_MINUTE) / SLOT_MINUTES + 1) as usize;

/// Start time of slot `index`. Panics in debug builds if out of range.
pub fn slot_start(index: usize) -> NaiveTime {
    debug_assert!(index < SLOT_COUNT, "slot index out of range");
    let minute = FIRST_SLOT_MINUTE + index as u32 * SLOT_MINUTES;
    NaiveTime::from_hms_opt(minute / 60, minute % 60, 0).unwrap_or(NaiveTime::MIN)
}

/// Index of the slot starting exactly at `t`, if any.
pub fn slot_index(t: NaiveTime) -> Option<usize> {
    if t.second() != 0 || t.nanosecond() != 0 {
        return None;
    }
    let minute = t.hour() * 60 + t.minute();
    if minute < FIRST_SLOT_MINUTE || (minute - FIRST_SLOT_MINUTE) % SLOT_MINUTES != 0 {
        return None;
    }
    let index = ((minute - FIRST_SLOT_MINUTE) / SLOT_MINUTES) as usize;
    (index < SLOT_COUNT).then_some(index)
}

/// `"HH:MM"` label for a slot.
pub fn slot_label(index: usize) -> String {
    slot_start(index).format("%H:%M").to_string()
}

/// Coarse part of the day used by the monthly view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    /// 07:00–12:00
    Morning,
    /// 12:00–17:00
    Afternoon,
    /// 17:00–22:00
    Evening,
}

impl Period {
    pub const ALL: [Period; 3] = [Period::Morning, Period::Afternoon, Period::Evening];

    /// Slot indices whose start lies inside this period.
    pub fn slots(self) -> std::ops::Range<usize> {
        match self {
            Period::Morning => 0..30,
            Period::Afternoon => 30..60,
            Period::Evening => 60..SLOT_COUNT,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Morning => "morning",
            Period::Afternoon => "afternoon",
            Period::Evening => "evening",
        }
    }
}

/// Three-way occupancy used for days and periods alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Occupancy {
    Available,
    Partial,
    Booked,
}

impl Occupancy {
    pub fn from_counts(booked: usize, total: usize) -> Self {
        if booked == 0 {
            Occupancy::Available
        } else if booked >= total {
            Occupancy::Booked
        } else {
            Occupancy::Partial
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Occupancy::Available => "available",
            Occupancy::Partial => "partial",
            Occupancy::Booked => "booked",
        }
    }
}

/// Occupied/free flag for each slot of one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotGrid {
    occupied: [bool; SLOT_COUNT],
}

impl Default for SlotGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotGrid {
    /// All slots free.
    pub fn new() -> Self {
        Self {
            occupied: [false; SLOT_COUNT],
        }
    }

    /// Mark every slot whose start falls in `range`.
    pub fn mark(&mut self, range: &TimeRange) {
        for (i, flag) in self.occupied.iter_mut().enumerate() {
            if !*flag && range.contains(slot_start(i)) {
                *flag = true;
            }
        }
    }

    pub fn is_occupied(&self, index: usize) -> bool {
        self.occupied.get(index).copied().unwrap_or(false)
    }

    pub fn booked_count(&self) -> usize {
        self.occupied.iter().filter(|o| **o).count()
    }

    pub fn occupancy(&self) -> Occupancy {
        Occupancy::from_counts(self.booked_count(), SLOT_COUNT)
    }

    pub fn period_occupancy(&self, period: Period) -> Occupancy {
        let range = period.slots();
        let total = range.len();
        let booked = self.occupied[range].iter().filter(|o| **o).count();
        Occupancy::from_counts(booked, total)
    }

    /// `(slot start, occupied)` in grid order.
    pub fn iter(&self) -> impl Iterator<Item = (NaiveTime, bool)> + '_ {
        self.occupied
            .iter()
            .enumerate()
            .map(|(i, o)| (slot_start(i), *o))
    }
}
