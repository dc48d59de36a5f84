//! Data-Quality Checks
//!
//! Checks beyond duplicate detection. Each takes table snapshots and returns
//! the offending records; the engine wraps them into diagnostic items.
//! Records pending delete are ignored everywhere.

use crate::shared::action::{Action, ActionRecord};
use crate::shared::entity::{Shift, Trip};
use std::collections::HashSet;

fn live<T: ActionRecord>(record: &T) -> bool {
    record.action() != Action::Delete
}

fn filled(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Trips whose `date|service|number` has no shift. Excluded trips are ignored.
pub fn find_orphaned_trips(trips: &[Trip], shifts: &[Shift]) -> Vec<Trip> {
    let shift_keys: HashSet<String> = shifts
        .iter()
        .filter(|s| live(*s))
        .map(|s| crate::shared::entity::shift_key(&s.date, &s.service, s.number))
        .collect();
    trips
        .iter()
        .filter(|t| live(*t) && !t.exclude && !shift_keys.contains(&t.shift_key()))
        .cloned()
        .collect()
}

/// Shifts with start and finish but no duration
pub fn find_shifts_without_duration(shifts: &[Shift]) -> Vec<Shift> {
    shifts
        .iter()
        .filter(|s| live(*s) && filled(&s.start) && filled(&s.finish) && !filled(&s.time))
        .cloned()
        .collect()
}

/// Trips with pickup and dropoff but no duration
pub fn find_trips_without_duration(trips: &[Trip]) -> Vec<Trip> {
    trips
        .iter()
        .filter(|t| {
            live(*t) && filled(&t.pickup_time) && filled(&t.dropoff_time) && !filled(&t.duration)
        })
        .cloned()
        .collect()
}

/// Shifts with no times and no trips
pub fn find_empty_shifts(shifts: &[Shift]) -> Vec<Shift> {
    shifts
        .iter()
        .filter(|s| live(*s) && !filled(&s.start) && !filled(&s.finish) && s.trips == 0)
        .cloned()
        .collect()
}

/// Minutes since midnight of an `HH:MM` (or `HH:MM:SS`) time
pub fn parse_clock(value: &str) -> Option<u32> {
    let mut parts = value.trim().split(':');
    let hours: u32 = parts.next()?.trim().parse().ok()?;
    let minutes: u32 = parts.next()?.trim().parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// `H:MM` between two clock times, wrapping past midnight
pub fn duration_between(start: &str, finish: &str) -> Option<String> {
    let start = parse_clock(start)?;
    let finish = parse_clock(finish)?;
    let minutes = (finish + 24 * 60 - start) % (24 * 60);
    Some(format!("{}:{:02}", minutes / 60, minutes % 60))
}
