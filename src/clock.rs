//! Time-window evaluation.
//!
//! Sleep and firmware windows are day-of-day intervals that may cross
//! midnight. All predicates here are pure functions over naive local times;
//! callers resolve the owning user's timezone first via [`local_moment`].
//! This is the only place window arithmetic lives — the dispatcher and the
//! playlist resolver both call in here.

use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use std::str::FromStr;

pub const SECONDS_PER_DAY: u32 = 86_400;

/// A wall-clock instant in some user's local timezone.
#[derive(Debug, Clone, Copy)]
pub struct LocalMoment {
    pub time: NaiveTime,
    /// Bitmask bit for the local weekday, bit 0 = Monday.
    pub weekday_bit: u8,
}

/// Resolve `now` into the given IANA timezone, falling back to UTC when the
/// zone is missing or invalid.
pub fn local_moment(now: DateTime<Utc>, tz_name: Option<&str>) -> LocalMoment {
    let tz = tz_name.and_then(|name| Tz::from_str(name).ok());
    match tz {
        Some(tz) => {
            let local = now.with_timezone(&tz);
            LocalMoment {
                time: local.time(),
                weekday_bit: 1 << local.weekday().num_days_from_monday(),
            }
        }
        None => LocalMoment {
            time: now.time(),
            weekday_bit: 1 << now.weekday().num_days_from_monday(),
        },
    }
}

/// Parse a "HH:MM" string. Empty or malformed input yields `None`.
pub fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

/// Half-open window test with midnight-wrap semantics.
///
/// `start <= end` means the window is `[start, end)` within one day.
/// `start > end` wraps midnight: active when `now >= start || now < end`.
pub fn in_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}

/// Window test for sleep: an empty or unparseable bound means no window.
pub fn sleep_window_active(now: NaiveTime, start: &str, end: &str) -> bool {
    match (parse_hhmm(start), parse_hhmm(end)) {
        (Some(s), Some(e)) => in_window(now, s, e),
        _ => false,
    }
}

/// Window test for firmware: an empty bound means always open.
pub fn firmware_window_open(now: NaiveTime, start: &str, end: &str) -> bool {
    match (parse_hhmm(start), parse_hhmm(end)) {
        (Some(s), Some(e)) => in_window(now, s, e),
        _ => true,
    }
}

/// Wall-clock seconds until the next occurrence of `end`, clamped to
/// `[1, 86400]`. When `end` has already passed today the result counts to
/// tomorrow's occurrence.
pub fn seconds_until_window_end(now: NaiveTime, end: NaiveTime) -> u32 {
    let now_s = now.num_seconds_from_midnight();
    let end_s = end.num_seconds_from_midnight();
    let delta = if end_s > now_s {
        end_s - now_s
    } else {
        SECONDS_PER_DAY - (now_s - end_s)
    };
    delta.clamp(1, SECONDS_PER_DAY)
}

/// Same, but from a "HH:MM" string; `None` when the bound is absent.
pub fn seconds_until_window_end_str(now: NaiveTime, end: &str) -> Option<u32> {
    parse_hhmm(end).map(|e| seconds_until_window_end(now, e))
}
