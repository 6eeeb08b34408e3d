use serde::{Deserialize, Serialize};

use crate::clock::{self, LocalMoment};

/// Ordered list of playlist items owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
}

/// One schedule row: the item is active on the masked weekdays inside the
/// [start, end) window. The window may cross midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Bit 0 = Monday … bit 6 = Sunday.
    pub days_of_week: u8,
    pub start: String,
    pub end: String,
}

impl ScheduleEntry {
    pub fn matches(&self, local: &LocalMoment) -> bool {
        if self.days_of_week & local.weekday_bit == 0 {
            return false;
        }
        match (clock::parse_hhmm(&self.start), clock::parse_hhmm(&self.end)) {
            (Some(s), Some(e)) => clock::in_window(local.time, s, e),
            // A schedule row with unusable bounds never matches; the item is
            // still served if another row matches or the set is empty.
            _ => false,
        }
    }
}

/// A binding of a plugin instance to a playlist position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistItem {
    pub id: i64,
    pub playlist_id: i64,
    pub plugin_instance_id: i64,
    pub position: i64,
    pub active: bool,
    /// Overrides both plugin and device refresh rate when set.
    pub duration_override: Option<u32>,
    /// Empty set means always active.
    pub schedules: Vec<ScheduleEntry>,
}

impl PlaylistItem {
    /// Active right now: flagged active and either unscheduled or at least
    /// one schedule row matches.
    pub fn is_active_at(&self, local: &LocalMoment) -> bool {
        if !self.active {
            return false;
        }
        if self.schedules.is_empty() {
            return true;
        }
        self.schedules.iter().any(|s| s.matches(local))
    }
}

pub const ALL_DAYS: u8 = 0b0111_1111;
