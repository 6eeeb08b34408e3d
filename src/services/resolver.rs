//! Playlist resolution and rotation.
//!
//! Pure functions over already-loaded playlist items; the dispatcher loads
//! rows, resolves the user's local time, and calls in here. The rotation
//! cursor is the last-served item id — position indices go stale the moment
//! a playlist is edited, item ids do not.

use crate::clock::LocalMoment;
use crate::models::PlaylistItem;

/// The currently-active subset of a playlist, in position order.
pub fn active_items(items: &[PlaylistItem], local: &LocalMoment) -> Vec<PlaylistItem> {
    items
        .iter()
        .filter(|item| item.is_active_at(local))
        .cloned()
        .collect()
}

/// Pick the item to serve next.
///
/// When the cursor points at a member of the active set, the next item in
/// list order (wrapping) is chosen; a missing or stale cursor restarts at
/// the front. The caller persists the new cursor only after the item
/// dispatches successfully.
pub fn choose_next<'a>(
    active: &'a [PlaylistItem],
    cursor: Option<i64>,
) -> Option<&'a PlaylistItem> {
    if active.is_empty() {
        return None;
    }
    let next_index = match cursor.and_then(|id| active.iter().position(|item| item.id == id)) {
        Some(pos) => (pos + 1) % active.len(),
        None => 0,
    };
    active.get(next_index)
}
