// Antiflood - sliding-window rate limiting per (group, user).
//
// Pure in-process state: a restart simply resets flood counts, which is
// acceptable. Each window is touched only under its own map entry, so
// concurrent messages from different users never contend on a global lock.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;

/// Trailing horizon a window retains events for.
pub const FLOOD_WINDOW_SECS: i64 = 20;
/// How long a flooding user is muted.
pub const MUTE_MINUTES: i64 = 5;

/// Verdict for one observed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloodAction {
    Allow,
    /// Limit exceeded; the caller should restrict the sender. The window has
    /// already been reset so the user starts clean after the mute.
    Mute,
}

#[derive(Hash, Eq, PartialEq, Clone, Copy, Debug)]
struct FloodKey {
    group_id: i64,
    user_id: i64,
}

/// Per-(group, user) sliding windows of (timestamp, event id) pairs.
#[derive(Default)]
pub struct FloodTracker {
    windows: DashMap<FloodKey, Vec<(DateTime<Utc>, i64)>>,
}

impl FloodTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one message and decide whether the sender is flooding.
    ///
    /// `limit` is the maximum number of messages allowed inside the trailing
    /// 20-second window. Disabled antiflood never reaches this call; a limit
    /// of zero is not a valid way to express "off".
    pub fn observe(
        &self,
        group_id: i64,
        user_id: i64,
        event_id: i64,
        now: DateTime<Utc>,
        limit: u32,
    ) -> FloodAction {
        debug_assert!(limit > 0, "disabled antiflood must bypass observe");

        let key = FloodKey { group_id, user_id };
        let mut entry = self.windows.entry(key).or_default();

        entry.push((now, event_id));
        let horizon = ChronoDuration::seconds(FLOOD_WINDOW_SECS);
        entry.retain(|(timestamp, _)| now.signed_duration_since(*timestamp) < horizon);

        if entry.len() > limit as usize {
            entry.clear();
            FloodAction::Mute
        } else {
            FloodAction::Allow
        }
    }

    /// Drop a group's windows, e.g. when the bot leaves the group.
    pub fn forget_group(&self, group_id: i64) {
        self.windows.retain(|key, _| key.group_id != group_id);
    }

    #[cfg(test)]
    fn retained(&self, group_id: i64, user_id: i64) -> usize {
        self.windows
            .get(&FloodKey { group_id, user_id })
            .map(|w| w.len())
            .unwrap_or(0)
    }
}
