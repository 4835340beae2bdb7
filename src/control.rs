//! Process-wide control flags.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};

/// Pause flag and uptime tracking. Flags are atomic scalars — readers never
/// take a lock.
pub struct ControlState {
    paused: AtomicBool,
    started_at: DateTime<Utc>,
}

impl ControlState {
    pub fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            started_at: Utc::now(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime_human(&self) -> String {
        format_duration((Utc::now() - self.started_at).num_seconds().max(0) as u64)
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

fn format_duration(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
