use std::sync::{Arc, Mutex};

use chrono::NaiveDateTime;
use serde::Serialize;

/// Most recent distinct messages retained for the dashboard ticker
pub const MAX_RECENT_ENTRIES: usize = 10;

/// One entry in the recent-activity buffer, keyed by `(device_id, data)`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentEntry {
    pub device_id: String,
    pub device_type: String,
    pub data: String,
    pub ts: NaiveDateTime,
    pub log_id: i32,
}

/// Fixed-capacity in-memory buffer of the last distinct messages seen
/// across the fleet. A repeat of a `(device_id, data)` pair refreshes the
/// timestamp of its existing entry without moving it; a new pair evicts the
/// oldest entry once the buffer is full. Cloning shares the buffer, so the
/// ingest side and dashboard readers observe the same entries.
#[derive(Debug, Clone, Default)]
pub struct RecentActivity {
    entries: Arc<Mutex<Vec<RecentEntry>>>,
}

impl RecentActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, entry: RecentEntry) {
        let mut entries = self.lock();
        if let Some(existing) = entries
            .iter_mut()
            .find(|e| e.device_id == entry.device_id && e.data == entry.data)
        {
            existing.ts = entry.ts;
            return;
        }
        if entries.len() >= MAX_RECENT_ENTRIES {
            entries.remove(0);
        }
        entries.push(entry);
    }

    /// Current entries in insertion order, oldest first
    pub fn snapshot(&self) -> Vec<RecentEntry> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RecentEntry>> {
        // a poisoned buffer is still just a snapshot of strings; keep serving
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(device_id: &str, data: &str) -> RecentEntry {
        RecentEntry {
            device_id: device_id.to_string(),
            device_type: "ESP".to_string(),
            data: data.to_string(),
            ts: Utc::now().naive_utc(),
            log_id: 1,
        }
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let recent = RecentActivity::new();
        for i in 0..MAX_RECENT_ENTRIES {
            recent.upsert(entry(&format!("ESP{i}"), "online"));
        }
        assert_eq!(recent.snapshot().len(), MAX_RECENT_ENTRIES);

        recent.upsert(entry("ESPX", "online"));
        let entries = recent.snapshot();
        assert_eq!(entries.len(), MAX_RECENT_ENTRIES);
        assert_eq!(entries[0].device_id, "ESP1");
        assert_eq!(entries[MAX_RECENT_ENTRIES - 1].device_id, "ESPX");
    }

    #[test]
    fn repeat_refreshes_timestamp_in_place() {
        let recent = RecentActivity::new();
        recent.upsert(entry("ESP1", "online"));
        recent.upsert(entry("ESP2", "online"));

        let mut replay = entry("ESP1", "online");
        replay.ts += chrono::Duration::seconds(30);
        recent.upsert(replay.clone());

        let entries = recent.snapshot();
        assert_eq!(entries.len(), 2);
        // same slot, newer timestamp
        assert_eq!(entries[0].device_id, "ESP1");
        assert_eq!(entries[0].ts, replay.ts);
    }

    #[test]
    fn same_device_different_payload_is_distinct() {
        let recent = RecentActivity::new();
        recent.upsert(entry("ESP1", "online"));
        recent.upsert(entry("ESP1", "idle"));
        assert_eq!(recent.snapshot().len(), 2);
    }

    #[test]
    fn clones_share_the_buffer() {
        let recent = RecentActivity::new();
        let reader = recent.clone();
        recent.upsert(entry("ESP1", "online"));
        assert_eq!(reader.snapshot().len(), 1);
    }

    #[test]
    fn concurrent_upserts_never_exceed_capacity() {
        let recent = RecentActivity::new();
        std::thread::scope(|s| {
            for t in 0..4 {
                let recent = recent.clone();
                s.spawn(move || {
                    for i in 0..50 {
                        recent.upsert(entry(&format!("T{t}-{i}"), "online"));
                    }
                });
            }
        });
        assert_eq!(recent.snapshot().len(), MAX_RECENT_ENTRIES);
    }
}
