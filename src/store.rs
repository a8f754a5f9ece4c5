use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::clock::{Clock, SystemClock};
use crate::errors::StoreError;
use crate::messages::{ChatMessage, MessageLog, NewMessage};
use crate::presence::{PresenceRecord, PresenceRegistry, PresenceUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    /// Heartbeat age after which a presence record stops being listed.
    pub stale_after: Duration,
    pub message_capacity: usize,
    pub default_message_limit: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            stale_after: Duration::from_secs(5 * 60),
            message_capacity: 100,
            default_message_limit: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub presence_count: usize,
    pub active_presence_count: usize,
    pub message_count: usize,
    pub last_activity_at: DateTime<Utc>,
}

/// Owns the presence registry and the message log.
///
/// Each collection sits behind its own lock and no method takes both, so a
/// burst of heartbeats never waits on chat traffic or the other way round.
/// Callers only ever get clones back.
pub struct StateStore {
    presence: Mutex<PresenceRegistry>,
    messages: Mutex<MessageLog>,
    last_activity_at: Mutex<DateTime<Utc>>,
    settings: StoreSettings,
    clock: Arc<dyn Clock>,
}

impl StateStore {
    pub fn new(settings: StoreSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    /// Capacity and default limit below one are raised to one, so
    /// [`settings`](Self::settings) always describes what the log enforces.
    pub fn with_clock(mut settings: StoreSettings, clock: Arc<dyn Clock>) -> Self {
        settings.message_capacity = settings.message_capacity.max(1);
        settings.default_message_limit = settings.default_message_limit.max(1);
        let now = clock.now();
        StateStore {
            presence: Mutex::new(PresenceRegistry::new()),
            messages: Mutex::new(MessageLog::new(
                settings.message_capacity,
                settings.default_message_limit,
            )),
            last_activity_at: Mutex::new(now),
            settings,
            clock,
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Called after the collection lock is released, with the time read
    /// inside it.
    fn touch(&self, now: DateTime<Utc>) {
        let mut last = self.last_activity_at.lock();
        if now > *last {
            *last = now;
        }
    }

    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] when `id` is empty.
    pub fn upsert_presence(
        &self,
        id: impl Into<String>,
        display_name: impl Into<String>,
        attributes: Map<String, Value>,
    ) -> Result<(PresenceRecord, usize), StoreError> {
        self.record_presence(PresenceUpdate {
            id: id.into(),
            display_name: display_name.into(),
            attributes,
        })
    }

    /// [`upsert_presence`](Self::upsert_presence) for an already decoded heartbeat.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] when the id is empty.
    pub fn record_presence(
        &self,
        update: PresenceUpdate,
    ) -> Result<(PresenceRecord, usize), StoreError> {
        // Time is read under the lock so writes to one id apply in clock order.
        let (result, now) = {
            let mut presence = self.presence.lock();
            let now = self.clock.now();
            (presence.upsert(update, now), now)
        };
        self.touch(now);
        result
    }

    pub fn list_presence(&self, stale_after: Duration) -> Vec<PresenceRecord> {
        let (active, now) = {
            let mut presence = self.presence.lock();
            let now = self.clock.now();
            (presence.list_active(now, stale_after), now)
        };
        self.touch(now);
        active
    }

    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] when the sender id or body is empty.
    pub fn append_message(&self, message: NewMessage) -> Result<(ChatMessage, usize), StoreError> {
        let (result, now) = {
            let mut messages = self.messages.lock();
            let now = self.clock.now();
            (messages.append(message, now), now)
        };
        self.touch(now);
        result
    }

    pub fn list_messages(&self, limit: usize) -> Vec<ChatMessage> {
        let tail = self.messages.lock().tail(limit);
        self.touch(self.clock.now());
        tail
    }

    pub fn purge_presence(&self, max_age: Duration) -> usize {
        let (removed, now) = {
            let mut presence = self.presence.lock();
            let now = self.clock.now();
            (presence.purge_older_than(now, max_age), now)
        };
        self.touch(now);
        removed
    }

    /// Counts without evicting and without moving `last_activity_at`.
    pub fn snapshot_stats(&self) -> StoreStats {
        let now = self.clock.now();
        let (presence_count, active_presence_count) = {
            let presence = self.presence.lock();
            (
                presence.len(),
                presence.count_active(now, self.settings.stale_after),
            )
        };
        let message_count = self.messages.lock().size();

        StoreStats {
            presence_count,
            active_presence_count,
            message_count,
            last_activity_at: *self.last_activity_at.lock(),
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(StoreSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn store_with(settings: StoreSettings) -> (StateStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch());
        let store = StateStore::with_clock(settings, clock.clone());
        (store, clock)
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn presence_refresh_keeps_connected_at() {
        let (store, clock) = store_with(StoreSettings::default());
        store.upsert_presence("u1", "Alice", Map::new()).unwrap();
        clock.advance(secs(10));
        store.upsert_presence("u1", "Alice2", Map::new()).unwrap();
        clock.advance(secs(10));

        let listed = store.list_presence(secs(100));
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].display_name, "Alice2");
        assert_eq!(listed[0].connected_at, DateTime::UNIX_EPOCH);
        assert_eq!(listed[0].last_seen, DateTime::UNIX_EPOCH + secs(10));
    }

    #[test]
    fn eviction_outlives_the_call_that_caused_it() {
        let (store, clock) = store_with(StoreSettings::default());
        store.upsert_presence("u1", "Alice", Map::new()).unwrap();
        clock.advance(secs(10));
        store.upsert_presence("u1", "Alice2", Map::new()).unwrap();
        clock.advance(secs(10));

        assert!(store.list_presence(secs(5)).is_empty());
        assert!(store.list_presence(secs(100)).is_empty());
    }

    #[test]
    fn fresh_upsert_is_listed_even_with_zero_threshold() {
        let (store, _clock) = store_with(StoreSettings::default());
        let (_, count) = store.upsert_presence("u1", "Alice", Map::new()).unwrap();

        assert_eq!(count, 1);
        assert_eq!(store.list_presence(Duration::ZERO).len(), 1);
    }

    #[test]
    fn message_log_respects_capacity() {
        let (store, _clock) = store_with(StoreSettings {
            message_capacity: 3,
            ..StoreSettings::default()
        });
        for body in ["A", "B", "C", "D"] {
            store.append_message(NewMessage::new("u1", "Alice", body)).unwrap();
        }
        let bodies: Vec<_> = store.list_messages(10).into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, ["B", "C", "D"]);

        store.append_message(NewMessage::new("u1", "Alice", "E")).unwrap();
        let bodies: Vec<_> = store.list_messages(10).into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, ["C", "D", "E"]);
    }

    #[test]
    fn appended_message_is_last_in_listing() {
        let (store, _clock) = store_with(StoreSettings::default());
        store.append_message(NewMessage::new("u1", "Alice", "first")).unwrap();
        let (stored, total) = store.append_message(NewMessage::new("u2", "Bob", "second")).unwrap();

        assert_eq!(total, 2);
        assert_eq!(store.list_messages(1), vec![stored]);
    }

    #[test]
    fn rejected_append_leaves_log_untouched() {
        let (store, _clock) = store_with(StoreSettings::default());
        store.append_message(NewMessage::new("u1", "Alice", "hi")).unwrap();

        assert!(store.append_message(NewMessage::new("u1", "Alice", "")).is_err());
        assert!(store.append_message(NewMessage::new("", "Alice", "hi")).is_err());
        assert_eq!(store.snapshot_stats().message_count, 1);
    }

    #[test]
    fn purge_removes_only_records_past_max_age() {
        let (store, clock) = store_with(StoreSettings::default());
        store.upsert_presence("old", "Old", Map::new()).unwrap();
        clock.advance(secs(700));
        store.upsert_presence("new", "New", Map::new()).unwrap();

        assert_eq!(store.purge_presence(secs(600)), 1);
        assert_eq!(store.snapshot_stats().presence_count, 1);
    }

    #[test]
    fn stats_count_without_evicting() {
        let (store, clock) = store_with(StoreSettings {
            stale_after: secs(30),
            ..StoreSettings::default()
        });
        store.upsert_presence("u1", "Alice", Map::new()).unwrap();
        clock.advance(secs(60));
        store.upsert_presence("u2", "Bob", Map::new()).unwrap();
        store.append_message(NewMessage::new("u2", "Bob", "hi")).unwrap();

        let stats = store.snapshot_stats();
        assert_eq!(stats.presence_count, 2);
        assert_eq!(stats.active_presence_count, 1);
        assert_eq!(stats.message_count, 1);
        assert_eq!(stats.last_activity_at, DateTime::UNIX_EPOCH + secs(60));
        assert_eq!(store.snapshot_stats().presence_count, 2);
    }

    #[test]
    fn every_operation_moves_last_activity_except_stats() {
        let (store, clock) = store_with(StoreSettings::default());
        assert_eq!(store.snapshot_stats().last_activity_at, DateTime::UNIX_EPOCH);

        clock.advance(secs(5));
        store.list_messages(0);
        assert_eq!(store.snapshot_stats().last_activity_at, DateTime::UNIX_EPOCH + secs(5));

        clock.advance(secs(5));
        let _ = store.append_message(NewMessage::new("", "", ""));
        assert_eq!(store.snapshot_stats().last_activity_at, DateTime::UNIX_EPOCH + secs(10));

        clock.advance(secs(5));
        store.snapshot_stats();
        assert_eq!(store.snapshot_stats().last_activity_at, DateTime::UNIX_EPOCH + secs(10));
    }

    /// Hands out t=0 to its first reader after construction and then stalls
    /// it; everyone after that sees t=10.
    struct StallingClock {
        calls: AtomicUsize,
    }

    impl Clock for StallingClock {
        fn now(&self) -> DateTime<Utc> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => DateTime::UNIX_EPOCH,
                1 => {
                    thread::sleep(Duration::from_millis(200));
                    DateTime::UNIX_EPOCH
                }
                _ => DateTime::UNIX_EPOCH + secs(10),
            }
        }
    }

    #[test]
    fn slow_clock_reader_cannot_reorder_heartbeats() {
        let clock = Arc::new(StallingClock {
            calls: AtomicUsize::new(0),
        });
        let store = StateStore::with_clock(StoreSettings::default(), clock);

        thread::scope(|scope| {
            for name in ["first", "second"] {
                let store = &store;
                scope.spawn(move || store.upsert_presence("u1", name, Map::new()).unwrap());
            }
        });

        let listed = store.list_presence(secs(100));
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].connected_at, DateTime::UNIX_EPOCH);
        assert_eq!(listed[0].last_seen, DateTime::UNIX_EPOCH + secs(10));
        assert_eq!(store.snapshot_stats().last_activity_at, DateTime::UNIX_EPOCH + secs(10));
    }

    #[test]
    fn zero_capacity_settings_are_normalized() {
        let (store, _clock) = store_with(StoreSettings {
            message_capacity: 0,
            default_message_limit: 0,
            ..StoreSettings::default()
        });
        assert_eq!(store.settings().message_capacity, 1);
        assert_eq!(store.settings().default_message_limit, 1);

        store.append_message(NewMessage::new("u1", "Alice", "A")).unwrap();
        let (_, total) = store.append_message(NewMessage::new("u1", "Alice", "B")).unwrap();
        assert_eq!(total, store.settings().message_capacity);
    }
}
