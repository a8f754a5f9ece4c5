use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::clock::age;
use crate::errors::{require, StoreError};

/// Keys owned by the record itself. Attributes using them are dropped so the
/// flattened wire object never carries duplicates.
const RESERVED_KEYS: [&str; 4] = ["id", "name", "lastSeen", "connectedAt"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
    pub last_seen: DateTime<Utc>,
    pub connected_at: DateTime<Utc>,
}

/// A heartbeat as the client sends it: identity, label and whatever else the
/// client wants to show about itself.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PresenceUpdate {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "name")]
    pub display_name: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl PresenceUpdate {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        PresenceUpdate {
            id: id.into(),
            display_name: display_name.into(),
            attributes: Map::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    records: HashMap<String, PresenceRecord>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the record for `update.id`.
    ///
    /// `connected_at` is kept from the previous record when one exists, so it
    /// always reflects the first heartbeat of the session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] when the id is empty.
    pub fn upsert(
        &mut self,
        update: PresenceUpdate,
        now: DateTime<Utc>,
    ) -> Result<(PresenceRecord, usize), StoreError> {
        require(&update.id, "id")?;

        let PresenceUpdate {
            id,
            display_name,
            mut attributes,
        } = update;
        attributes.retain(|key, _| !RESERVED_KEYS.contains(&key.as_str()));

        let connected_at = self
            .records
            .get(&id)
            .map_or(now, |existing| existing.connected_at);

        let record = PresenceRecord {
            id: id.clone(),
            display_name,
            attributes,
            last_seen: now,
            connected_at,
        };
        self.records.insert(id, record.clone());

        Ok((record, self.records.len()))
    }

    /// Returns every record seen within `stale_after` and drops the rest for good.
    pub fn list_active(&mut self, now: DateTime<Utc>, stale_after: Duration) -> Vec<PresenceRecord> {
        self.records
            .retain(|_, record| age(now, record.last_seen) <= stale_after);
        self.records.values().cloned().collect()
    }

    /// Removes records older than `max_age` and returns how many went.
    pub fn purge_older_than(&mut self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, record| age(now, record.last_seen) <= max_age);
        before - self.records.len()
    }

    /// Same filter as [`list_active`](Self::list_active) without evicting anything.
    pub fn count_active(&self, now: DateTime<Utc>, stale_after: Duration) -> usize {
        self.records
            .values()
            .filter(|record| age(now, record.last_seen) <= stale_after)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
