// In-memory key/value maps and append-only topics backing the `imap` and
// `kafka` connectors on a single node.

use dashmap::DashMap;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct MapEntry {
    pub key: serde_json::Value,
    pub value: serde_json::Value,
}

/// Named maps of JSON key to JSON value, iterated in key order
#[derive(Default)]
pub struct MapStore {
    maps: DashMap<String, BTreeMap<String, MapEntry>>,
}

impl MapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an entry, returning the previous one
    pub fn put(&self, map_name: &str, key: serde_json::Value, value: serde_json::Value) -> Option<MapEntry> {
        let mut map = self.maps.entry(map_name.to_string()).or_default();
        map.insert(key.to_string(), MapEntry { key, value })
    }

    pub fn get(&self, map_name: &str, key: &serde_json::Value) -> Option<serde_json::Value> {
        self.maps
            .get(map_name)
            .and_then(|map| map.get(&key.to_string()).map(|entry| entry.value.clone()))
    }

    /// Point-in-time copy of all entries
    pub fn entries(&self, map_name: &str) -> Vec<MapEntry> {
        self.maps
            .get(map_name)
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn first_entry(&self, map_name: &str) -> Option<MapEntry> {
        self.maps
            .get(map_name)
            .and_then(|map| map.values().next().cloned())
    }

    pub fn len(&self, map_name: &str) -> usize {
        self.maps.get(map_name).map(|map| map.len()).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicRecord {
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
}

/// Named append-only logs of encoded records
#[derive(Default)]
pub struct TopicStore {
    topics: DashMap<String, Vec<TopicRecord>>,
}

impl TopicStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and return its offset
    pub fn append(&self, topic: &str, record: TopicRecord) -> u64 {
        let mut log = self.topics.entry(topic.to_string()).or_default();
        log.push(record);
        (log.len() - 1) as u64
    }

    pub fn read(&self, topic: &str, offset: u64) -> Option<TopicRecord> {
        let offset = usize::try_from(offset).ok()?;
        self.topics
            .get(topic)
            .and_then(|log| log.get(offset).cloned())
    }

    pub fn len(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|log| log.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_map_put_overwrites_by_key() {
        let store = MapStore::new();
        assert!(store.put("m", json!({"id": 1}), json!({"name": "a"})).is_none());
        let previous = store.put("m", json!({"id": 1}), json!({"name": "b"})).unwrap();

        assert_eq!(previous.value, json!({"name": "a"}));
        assert_eq!(store.len("m"), 1);
        assert_eq!(store.get("m", &json!({"id": 1})), Some(json!({"name": "b"})));
        assert!(store.first_entry("other").is_none());
    }

    #[test]
    fn test_topic_offsets() {
        let store = TopicStore::new();
        let record = TopicRecord { key: None, value: b"{}".to_vec() };
        assert_eq!(store.append("t", record.clone()), 0);
        assert_eq!(store.append("t", record.clone()), 1);
        assert_eq!(store.read("t", 1), Some(record));
        assert!(store.read("t", 2).is_none());
        assert_eq!(store.len("t"), 2);
    }
}
