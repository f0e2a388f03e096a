use serde::{Deserialize, Serialize};

use super::command::CommandRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        KeyValue {
            key: key.as_ref().into(),
            value: value.as_ref().into(),
        }
    }
}

/// Ordered key-value bag threaded through request, fetch, parse and
/// sub-request hops. Keys are unique; a later write replaces the value in
/// place and keeps the original position. Decoding goes through
/// [`SharingData::set`] too, so duplicate keys on the wire collapse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "Vec<KeyValue>", into = "Vec<KeyValue>")]
pub struct SharingData {
    entries: Vec<KeyValue>,
}

impl SharingData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl AsRef<str>, value: impl AsRef<str>) {
        let key = key.as_ref();
        match self.entries.iter_mut().find(|kv| kv.key == key) {
            Some(existing) => existing.value = value.as_ref().into(),
            None => self.entries.push(KeyValue::new(key, value)),
        }
    }

    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        self.entries
            .iter()
            .find(|kv| kv.key == key.as_ref())
            .map(|kv| kv.value.as_str())
    }

    /// Last-write-wins merge of `other` into `self`.
    pub fn merge(&mut self, other: &SharingData) {
        for kv in &other.entries {
            self.set(&kv.key, &kv.value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.entries.iter()
    }
}

impl FromIterator<KeyValue> for SharingData {
    fn from_iter<T: IntoIterator<Item = KeyValue>>(iter: T) -> Self {
        let mut data = SharingData::new();
        for kv in iter {
            data.set(kv.key, kv.value);
        }
        data
    }
}

impl From<Vec<KeyValue>> for SharingData {
    fn from(entries: Vec<KeyValue>) -> Self {
        entries.into_iter().collect()
    }
}

impl From<SharingData> for Vec<KeyValue> {
    fn from(data: SharingData) -> Self {
        data.entries
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for SharingData {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut data = SharingData::new();
        for (k, v) in iter {
            data.set(k, v);
        }
        data
    }
}

/// Correlation context handed to a crawler's `parse` and back through every
/// yield. Cloned per hop; crawlers extend it with [`ShareContext::with_value`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShareContext {
    pub tracing_id: String,
    pub job_id: String,
    pub req_id: String,
    pub sharing: SharingData,
}

impl ShareContext {
    pub fn from_request(request: &CommandRequest) -> Self {
        ShareContext {
            tracing_id: request.tracing_id.clone(),
            job_id: request.job_id.clone(),
            req_id: request.req_id.clone(),
            sharing: request.sharing_data.clone(),
        }
    }

    pub fn with_value(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.sharing.set(key, value);
        self
    }

    pub fn value(&self, key: impl AsRef<str>) -> Option<&str> {
        self.sharing.get(key)
    }
}
