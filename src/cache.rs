//! C5: content-addressed replay cache around the completion call.

use crate::types::{AssistantMessage, Conversation};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub type Fingerprint = String;

/// `fingerprint -> AssistantMessage`, with insertion order preserved when
/// serialized (an `indexmap`-shaped contract implemented here with a
/// parallel `Vec<Fingerprint>` order list, since the teacher's stack has
/// no `indexmap` dependency and a plain `Vec` is enough at this scale).
#[derive(Debug, Clone, Default)]
pub struct CacheMap {
    order: Vec<Fingerprint>,
    entries: HashMap<Fingerprint, AssistantMessage>,
}

impl CacheMap {
    pub fn get(&self, key: &str) -> Option<&AssistantMessage> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: Fingerprint, value: AssistantMessage) {
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.entries.insert(key, value);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn to_serializable(&self) -> Vec<(Fingerprint, AssistantMessage)> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    fn from_map(map: HashMap<Fingerprint, AssistantMessage>) -> Self {
        let order = map.keys().cloned().collect();
        Self {
            order,
            entries: map,
        }
    }
}

impl Serialize for CacheMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let pairs = self.to_serializable();
        let mut map = serializer.serialize_map(Some(pairs.len()))?;
        for (k, v) in pairs {
            map.serialize_entry(&k, &v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CacheMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let map = HashMap::<Fingerprint, AssistantMessage>::deserialize(deserializer)?;
        Ok(CacheMap::from_map(map))
    }
}

/// The replay cache: an `input` side loaded by the caller for replay, and
/// an `output` side populated during the run.
#[derive(Debug, Clone, Default)]
pub struct ReplayCache {
    input: CacheMap,
    output: CacheMap,
}

impl ReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(input: CacheMap) -> Self {
        Self {
            input,
            output: CacheMap::default(),
        }
    }

    /// A missing or unparseable file is treated as `{}` per the external
    /// interface contract.
    pub fn load_file(path: impl AsRef<Path>) -> Self {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Self::new(),
        };
        let map: HashMap<Fingerprint, AssistantMessage> =
            serde_json::from_str(&contents).unwrap_or_default();
        Self::with_input(CacheMap::from_map(map))
    }

    /// Writes the file only if `output` differs from the original `input`
    /// contents, pretty-printed with 2-space indent.
    pub fn save_file_if_changed(&self, path: impl AsRef<Path>) -> Result<(), crate::error::LoopError> {
        if self.output_equals_input() {
            return Ok(());
        }
        let body = serde_json::to_string_pretty(&self.output).map_err(std::io::Error::from)?;
        fs::write(path, body)?;
        Ok(())
    }

    fn output_equals_input(&self) -> bool {
        self.output.len() == self.input.len()
            && self
                .output
                .to_serializable()
                .iter()
                .all(|(k, v)| self.input.get(k).map(|iv| messages_eq(iv, v)).unwrap_or(false))
    }

    pub fn output(&self) -> &CacheMap {
        &self.output
    }

    /// Implements the lookup/record protocol from §4.5. `live` is invoked
    /// only on a full miss.
    pub async fn complete<F, Fut>(
        &mut self,
        conversation: &Conversation,
        live: F,
    ) -> AssistantMessage
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = AssistantMessage>,
    {
        let key = fingerprint(conversation);
        let prefix = &key[..key.len().min(12)];
        if let Some(hit) = self.input.get(&key).cloned() {
            log::debug!("replay cache hit (input) {}", prefix);
            self.output.insert(key, hit.clone());
            return hit;
        }
        if let Some(hit) = self.output.get(&key).cloned() {
            log::debug!("replay cache hit (output, within-run) {}", prefix);
            return hit;
        }
        log::debug!("replay cache miss {}", prefix);
        let result = live().await;
        self.output.insert(key, result.clone());
        result
    }
}

fn messages_eq(a: &AssistantMessage, b: &AssistantMessage) -> bool {
    serde_json::to_value(a).ok() == serde_json::to_value(b).ok()
}

/// `SHA1(canonical_json(conversation))`, with `localhost:<port>`
/// normalized to `localhost:PORT` so ephemeral test ports don't
/// invalidate the cache.
pub fn fingerprint(conversation: &Conversation) -> Fingerprint {
    let json = serde_json::to_string(conversation).expect("Conversation always serializes");
    let normalized = normalize_localhost_ports(&json);
    let mut hasher = Sha1::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

fn normalize_localhost_ports(input: &str) -> String {
    let bytes = input.as_bytes();
    const NEEDLE: &[u8] = b"localhost:";
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(NEEDLE) {
            out.extend_from_slice(NEEDLE);
            let mut j = i + NEEDLE.len();
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            out.extend_from_slice(b"PORT");
            i = j;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).expect("byte-preserving copy stays valid utf-8")
}

// minimal hex encoding so we don't pull in yet another crate just for this.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes
            .as_ref()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Conversation, Message};

    fn conv(port: u16) -> Conversation {
        Conversation {
            system_prompt: "sys".into(),
            messages: vec![Message::user(format!("hit localhost:{} please", port))],
            tools: vec![],
        }
    }

    #[test]
    fn port_normalization_yields_stable_fingerprint() {
        assert_eq!(fingerprint(&conv(54321)), fingerprint(&conv(1)));
    }

    #[test]
    fn different_text_yields_different_fingerprint() {
        assert_ne!(fingerprint(&conv(1)), fingerprint(&conv(1)) + "x");
    }

    #[test]
    fn missing_file_loads_as_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist.json");
        let cache = ReplayCache::load_file(&missing);
        assert!(cache.input.is_empty());
    }

    #[tokio::test]
    async fn save_file_if_changed_writes_only_when_output_differs_from_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let mut cache = ReplayCache::load_file(&path);
        let reply = AssistantMessage::text_only("hi");
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let _ = cache
            .complete(&conv(1), || {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let reply = reply.clone();
                async move { reply }
            })
            .await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        cache.save_file_if_changed(&path).unwrap();
        assert!(path.exists());

        let reloaded = ReplayCache::load_file(&path);
        assert_eq!(reloaded.input.len(), 1);
    }
}
