//! Fast store for messages of sessions that are still in progress.
//!
//! Layout follows the usual key-value conventions:
//! - `session:{uuid}:messages`: sorted set, member = message id, score =
//!   `created_at` in epoch ms
//! - `message:{id}`: JSON [`ActiveMessage`]
//!
//! [`MemoryActiveStore`] is the in-process implementation; a networked
//! backend implements the same trait.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use hearth_shared::protocol::ActiveMessage;

use crate::error::ServerError;

/// Pattern matching every session index key.
pub const SESSION_INDEX_PATTERN: &str = "session:*:messages";

pub fn session_index_key(session_id: &str) -> String {
    format!("session:{session_id}:messages")
}

pub fn message_key(message_id: &str) -> String {
    format!("message:{message_id}")
}

/// The raw session id embedded in an index key, validated or not.
pub fn session_id_from_key(key: &str) -> Option<&str> {
    key.strip_prefix("session:")?.strip_suffix(":messages")
}

#[async_trait]
pub trait ActiveStore: Send + Sync {
    /// One page of keys matching `pattern` (`*` and `?` wildcards).  A
    /// returned cursor of 0 ends the iteration.  Keys may repeat across
    /// pages.
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), ServerError>;

    /// Members of the sorted set at `key` with score `>= min`, ordered by
    /// score then member, skipping `offset` and returning at most `limit`.
    async fn range_by_score(
        &self,
        key: &str,
        min: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<(String, i64)>, ServerError>;

    async fn get(&self, key: &str) -> Result<Option<String>, ServerError>;

    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<(), ServerError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), ServerError>;
}

/// Write a message into the active store: the record first, then its index
/// entry, so an indexed id always has a record unless it was removed later.
pub async fn submit_message(
    store: &dyn ActiveStore,
    message: &ActiveMessage,
) -> Result<(), ServerError> {
    let json = serde_json::to_string(message)
        .map_err(|e| ServerError::Internal(format!("Failed to encode message: {e}")))?;
    let id = message.id.to_string();
    store.set(&message_key(&id), &json).await?;
    store
        .zadd(
            &session_index_key(&message.session_id.to_string()),
            message.created_at.timestamp_millis(),
            &id,
        )
        .await
}

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    ZSet(BTreeMap<String, i64>),
}

#[derive(Debug, Default)]
pub struct MemoryActiveStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryActiveStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn wrong_type(key: &str) -> ServerError {
    ServerError::ActiveStore(format!("WRONGTYPE operation against key '{key}'"))
}

#[async_trait]
impl ActiveStore for MemoryActiveStore {
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), ServerError> {
        let entries = self.entries.read().await;
        let start = cursor as usize;
        let count = count.max(1);

        // Keys are visited in order; the cursor is a position in that order.
        let keys = entries
            .keys()
            .skip(start)
            .take(count)
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();

        let next = if start + count >= entries.len() {
            0
        } else {
            (start + count) as u64
        };
        Ok((next, keys))
    }

    async fn range_by_score(
        &self,
        key: &str,
        min: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<(String, i64)>, ServerError> {
        let entries = self.entries.read().await;
        let set = match entries.get(key) {
            None => return Ok(Vec::new()),
            Some(Value::ZSet(set)) => set,
            Some(Value::Str(_)) => return Err(wrong_type(key)),
        };

        let mut members: Vec<(String, i64)> = set
            .iter()
            .filter(|(_, score)| **score >= min)
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        members.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        Ok(members.into_iter().skip(offset).take(limit).collect())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ServerError> {
        match self.entries.read().await.get(key) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(Value::ZSet(_)) => Err(wrong_type(key)),
        }
    }

    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<(), ServerError> {
        let mut entries = self.entries.write().await;
        match entries
            .entry(key.to_string())
            .or_insert_with(|| Value::ZSet(BTreeMap::new()))
        {
            Value::ZSet(set) => {
                set.insert(member.to_string(), score);
                Ok(())
            }
            Value::Str(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ServerError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), Value::Str(value.to_string()));
        Ok(())
    }
}

/// Glob matching with `*` (any run) and `?` (any single char).
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
