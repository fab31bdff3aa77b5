//! In-memory coordination store for tests/dev.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{CoordinationStore, ScoredMember, StoreError};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Sorted(HashMap<String, i64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Longest expiry honoured; larger TTLs are clamped so the deadline never overflows.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn deadline(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now)
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Command(format!("WRONGTYPE operation against key {key}"))
}

/// In-memory store.
///
/// - No IO
/// - A single mutex makes every operation atomic
/// - Expiry is lazy: stale entries are dropped when touched
#[derive(Debug, Default)]
pub struct InMemoryCoordinationStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, StoreError> {
        self.entries.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Drop the key if it has expired and return the live entry, if any.
    fn live_entry<'a>(
        map: &'a mut HashMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut Entry> {
        if map.get(key).is_some_and(|e| !e.live(now)) {
            map.remove(key);
        }
        map.get_mut(key)
    }

    fn live_text(
        map: &mut HashMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> Result<Option<String>, StoreError> {
        match Self::live_entry(map, key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::Text(v),
                ..
            }) => Ok(Some(v.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }
}

impl CoordinationStore for InMemoryCoordinationStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut map = self.lock()?;
        Self::live_text(&mut map, key, Instant::now())
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut map = self.lock()?;
        let now = Instant::now();
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: deadline(now, ttl),
            },
        );
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut map = self.lock()?;
        let now = Instant::now();
        if Self::live_entry(&mut map, key, now).is_some() {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: deadline(now, ttl),
            },
        );
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut map = self.lock()?;
        let existed = Self::live_entry(&mut map, key, Instant::now()).is_some();
        map.remove(key);
        Ok(existed)
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut map = self.lock()?;
        let now = Instant::now();
        let current = Self::live_text(&mut map, key, now)?;
        if current.as_deref() != expected {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: deadline(now, ttl),
            },
        );
        Ok(true)
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut map = self.lock()?;
        let current = Self::live_text(&mut map, key, Instant::now())?;
        if current.as_deref() != Some(expected) {
            return Ok(false);
        }
        map.remove(key);
        Ok(true)
    }

    fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut map = self.lock()?;
        let now = Instant::now();
        match Self::live_entry(&mut map, key, now) {
            Some(entry) => match &entry.value {
                Value::Text(v) if v == expected => {
                    entry.expires_at = deadline(now, ttl);
                    Ok(true)
                }
                Value::Text(_) => Ok(false),
                Value::Sorted(_) => Err(wrong_type(key)),
            },
            None => Ok(false),
        }
    }

    fn sorted_add_if_absent(
        &self,
        key: &str,
        member: &str,
        score: i64,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut map = self.lock()?;
        let now = Instant::now();
        if Self::live_entry(&mut map, key, now).is_none() {
            map.insert(
                key.to_string(),
                Entry {
                    value: Value::Sorted(HashMap::new()),
                    expires_at: deadline(now, ttl),
                },
            );
        }

        let entry = map
            .get_mut(key)
            .ok_or_else(|| StoreError::Command(format!("entry vanished for {key}")))?;
        entry.expires_at = deadline(now, ttl);
        match &mut entry.value {
            Value::Sorted(members) => {
                if members.contains_key(member) {
                    return Ok(false);
                }
                members.insert(member.to_string(), score);
                Ok(true)
            }
            Value::Text(_) => Err(wrong_type(key)),
        }
    }

    fn sorted_range(&self, key: &str, limit: usize) -> Result<Vec<ScoredMember>, StoreError> {
        let mut map = self.lock()?;
        match Self::live_entry(&mut map, key, Instant::now()) {
            None => Ok(vec![]),
            Some(Entry {
                value: Value::Sorted(members),
                ..
            }) => {
                let mut out: Vec<ScoredMember> = members
                    .iter()
                    .map(|(member, score)| ScoredMember {
                        member: member.clone(),
                        score: *score,
                    })
                    .collect();
                out.sort_by(|a, b| a.score.cmp(&b.score).then_with(|| a.member.cmp(&b.member)));
                out.truncate(limit);
                Ok(out)
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn sorted_remove(&self, key: &str, members: &[String]) -> Result<usize, StoreError> {
        let mut map = self.lock()?;
        let (removed, now_empty) = match Self::live_entry(&mut map, key, Instant::now()) {
            None => return Ok(0),
            Some(Entry {
                value: Value::Sorted(set),
                ..
            }) => {
                let removed = members.iter().filter(|m| set.remove(*m).is_some()).count();
                (removed, set.is_empty())
            }
            Some(_) => return Err(wrong_type(key)),
        };
        if now_empty {
            map.remove(key);
        }
        Ok(removed)
    }

    fn sorted_len(&self, key: &str) -> Result<usize, StoreError> {
        let mut map = self.lock()?;
        match Self::live_entry(&mut map, key, Instant::now()) {
            None => Ok(0),
            Some(Entry {
                value: Value::Sorted(set),
                ..
            }) => Ok(set.len()),
            Some(_) => Err(wrong_type(key)),
        }
    }
}
