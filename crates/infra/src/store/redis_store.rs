//! Redis-backed coordination store.
//!
//! - **Plain keys**: `GET` / `SET .. PX` / `DEL`
//! - **Set-if-absent**: `SET .. NX PX`
//! - **Compare-and-act**: Lua scripts, so the read and the write run as one command
//! - **Ordered collections**: sorted sets; `ZADD NX` and `PEXPIRE` in one `MULTI`
//!
//! Every key is prefixed (`{prefix}:{key}`) so several deployments can share a server.
//! Each call opens a connection with a connect timeout and sets read/write timeouts,
//! so no store round-trip can block a producer or worker indefinitely.

use std::sync::Arc;
use std::time::Duration;

use tracing::{instrument, warn};

use relaydesk_coordination::{CoordinationStore, ScoredMember, StoreError};

const DEFAULT_PREFIX: &str = "relaydesk";

/// `ARGV[1]` = "1" when a current value is expected, "0" when the key must be absent.
const COMPARE_AND_SET: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
  if current ~= ARGV[2] then return 0 end
elseif current then
  return 0
end
redis.call('SET', KEYS[1], ARGV[3], 'PX', ARGV[4])
return 1
"#;

const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

const COMPARE_AND_EXPIRE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

#[derive(Debug, Clone)]
pub struct RedisStoreOptions {
    pub key_prefix: String,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
}

impl Default for RedisStoreOptions {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_PREFIX.to_string(),
            connect_timeout: Duration::from_secs(2),
            io_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
struct Scripts {
    compare_and_set: redis::Script,
    compare_and_delete: redis::Script,
    compare_and_expire: redis::Script,
}

#[derive(Debug, Clone)]
pub struct RedisCoordinationStore {
    client: Arc<redis::Client>,
    options: RedisStoreOptions,
    scripts: Arc<Scripts>,
}

impl RedisCoordinationStore {
    /// Create a store for `redis_url` (e.g. "redis://localhost:6379").
    ///
    /// Opening the client does not connect; the first command does.
    pub fn new(redis_url: impl AsRef<str>, options: RedisStoreOptions) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(redis_url.as_ref()).map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            options,
            scripts: Arc::new(Scripts {
                compare_and_set: redis::Script::new(COMPARE_AND_SET),
                compare_and_delete: redis::Script::new(COMPARE_AND_DELETE),
                compare_and_expire: redis::Script::new(COMPARE_AND_EXPIRE),
            }),
        })
    }

    /// Round-trip a `PING`, for startup checks.
    pub fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let _: String = redis::cmd("PING").query(&mut conn).map_err(map_err)?;
        Ok(())
    }

    fn key(&self, key: &str) -> String {
        prefixed(&self.options.key_prefix, key)
    }

    fn connection(&self) -> Result<redis::Connection, StoreError> {
        let conn = self
            .client
            .get_connection_with_timeout(self.options.connect_timeout)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        conn.set_read_timeout(Some(self.options.io_timeout))
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        conn.set_write_timeout(Some(self.options.io_timeout))
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(conn)
    }
}

fn prefixed(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}:{key}")
    }
}

/// TTL in whole milliseconds; Redis rejects zero and anything past `i64::MAX`.
fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1)
}

fn map_err(e: redis::RedisError) -> StoreError {
    if e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal() {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}

impl CoordinationStore for RedisCoordinationStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection()?;
        redis::cmd("GET")
            .arg(self.key(key))
            .query(&mut conn)
            .map_err(map_err)
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let _: () = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query(&mut conn)
            .map_err(map_err)?;
        Ok(())
    }

    #[instrument(skip(self, value))]
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        // Nil reply when the key already exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query(&mut conn)
            .map_err(map_err)?;
        Ok(reply.is_some())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let removed: i64 = redis::cmd("DEL")
            .arg(self.key(key))
            .query(&mut conn)
            .map_err(map_err)?;
        Ok(removed > 0)
    }

    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let (flag, expected) = match expected {
            Some(v) => ("1", v),
            None => ("0", ""),
        };
        let written: i64 = self
            .scripts
            .compare_and_set
            .key(self.key(key))
            .arg(flag)
            .arg(expected)
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke(&mut conn)
            .map_err(map_err)?;
        Ok(written == 1)
    }

    fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let removed: i64 = self
            .scripts
            .compare_and_delete
            .key(self.key(key))
            .arg(expected)
            .invoke(&mut conn)
            .map_err(map_err)?;
        Ok(removed == 1)
    }

    fn compare_and_expire(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let extended: i64 = self
            .scripts
            .compare_and_expire
            .key(self.key(key))
            .arg(expected)
            .arg(ttl_millis(ttl))
            .invoke(&mut conn)
            .map_err(map_err)?;
        Ok(extended == 1)
    }

    fn sorted_add_if_absent(
        &self,
        key: &str,
        member: &str,
        score: i64,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let key = self.key(key);
        let (added,): (i64,) = redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(&key)
            .arg("NX")
            .arg(score)
            .arg(member)
            .cmd("PEXPIRE")
            .arg(&key)
            .arg(ttl_millis(ttl))
            .ignore()
            .query(&mut conn)
            .map_err(map_err)?;
        Ok(added == 1)
    }

    fn sorted_range(&self, key: &str, limit: usize) -> Result<Vec<ScoredMember>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection()?;
        let stop = i64::try_from(limit).unwrap_or(i64::MAX).saturating_sub(1);
        let rows: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(self.key(key))
            .arg(0)
            .arg(stop)
            .arg("WITHSCORES")
            .query(&mut conn)
            .map_err(map_err)?;

        Ok(rows
            .into_iter()
            .map(|(member, score)| ScoredMember {
                member,
                score: score as i64,
            })
            .collect())
    }

    fn sorted_remove(&self, key: &str, members: &[String]) -> Result<usize, StoreError> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection()?;
        let removed: i64 = redis::cmd("ZREM")
            .arg(self.key(key))
            .arg(members)
            .query(&mut conn)
            .map_err(map_err)?;
        Ok(usize::try_from(removed).unwrap_or_else(|_| {
            warn!(removed, "negative ZREM reply");
            0
        }))
    }

    fn sorted_len(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.connection()?;
        let len: i64 = redis::cmd("ZCARD")
            .arg(self.key(key))
            .query(&mut conn)
            .map_err(map_err)?;
        Ok(usize::try_from(len).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed() {
        assert_eq!(prefixed("relaydesk", "web-crawl:lock:t1:src"), "relaydesk:web-crawl:lock:t1:src");
        assert_eq!(prefixed("", "web-crawl:lock:t1:src"), "web-crawl:lock:t1:src");
    }

    #[test]
    fn ttl_is_whole_positive_millis() {
        assert_eq!(ttl_millis(Duration::from_secs(30)), 30_000);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::MAX), i64::MAX);
    }

    #[test]
    fn bad_url_is_a_connection_error() {
        let err = RedisCoordinationStore::new("not a url", RedisStoreOptions::default()).unwrap_err();
        assert!(matches!(err, StoreError::Connection(_)));
    }
}
