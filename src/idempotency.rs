use redis::AsyncCommands;
use serde::{Serialize, de::DeserializeOwned};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::warn;

const KEY_PREFIX: &str = "storefront:idempotency:";
/// Stored while the first request for a key is still running.
const PENDING_MARKER: &str = "__pending__";
/// A claim left behind by a crashed request frees up after this long.
const PENDING_TTL_SECS: u64 = 30;

pub async fn redis_set<T: Serialize>(client: &redis::Client, key: &str, value: &T, ttl_secs: u64) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn.set_ex(key, json, ttl_secs).await;
    }
}

/// Outcome of claiming an `Idempotency-Key`.
#[derive(Debug, PartialEq)]
pub enum Claim<T> {
    /// First request for the key; the caller must `complete` or `release`.
    Fresh,
    /// The key already produced this value.
    Replay(T),
    /// Another request holding the key has not finished yet.
    InFlight,
}

enum Entry<T> {
    Pending(Instant),
    Done(Instant, T),
}

/// Replays the stored response for a repeated `Idempotency-Key`. Redis holds
/// the entries when configured; otherwise they live in process memory.
#[derive(Clone)]
pub struct IdempotencyCache<T> {
    redis: Option<redis::Client>,
    local: Arc<Mutex<HashMap<String, Entry<T>>>>,
    ttl: Duration,
    pending_ttl: Duration,
}

impl<T> IdempotencyCache<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    pub fn new(redis: Option<redis::Client>, ttl_secs: u64) -> Self {
        Self {
            redis,
            local: Arc::new(Mutex::new(HashMap::new())),
            ttl: Duration::from_secs(ttl_secs.max(1)),
            pending_ttl: Duration::from_secs(PENDING_TTL_SECS),
        }
    }

    /// Atomically reserves `key` for this request unless it is already
    /// reserved or answered.
    pub async fn claim(&self, scope: &str, key: &str) -> Claim<T> {
        let key = cache_key(scope, key);
        if let Some(client) = &self.redis {
            return self.claim_redis(client, &key).await;
        }
        let mut local = self.local.lock().await;
        let (ttl, pending_ttl) = (self.ttl, self.pending_ttl);
        local.retain(|_, entry| match entry {
            Entry::Pending(at) => at.elapsed() < pending_ttl,
            Entry::Done(at, _) => at.elapsed() < ttl,
        });
        match local.get(&key) {
            Some(Entry::Done(_, value)) => Claim::Replay(value.clone()),
            Some(Entry::Pending(_)) => Claim::InFlight,
            None => {
                local.insert(key, Entry::Pending(Instant::now()));
                Claim::Fresh
            }
        }
    }

    async fn claim_redis(&self, client: &redis::Client, key: &str) -> Claim<T> {
        let mut conn = match client.get_multiplexed_async_connection().await {
            Ok(c) => c,
            Err(err) => {
                warn!(target = "storefront.idempotency", error = %err, "redis unavailable; key not enforced");
                return Claim::Fresh;
            }
        };
        let reserved: Result<Option<String>, _> = redis::cmd("SET")
            .arg(key)
            .arg(PENDING_MARKER)
            .arg("NX")
            .arg("EX")
            .arg(PENDING_TTL_SECS)
            .query_async(&mut conn)
            .await;
        match reserved {
            Ok(Some(_)) => Claim::Fresh,
            Ok(None) => {
                let stored: redis::RedisResult<Option<String>> = conn.get(key).await;
                match stored.ok().flatten().as_deref() {
                    Some(PENDING_MARKER) => Claim::InFlight,
                    // expired between SET and GET
                    None => Claim::InFlight,
                    Some(raw) => match serde_json::from_str(raw) {
                        Ok(value) => Claim::Replay(value),
                        Err(err) => {
                            warn!(target = "storefront.idempotency", error = %err, "unreadable cached response");
                            Claim::InFlight
                        }
                    },
                }
            }
            Err(err) => {
                warn!(target = "storefront.idempotency", error = %err, "redis claim failed; key not enforced");
                Claim::Fresh
            }
        }
    }

    /// Stores the response for a claimed key.
    pub async fn complete(&self, scope: &str, key: &str, value: &T) {
        let key = cache_key(scope, key);
        if let Some(client) = &self.redis {
            redis_set(client, &key, value, self.ttl.as_secs()).await;
            return;
        }
        self.local
            .lock()
            .await
            .insert(key, Entry::Done(Instant::now(), value.clone()));
    }

    /// Frees a claimed key after the request failed so it can be retried.
    pub async fn release(&self, scope: &str, key: &str) {
        let key = cache_key(scope, key);
        if let Some(client) = &self.redis {
            if let Ok(mut conn) = client.get_multiplexed_async_connection().await {
                let _: Result<(), _> = conn.del(&key).await;
            }
            return;
        }
        let mut local = self.local.lock().await;
        if matches!(local.get(&key), Some(Entry::Pending(_))) {
            local.remove(&key);
        }
    }
}

/// Keys are namespaced per caller so two customers cannot replay each
/// other's responses.
fn cache_key(scope: &str, key: &str) -> String {
    format!("{KEY_PREFIX}{scope}:{}", key.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_entries_replay_within_scope() {
        let cache: IdempotencyCache<String> = IdempotencyCache::new(None, 60);
        assert_eq!(cache.claim("user-1", "abc").await, Claim::Fresh);
        cache.complete("user-1", "abc", &"first".to_string()).await;
        assert_eq!(
            cache.claim("user-1", "abc").await,
            Claim::Replay("first".to_string())
        );
        assert_eq!(cache.claim("user-2", "abc").await, Claim::Fresh);
    }

    #[tokio::test]
    async fn second_claim_waits_on_the_first() {
        let cache: IdempotencyCache<u32> = IdempotencyCache::new(None, 60);
        assert_eq!(cache.claim("guest", "k").await, Claim::Fresh);
        assert_eq!(cache.claim("guest", "k").await, Claim::InFlight);

        cache.release("guest", "k").await;
        assert_eq!(cache.claim("guest", "k").await, Claim::Fresh);
    }

    #[tokio::test]
    async fn release_keeps_finished_entries() {
        let cache: IdempotencyCache<u32> = IdempotencyCache::new(None, 60);
        assert_eq!(cache.claim("guest", "k").await, Claim::Fresh);
        cache.complete("guest", "k", &3).await;
        cache.release("guest", "k").await;
        assert_eq!(cache.claim("guest", "k").await, Claim::Replay(3));
    }

    #[tokio::test]
    async fn expired_entries_are_dropped() {
        let cache: IdempotencyCache<u32> = IdempotencyCache {
            redis: None,
            local: Arc::new(Mutex::new(HashMap::new())),
            ttl: Duration::from_millis(10),
            pending_ttl: Duration::from_millis(10),
        };
        assert_eq!(cache.claim("guest", "k").await, Claim::Fresh);
        cache.complete("guest", "k", &7).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.claim("guest", "k").await, Claim::Fresh);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.claim("guest", "k").await, Claim::Fresh);
    }
}
