//! Process-wide cache of the core's access token signing keys.
//!
//! Entries expire after the TTL the core advertises (clamped to the configured
//! maximum). Readers share a read lock; a cache miss takes the fetch mutex so
//! that concurrent misses result in one fetch, not one per caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::error::Error;
use crate::token::{PublicKey, parse_public_key_hex};
use crate::types::KeyId;
use crate::well_known::SigningKeysDocument;

const MIN_TTL: Duration = Duration::from_secs(1);

/// Where signing keys come from. Implemented by [`CoreClient`](crate::core::CoreClient).
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch_signing_keys(&self) -> Result<SigningKeysDocument, Error>;
}

type KeyMap = Arc<HashMap<KeyId, PublicKey>>;

struct CachedKeys {
    keys: KeyMap,
    fetched_at: Instant,
    ttl: Duration,
    generation: u64,
}

impl CachedKeys {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }
}

/// Time-boxed signing key cache with single-flight refresh.
pub struct KeyCache {
    source: Arc<dyn KeySource>,
    max_ttl: Duration,
    cached: RwLock<Option<CachedKeys>>,
    fetching: Mutex<()>,
}

impl KeyCache {
    #[must_use]
    pub fn new(source: Arc<dyn KeySource>, max_ttl: Duration) -> Self {
        Self {
            source,
            max_ttl: max_ttl.max(MIN_TTL),
            cached: RwLock::new(None),
            fetching: Mutex::new(()),
        }
    }

    /// Look up the key for `kid`.
    ///
    /// A stale cache, or a fresh cache that does not know `kid`, triggers one
    /// refresh. Unknown ids force at most one refresh per second; inside that
    /// window they resolve to `Ok(None)` without contacting the core.
    /// `Ok(None)` means the core does not publish a usable key with that id.
    ///
    /// # Errors
    ///
    /// Propagates the key source error when a refresh is needed and fails.
    pub async fn get_key(&self, kid: &KeyId) -> Result<Option<PublicKey>, Error> {
        let seen = {
            let guard = self.cached.read().await;
            match guard.as_ref() {
                Some(cached) if cached.is_fresh() => {
                    if let Some(key) = cached.keys.get(kid) {
                        return Ok(Some(key.clone()));
                    }
                    if cached.fetched_at.elapsed() < MIN_TTL {
                        tracing::debug!(kid = %kid, "Unknown signing key, keys were just fetched");
                        return Ok(None);
                    }
                    tracing::warn!(kid = %kid, "Signing key not in cache, refreshing");
                    Some(cached.generation)
                }
                Some(cached) => Some(cached.generation),
                None => None,
            }
        };

        let keys = self.refresh(seen).await?;
        Ok(keys.get(kid).cloned())
    }

    /// Drop the cached keys; the next lookup fetches.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    async fn refresh(&self, seen_generation: Option<u64>) -> Result<KeyMap, Error> {
        let _fetching = self.fetching.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        {
            let guard = self.cached.read().await;
            if let Some(cached) = guard.as_ref() {
                if Some(cached.generation) != seen_generation && cached.is_fresh() {
                    return Ok(cached.keys.clone());
                }
            }
        }

        let document = self.source.fetch_signing_keys().await?;
        let ttl = Duration::from_secs(document.cache_ttl_seconds).clamp(MIN_TTL, self.max_ttl);
        let keys: KeyMap = Arc::new(
            document
                .keys
                .iter()
                .filter(|key| key.status.verifies())
                .filter_map(|key| match parse_public_key_hex(&key.public_key_hex) {
                    Ok(pk) => Some((KeyId(key.kid.clone()), pk)),
                    Err(e) => {
                        tracing::warn!(
                            kid = %key.kid,
                            error = %e,
                            "Skipping malformed signing key"
                        );
                        None
                    }
                })
                .collect(),
        );

        let mut guard = self.cached.write().await;
        let generation = guard.as_ref().map_or(1, |c| c.generation + 1);
        tracing::debug!(
            keys = keys.len(),
            ttl_secs = ttl.as_secs(),
            generation,
            "Signing keys refreshed"
        );
        *guard = Some(CachedKeys {
            keys: keys.clone(),
            fetched_at: Instant::now(),
            ttl,
            generation,
        });
        Ok(keys)
    }
}
