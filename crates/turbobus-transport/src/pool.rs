//! Bounded keyed object pool.
//!
//! Each key has its own free list and a semaphore holding `max_active`
//! permits. A borrow takes a permit and then the most recently returned idle
//! object, or asks the factory for a new one. Objects are never validated on
//! borrow; a return validates and passivates the object before it goes back
//! to the free list, and destroys it otherwise.
//!
//! Borrowed objects are handed out as [`PooledObject`] guards. Dropping a
//! guard returns the object on a background task; call
//! [`PooledObject::release`] to return it in place.

use std::collections::VecDeque;
use std::fmt;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::core::{PoolExhaustedAction, TransportError, TransportResult};

/// Creates and maintains the objects of a [`KeyedPool`].
#[async_trait]
pub trait PooledObjectFactory<K, V>: Send + Sync + 'static {
    /// Creates a new object for `key`.
    async fn make(&self, key: &K) -> TransportResult<V>;

    /// Releases an object that leaves the pool.
    async fn destroy(&self, key: &K, value: V);

    /// Prepares an object before it is handed to a borrower.
    async fn activate(&self, key: &K, value: &V) -> TransportResult<()>;

    /// Resets an object before it goes back to the free list.
    async fn passivate(&self, key: &K, value: &V) -> TransportResult<()>;

    /// Whether a returned object may be reused.
    async fn validate(&self, key: &K, value: &V) -> bool;
}

/// Limits and exhaustion behaviour of a [`KeyedPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyedPoolConfig {
    /// Objects borrowed concurrently per key.
    pub max_active: usize,
    /// Idle objects kept per key.
    pub max_idle: usize,
    /// Objects alive across all keys.
    pub max_total: usize,
    /// Behaviour when a key has no free permit.
    pub exhausted_action: PoolExhaustedAction,
    /// Maximum time a blocked borrow waits; `None` waits indefinitely.
    pub max_wait: Option<Duration>,
}

impl KeyedPoolConfig {
    /// Limits derived from the per-key maximum: idle equals active and the
    /// total is twenty times active.
    #[must_use]
    pub const fn for_max_active(max_active: usize) -> Self {
        let max_active = if max_active == 0 { 1 } else { max_active };
        Self {
            max_active,
            max_idle: max_active,
            max_total: max_active.saturating_mul(20),
            exhausted_action: PoolExhaustedAction::Block,
            max_wait: None,
        }
    }

    /// Sets the exhaustion behaviour.
    #[must_use]
    pub const fn with_exhausted_action(
        mut self,
        action: PoolExhaustedAction,
        max_wait: Option<Duration>,
    ) -> Self {
        self.exhausted_action = action;
        self.max_wait = max_wait;
        self
    }
}

impl Default for KeyedPoolConfig {
    fn default() -> Self {
        Self::for_max_active(16)
    }
}

/// Per-key occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStats {
    /// Pool key.
    pub key: String,
    /// Borrowed objects.
    pub num_active: usize,
    /// Idle objects.
    pub num_idle: usize,
}

/// Occupancy of a whole pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Per-key occupancy, sorted by key.
    pub keys: Vec<KeyStats>,
    /// Borrowed objects across all keys.
    pub total_active: usize,
    /// Idle objects across all keys.
    pub total_idle: usize,
}

struct KeyEntry<V> {
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<V>>,
    active: AtomicUsize,
    debt: AtomicUsize,
}

impl<V> KeyEntry<V> {
    fn new(max_active: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_active)),
            idle: Mutex::new(VecDeque::new()),
            active: AtomicUsize::new(0),
            debt: AtomicUsize::new(0),
        }
    }

    fn release_permit(&self, permit: OwnedSemaphorePermit) {
        let paid = self
            .debt
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |debt| {
                debt.checked_sub(1)
            })
            .is_ok();
        if paid {
            permit.forget();
        }
    }
}

struct PoolInner<K, V> {
    name: String,
    config: RwLock<KeyedPoolConfig>,
    factory: Arc<dyn PooledObjectFactory<K, V>>,
    entries: DashMap<K, Arc<KeyEntry<V>>>,
    total: AtomicUsize,
    closed: AtomicBool,
}

/// A bounded pool of reusable objects partitioned by key.
///
/// ```
/// # use std::sync::Arc;
/// # use async_trait::async_trait;
/// # use turbobus_transport::{KeyedPool, KeyedPoolConfig, PooledObjectFactory, TransportResult};
/// struct Sessions;
///
/// #[async_trait]
/// impl PooledObjectFactory<String, u32> for Sessions {
///     async fn make(&self, _key: &String) -> TransportResult<u32> { Ok(7) }
///     async fn destroy(&self, _key: &String, _value: u32) {}
///     async fn activate(&self, _key: &String, _value: &u32) -> TransportResult<()> { Ok(()) }
///     async fn passivate(&self, _key: &String, _value: &u32) -> TransportResult<()> { Ok(()) }
///     async fn validate(&self, _key: &String, _value: &u32) -> bool { true }
/// }
///
/// # tokio_test::block_on(async {
/// let pool = KeyedPool::new("sessions", KeyedPoolConfig::for_max_active(2), Arc::new(Sessions));
/// let session = pool.borrow(&"vm://orders".to_string()).await?;
/// assert_eq!(*session, 7);
/// session.release().await;
/// assert_eq!(pool.stats().total_idle, 1);
/// # Ok::<(), turbobus_transport::TransportError>(())
/// # });
/// ```
pub struct KeyedPool<K, V> {
    inner: Arc<PoolInner<K, V>>,
}

impl<K, V> Clone for KeyedPool<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Eq + Hash, V> fmt::Debug for KeyedPool<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedPool")
            .field("name", &self.inner.name)
            .field("config", &*self.inner.config.read())
            .field("keys", &self.inner.entries.len())
            .field("total", &self.inner.total.load(Ordering::Relaxed))
            .finish()
    }
}

impl<K, V> KeyedPool<K, V>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates an empty pool.
    pub fn new(
        name: impl Into<String>,
        config: KeyedPoolConfig,
        factory: Arc<dyn PooledObjectFactory<K, V>>,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                config: RwLock::new(config),
                factory,
                entries: DashMap::new(),
                total: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current limits.
    pub fn config(&self) -> KeyedPoolConfig {
        *self.inner.config.read()
    }

    /// Per-key borrow limit.
    pub fn max_active(&self) -> usize {
        self.inner.config.read().max_active
    }

    /// Changes the per-key borrow limit; idle and total limits follow it.
    ///
    /// Shrinking takes effect as borrowed objects come back.
    pub fn set_max_active(&self, max_active: usize) {
        let new = KeyedPoolConfig::for_max_active(max_active);
        let old = {
            let mut config = self.inner.config.write();
            let old = config.max_active;
            config.max_active = new.max_active;
            config.max_idle = new.max_idle;
            config.max_total = new.max_total;
            old
        };

        for entry in self.inner.entries.iter() {
            let entry = entry.value();
            if new.max_active > old {
                let mut grow = new.max_active - old;
                while grow > 0 {
                    let repaid = entry
                        .debt
                        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |debt| {
                            debt.checked_sub(1)
                        })
                        .is_ok();
                    if !repaid {
                        break;
                    }
                    grow -= 1;
                }
                entry.permits.add_permits(grow);
            } else if new.max_active < old {
                let shrink = old - new.max_active;
                let forgotten = entry.permits.forget_permits(shrink);
                entry.debt.fetch_add(shrink - forgotten, Ordering::AcqRel);
            }
        }
        debug!(pool = %self.inner.name, old, new = new.max_active, "max active changed");
    }

    /// Stored keys accepted by `predicate`.
    pub fn keys_where(&self, predicate: impl Fn(&K) -> bool) -> Vec<K> {
        self.inner
            .entries
            .iter()
            .filter(|entry| predicate(entry.key()))
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn entry(&self, key: &K) -> Arc<KeyEntry<V>> {
        if let Some(entry) = self.inner.entries.get(key) {
            return Arc::clone(entry.value());
        }
        let max_active = self.max_active();
        Arc::clone(
            self.inner
                .entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(KeyEntry::new(max_active)))
                .value(),
        )
    }

    /// Borrows an object for `key`, blocking or failing at `max_active`.
    pub async fn borrow(&self, key: &K) -> TransportResult<PooledObject<K, V>> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Disposed(self.inner.name.clone()));
        }

        let entry = self.entry(key);
        let permit = self.acquire(key, &entry).await?;

        let idle = entry.idle.lock().pop_back();
        let value = match idle {
            Some(value) => value,
            None => {
                self.reserve_slot(key).await?;
                match self.inner.factory.make(key).await {
                    Ok(value) => value,
                    Err(e) => {
                        self.inner.total.fetch_sub(1, Ordering::AcqRel);
                        return Err(TransportError::PoolValidation {
                            key: key.to_string(),
                            operation: "make".to_string(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        };

        if let Err(e) = self.inner.factory.activate(key, &value).await {
            self.inner.factory.destroy(key, value).await;
            self.inner.total.fetch_sub(1, Ordering::AcqRel);
            return Err(TransportError::PoolValidation {
                key: key.to_string(),
                operation: "activate".to_string(),
                message: e.to_string(),
            });
        }

        entry.active.fetch_add(1, Ordering::AcqRel);
        Ok(PooledObject {
            key: key.clone(),
            value: Some(value),
            permit: Some(permit),
            entry,
            pool: Arc::clone(&self.inner),
        })
    }

    async fn acquire(&self, key: &K, entry: &KeyEntry<V>) -> TransportResult<OwnedSemaphorePermit> {
        let config = self.config();
        let exhausted = || TransportError::PoolExhausted {
            key: key.to_string(),
        };
        let closed = |_| TransportError::Disposed(self.inner.name.clone());

        match config.exhausted_action {
            PoolExhaustedAction::Fail => {
                Arc::clone(&entry.permits)
                    .try_acquire_owned()
                    .map_err(|e| match e {
                        tokio::sync::TryAcquireError::Closed => {
                            TransportError::Disposed(self.inner.name.clone())
                        }
                        tokio::sync::TryAcquireError::NoPermits => exhausted(),
                    })
            }
            PoolExhaustedAction::Block => {
                let acquire = Arc::clone(&entry.permits).acquire_owned();
                match config.max_wait {
                    Some(wait) => tokio::time::timeout(wait, acquire)
                        .await
                        .map_err(|_| exhausted())?
                        .map_err(closed),
                    None => acquire.await.map_err(closed),
                }
            }
        }
    }

    /// Claims one of the `max_total` slots for a new object, evicting idle
    /// objects of other keys while the pool is full.
    ///
    /// The caller owns the slot and must give it back if the object is never
    /// created.
    async fn reserve_slot(&self, key: &K) -> TransportResult<()> {
        let max_total = self.inner.config.read().max_total;
        loop {
            let reserved = self
                .inner
                .total
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |total| {
                    (total < max_total).then_some(total + 1)
                })
                .is_ok();
            if reserved {
                return Ok(());
            }

            let victim = self.inner.entries.iter().find_map(|entry| {
                if entry.key() == key {
                    return None;
                }
                entry
                    .value()
                    .idle
                    .lock()
                    .pop_front()
                    .map(|value| (entry.key().clone(), value))
            });
            let Some((victim_key, value)) = victim else {
                return Err(TransportError::PoolExhausted {
                    key: key.to_string(),
                });
            };
            debug!(pool = %self.inner.name, key = %victim_key, "evicting idle object");
            self.inner.factory.destroy(&victim_key, value).await;
            self.inner.total.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Borrowed objects for `key`.
    pub fn num_active(&self, key: &K) -> usize {
        self.inner
            .entries
            .get(key)
            .map_or(0, |entry| entry.active.load(Ordering::Acquire))
    }

    /// Idle objects for `key`.
    pub fn num_idle(&self, key: &K) -> usize {
        self.inner
            .entries
            .get(key)
            .map_or(0, |entry| entry.idle.lock().len())
    }

    /// Objects alive across all keys.
    pub fn total(&self) -> usize {
        self.inner.total.load(Ordering::Acquire)
    }

    /// Occupancy snapshot.
    pub fn stats(&self) -> PoolStats {
        let mut keys: Vec<KeyStats> = self
            .inner
            .entries
            .iter()
            .map(|entry| KeyStats {
                key: entry.key().to_string(),
                num_active: entry.active.load(Ordering::Acquire),
                num_idle: entry.idle.lock().len(),
            })
            .collect();
        keys.sort_by(|a, b| a.key.cmp(&b.key));
        PoolStats {
            total_active: keys.iter().map(|k| k.num_active).sum(),
            total_idle: keys.iter().map(|k| k.num_idle).sum(),
            keys,
        }
    }

    /// Destroys every idle object.
    pub async fn clear(&self) {
        let drained: Vec<(K, V)> = self
            .inner
            .entries
            .iter()
            .flat_map(|entry| {
                let key = entry.key().clone();
                let idle: Vec<V> = entry.value().idle.lock().drain(..).collect();
                idle.into_iter().map(move |value| (key.clone(), value))
            })
            .collect();

        for (key, value) in drained {
            self.inner.factory.destroy(&key, value).await;
            self.inner.total.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Clears the pool and rejects further borrows; borrowed objects are
    /// destroyed when they come back.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for entry in self.inner.entries.iter() {
            entry.value().permits.close();
        }
        self.clear().await;
        debug!(pool = %self.inner.name, "pool closed");
    }

    /// Whether [`KeyedPool::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// A borrowed object; returns to its pool when released or dropped.
pub struct PooledObject<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    key: K,
    value: Option<V>,
    permit: Option<OwnedSemaphorePermit>,
    entry: Arc<KeyEntry<V>>,
    pool: Arc<PoolInner<K, V>>,
}

impl<K, V> fmt::Debug for PooledObject<K, V>
where
    K: Clone + fmt::Display + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledObject")
            .field("pool", &self.pool.name)
            .field("key", &self.key.to_string())
            .finish()
    }
}

impl<K, V> PooledObject<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// The key the object was borrowed for.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns the object to the pool, validating and passivating it.
    pub async fn release(mut self) {
        if let Some(value) = self.value.take() {
            let permit = self.permit.take();
            give_back(
                Arc::clone(&self.pool),
                Arc::clone(&self.entry),
                self.key.clone(),
                value,
                permit,
            )
            .await;
        }
    }

    /// Destroys the object instead of returning it.
    pub async fn invalidate(mut self) {
        if let Some(value) = self.value.take() {
            self.pool.factory.destroy(&self.key, value).await;
            self.pool.total.fetch_sub(1, Ordering::AcqRel);
            self.entry.active.fetch_sub(1, Ordering::AcqRel);
            if let Some(permit) = self.permit.take() {
                self.entry.release_permit(permit);
            }
        }
    }
}

impl<K, V> Deref for PooledObject<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    type Target = V;

    fn deref(&self) -> &V {
        // The value is only taken by `release`, `invalidate` and `drop`, which consume the guard.
        match &self.value {
            Some(value) => value,
            None => unreachable!("pooled object accessed after release"),
        }
    }
}

impl<K, V> Drop for PooledObject<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn drop(&mut self) {
        let Some(value) = self.value.take() else {
            return;
        };
        let permit = self.permit.take();
        let pool = Arc::clone(&self.pool);
        let entry = Arc::clone(&self.entry);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(give_back(pool, entry, self.key.clone(), value, permit));
            }
            Err(_) => {
                warn!(pool = %pool.name, "no runtime to return pooled object, discarding it");
                drop(value);
                pool.total.fetch_sub(1, Ordering::AcqRel);
                entry.active.fetch_sub(1, Ordering::AcqRel);
                if let Some(permit) = permit {
                    entry.release_permit(permit);
                }
            }
        }
    }
}

/// Validates, passivates and re-idles a returned object, or destroys it.
async fn give_back<K, V>(
    pool: Arc<PoolInner<K, V>>,
    entry: Arc<KeyEntry<V>>,
    key: K,
    value: V,
    permit: Option<OwnedSemaphorePermit>,
) where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let reusable = !pool.closed.load(Ordering::Acquire)
        && pool.factory.validate(&key, &value).await
        && pool.factory.passivate(&key, &value).await.is_ok();

    let rejected = if reusable {
        let max_idle = pool.config.read().max_idle;
        let mut idle = entry.idle.lock();
        if idle.len() < max_idle {
            idle.push_back(value);
            None
        } else {
            Some(value)
        }
    } else {
        Some(value)
    };

    if let Some(value) = rejected {
        pool.factory.destroy(&key, value).await;
        pool.total.fetch_sub(1, Ordering::AcqRel);
    }

    entry.active.fetch_sub(1, Ordering::AcqRel);
    if let Some(permit) = permit {
        entry.release_permit(permit);
    }
}
