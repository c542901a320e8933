use super::error::SessionError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Consumed and expired tombstones outlive their session by this many TTLs.
const TOMBSTONE_RETENTION_TTLS: u32 = 10;

/// Holds analyzed uploads between preview and confirm. A session expires a
/// fixed TTL after it was created, however often it is read.
pub trait SessionStore<T>: Send + Sync {
    fn create(&self, analysis: T) -> String;
    fn get(&self, token: &str) -> Result<Arc<T>, SessionError>;
    /// One-shot take; every later call for the token fails.
    fn consume(&self, token: &str) -> Result<Arc<T>, SessionError>;
    /// Read access that also works after `consume`, until the TTL lapses.
    fn snapshot(&self, token: &str) -> Result<Arc<T>, SessionError>;
    fn purge_expired(&self) -> usize;
}

enum Slot<T> {
    Live(Arc<T>),
    /// The analysis is kept for read-only exports until the TTL lapses.
    Consumed(Option<Arc<T>>),
    Expired,
}

struct Entry<T> {
    slot: Slot<T>,
    /// Expiry counts from here; reads do not extend a session.
    created: Instant,
}

type Clock = Box<dyn Fn() -> Instant + Send + Sync>;

pub struct InMemorySessionStore<T> {
    entries: Mutex<HashMap<String, Arc<Mutex<Entry<T>>>>>,
    ttl_ms: AtomicU64,
    clock: Clock,
}

fn lock<U>(m: &Mutex<U>) -> MutexGuard<'_, U> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T> InMemorySessionStore<T> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Box::new(Instant::now))
    }

    pub fn with_clock(ttl: Duration, clock: Clock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl_ms: AtomicU64::new(ttl.as_millis() as u64),
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms.load(Ordering::Relaxed))
    }

    pub fn set_ttl(&self, ttl: Duration) {
        self.ttl_ms.store(ttl.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Forgets every session, tombstones included. Returns how many were held.
    pub fn clear(&self) -> usize {
        let mut entries = lock(&self.entries);
        let n = entries.len();
        entries.clear();
        n
    }

    fn entry(&self, token: &str) -> Result<Arc<Mutex<Entry<T>>>, SessionError> {
        lock(&self.entries)
            .get(token)
            .cloned()
            .ok_or(SessionError::NotFound)
    }

    /// Returns true when a live session just expired.
    fn expire_if_stale(&self, entry: &mut Entry<T>, now: Instant) -> bool {
        if now.duration_since(entry.created) <= self.ttl() {
            return false;
        }
        match entry.slot {
            Slot::Live(_) => {
                entry.slot = Slot::Expired;
                true
            }
            Slot::Consumed(Some(_)) => {
                entry.slot = Slot::Consumed(None);
                false
            }
            _ => false,
        }
    }
}

impl<T: Send + Sync> SessionStore<T> for InMemorySessionStore<T> {
    fn create(&self, analysis: T) -> String {
        self.purge_expired();
        let token = Uuid::new_v4().simple().to_string();
        let entry = Entry {
            slot: Slot::Live(Arc::new(analysis)),
            created: (self.clock)(),
        };
        lock(&self.entries).insert(token.clone(), Arc::new(Mutex::new(entry)));
        token
    }

    fn get(&self, token: &str) -> Result<Arc<T>, SessionError> {
        let handle = self.entry(token)?;
        let mut entry = lock(&*handle);
        self.expire_if_stale(&mut entry, (self.clock)());
        let out = match &entry.slot {
            Slot::Live(analysis) => Ok(analysis.clone()),
            Slot::Consumed(_) => Err(SessionError::AlreadyConsumed),
            Slot::Expired => Err(SessionError::Expired),
        };
        out
    }

    fn consume(&self, token: &str) -> Result<Arc<T>, SessionError> {
        let handle = self.entry(token)?;
        // Check-and-set under the entry lock only.
        let mut entry = lock(&*handle);
        self.expire_if_stale(&mut entry, (self.clock)());
        let out = match &entry.slot {
            Slot::Live(analysis) => Ok(analysis.clone()),
            Slot::Consumed(_) => Err(SessionError::AlreadyConsumed),
            Slot::Expired => Err(SessionError::Expired),
        };
        if let Ok(analysis) = &out {
            entry.slot = Slot::Consumed(Some(analysis.clone()));
        }
        out
    }

    fn snapshot(&self, token: &str) -> Result<Arc<T>, SessionError> {
        let handle = self.entry(token)?;
        let mut entry = lock(&*handle);
        self.expire_if_stale(&mut entry, (self.clock)());
        let out = match &entry.slot {
            Slot::Live(analysis) | Slot::Consumed(Some(analysis)) => Ok(analysis.clone()),
            Slot::Consumed(None) | Slot::Expired => Err(SessionError::Expired),
        };
        out
    }

    fn purge_expired(&self) -> usize {
        let now = (self.clock)();
        let retention = self.ttl() * TOMBSTONE_RETENTION_TTLS;
        let mut purged = 0;
        let mut entries = lock(&self.entries);
        entries.retain(|_, handle| {
            let mut entry = lock(&**handle);
            if self.expire_if_stale(&mut entry, now) {
                purged += 1;
            }
            now.duration_since(entry.created) <= retention
        });
        purged
    }
}
