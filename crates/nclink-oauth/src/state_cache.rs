//! Time-bounded cache of pending authorizations.
//!
//! Every flow starts with [`StateCache::begin`], which mints a grant
//! identifier (the cookie value) and a CSRF state (sent to the authorization
//! server), and ends with exactly one of:
//!
//! - a [`StateCache::consume`] that removes the entry, or
//! - the eviction timer firing after the TTL.
//!
//! Both paths remove the entry under the same lock, so an entry is acted on
//! at most once. `consume` also checks the deadline itself, so an entry whose
//! TTL has elapsed is never returned even if its timer has not run yet.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::security::{constant_time_eq, fingerprint, random_token};

type Entries<H> = HashMap<String, Entry<H>>;

struct Entry<H> {
    state: String,
    deadline: Instant,
    expires_at: DateTime<Utc>,
    handler: H,
    timer: JoinHandle<()>,
}

/// Values handed out when a flow begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// Opaque key placed in the grant cookie.
    pub grant_id: String,
    /// CSRF state placed in the authorization URL.
    pub state: String,
    /// When the pending authorization is evicted.
    pub expires_at: DateTime<Utc>,
}

/// A pending authorization removed from the cache by [`StateCache::consume`].
#[derive(Debug)]
pub struct PendingAuthorization<H> {
    state: String,
    state_matched: bool,
    expires_at: DateTime<Utc>,
    handler: H,
}

impl<H> PendingAuthorization<H> {
    /// The CSRF state issued with this authorization.
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Whether the state presented to `consume` equals the issued one.
    ///
    /// A missing presented state never matches.
    pub fn state_matched(&self) -> bool {
        self.state_matched
    }

    /// Compares `presented` with the issued state in constant time.
    pub fn state_matches(&self, presented: &str) -> bool {
        constant_time_eq(self.state.as_bytes(), presented.as_bytes())
    }

    /// The completion handler stored at `begin`.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// When the authorization would have been evicted.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Consumes the record, returning its completion handler.
    pub fn into_handler(self) -> H {
        self.handler
    }
}

/// In-memory map from grant identifier to pending authorization.
///
/// `H` is the completion handler carried by each entry. The cache is an
/// explicit instance: create it at service start, call
/// [`shutdown`](Self::shutdown) at service stop. Must be used from within a
/// tokio runtime, which runs the eviction timers.
pub struct StateCache<H> {
    ttl: Duration,
    entries: Arc<Mutex<Entries<H>>>,
}

impl<H: Send + 'static> StateCache<H> {
    /// Creates an empty cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Lifetime of each pending authorization.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stores a new pending authorization for `handler`.
    pub fn begin(&self, handler: H) -> Grant {
        let grant_id = random_token();
        let state = random_token();
        let deadline = Instant::now() + self.ttl;
        let expires_at = chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        // The timer is spawned while the lock is held so it cannot observe the
        // map before the entry is inserted.
        let mut entries = lock(&self.entries);
        let timer = spawn_eviction(Arc::downgrade(&self.entries), grant_id.clone(), deadline);
        entries.insert(
            grant_id.clone(),
            Entry {
                state: state.clone(),
                deadline,
                expires_at,
                handler,
                timer,
            },
        );
        let pending = entries.len();
        drop(entries);

        info!(
            grant = %fingerprint(&grant_id),
            ttl_secs = self.ttl.as_secs(),
            pending,
            "issued grant"
        );

        Grant {
            grant_id,
            state,
            expires_at,
        }
    }

    /// Removes and returns the pending authorization for `grant_id`.
    ///
    /// Returns `None` for identifiers that were never issued, were already
    /// consumed, or whose TTL has elapsed. The entry is returned whether or
    /// not `presented_state` matches; the caller decides what a mismatch
    /// means.
    pub fn consume(
        &self,
        grant_id: &str,
        presented_state: Option<&str>,
    ) -> Option<PendingAuthorization<H>> {
        let entry = lock(&self.entries).remove(grant_id);
        let grant = fingerprint(grant_id);

        let Some(entry) = entry else {
            debug!(grant = %grant, "grant not found");
            return None;
        };
        entry.timer.abort();

        if entry.deadline <= Instant::now() {
            debug!(grant = %grant, "grant expired before its eviction ran");
            return None;
        }

        let state_matched = presented_state
            .is_some_and(|s| constant_time_eq(entry.state.as_bytes(), s.as_bytes()));
        debug!(grant = %grant, state_matched, "consumed grant");

        Some(PendingAuthorization {
            state: entry.state,
            state_matched,
            expires_at: entry.expires_at,
            handler: entry.handler,
        })
    }

    /// Number of pending authorizations.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Returns true if no authorization is pending.
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Drops every pending authorization and stops its timer.
    pub fn shutdown(&self) {
        let drained: Vec<Entry<H>> = lock(&self.entries).drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.timer.abort();
        }
        info!(dropped = drained.len(), "state cache shut down");
    }
}

impl<H> std::fmt::Debug for StateCache<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCache")
            .field("ttl", &self.ttl)
            .field("pending", &lock(&self.entries).len())
            .finish()
    }
}

fn lock<H>(entries: &Mutex<Entries<H>>) -> MutexGuard<'_, Entries<H>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

fn spawn_eviction<H: Send + 'static>(
    entries: Weak<Mutex<Entries<H>>>,
    grant_id: String,
    deadline: Instant,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        let Some(entries) = entries.upgrade() else {
            return;
        };
        if lock(&entries).remove(&grant_id).is_some() {
            debug!(grant = %fingerprint(&grant_id), "evicted expired grant");
        }
    })
}
