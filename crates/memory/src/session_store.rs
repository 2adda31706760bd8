//! Concurrency-safe conversation store with TTL eviction.
//!
//! Two levels of locking:
//! - the outer map lock is held only to find or insert a slot, never while a
//!   session is being read or mutated;
//! - each session has its own mutex, so requests on the same session
//!   serialize their mutations while unrelated sessions never contend.
//!
//! No lock is ever held across an await point. Retrieval and generation I/O
//! happen between `begin_turn` and `append_exchange`, outside any lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use ragdesk_core::event::{DomainEvent, EventBus};
use ragdesk_core::message::Turn;
use ragdesk_core::session::{Session, SessionContext, SessionKey};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A session plus a tombstone flag set by the sweeper just before removal.
///
/// A request that looked up the slot before the sweep removed it sees the
/// flag once it gets the lock and retries against a fresh slot, so its
/// update is never written into an orphaned session.
struct Slot {
    session: Session,
    evicted: bool,
}

type SlotRef = Arc<Mutex<Slot>>;

pub struct SessionStore {
    sessions: RwLock<HashMap<SessionKey, SlotRef>>,
    ttl: Duration,
    max_turns: usize,
}

fn lock(slot: &SlotRef) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionStore {
    pub fn new(ttl: StdDuration, max_turns: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::days(36_500)),
            max_turns: max_turns.max(1),
        }
    }

    /// Build from the `[session]` section values.
    pub fn with_limits(ttl_secs: u64, max_turns: usize) -> Self {
        Self::new(StdDuration::from_secs(ttl_secs), max_turns)
    }

    fn slot(&self, key: &SessionKey) -> SlotRef {
        if let Some(slot) = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Arc::clone(slot);
        }

        let mut map = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(key.clone()).or_insert_with(|| {
            debug!(session = %key, "Creating session");
            Arc::new(Mutex::new(Slot {
                session: Session::new(Utc::now()),
                evicted: false,
            }))
        }))
    }

    /// Run `f` on the live session for `key` under its lock, creating it if absent.
    fn with_session<R>(&self, key: &SessionKey, f: impl FnOnce(&mut Session) -> R) -> R {
        loop {
            let slot = self.slot(key);
            let mut guard = lock(&slot);
            if guard.evicted {
                continue;
            }
            guard.session.touch(Utc::now());
            return f(&mut guard.session);
        }
    }

    /// Snapshot of the session, created empty if absent.
    pub fn get(&self, key: &SessionKey) -> Session {
        self.with_session(key, |s| s.clone())
    }

    pub fn append(&self, key: &SessionKey, turn: Turn) {
        let max_turns = self.max_turns;
        self.with_session(key, |s| s.push_turn(turn, max_turns));
    }

    /// Append a user/assistant pair as one atomic mutation.
    pub fn append_exchange(&self, key: &SessionKey, user: Turn, assistant: Turn) {
        let max_turns = self.max_turns;
        self.with_session(key, |s| {
            s.push_turn(user, max_turns);
            s.push_turn(assistant, max_turns);
        });
    }

    /// Attach an image description to the next turn only.
    pub fn set_image_context(&self, key: &SessionKey, text: impl Into<String>) {
        let text = text.into();
        self.with_session(key, |s| s.image_context = Some(text));
    }

    /// Start a turn: the last `history` turns plus the pending image context,
    /// which is cleared by this read.
    pub fn begin_turn(&self, key: &SessionKey, history: usize) -> SessionContext {
        self.with_session(key, |s| SessionContext {
            recent_turns: s.recent_turns(history),
            image_context: s.image_context.take(),
        })
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove sessions idle longer than the TTL as of `now`. Returns the count removed.
    ///
    /// Sessions whose lock is currently held are in use and skipped.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        // Phase 1: find candidates under the shared lock
        let candidates: Vec<SessionKey> = {
            let map = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            map.iter()
                .filter(|(_, slot)| {
                    slot.try_lock()
                        .map(|g| g.session.is_expired(now, self.ttl))
                        .unwrap_or(false)
                })
                .map(|(k, _)| k.clone())
                .collect()
        };
        if candidates.is_empty() {
            return 0;
        }

        // Phase 2: re-check and remove under a short exclusive lock
        let mut map = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        for key in candidates {
            let Some(slot) = map.get(&key).cloned() else {
                continue;
            };
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            if guard.session.is_expired(now, self.ttl) {
                guard.evicted = true;
                drop(guard);
                map.remove(&key);
                removed += 1;
            }
        }
        removed
    }

    /// Sweep on a fixed interval until the returned handle is aborted.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: StdDuration,
        events: Option<Arc<EventBus>>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = store.sweep(Utc::now());
                if removed > 0 {
                    info!(removed, remaining = store.len(), "Evicted idle sessions");
                    if let Some(bus) = &events {
                        bus.publish(DomainEvent::SessionsEvicted {
                            count: removed,
                            timestamp: Utc::now(),
                        });
                    }
                }
            }
        })
    }
}
