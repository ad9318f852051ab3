//! Folds the metadata channel's merge patches into a [`FileInfoState`] and
//! fans consistent states out to subscribers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tracing::{debug, warn};

use crate::files::FileInfo;

use super::patch::merge_patch;
use super::snapshot::{FileInfoState, FsInfoError};

type Callback = dyn Fn(&FileInfoState) + Send + Sync;

struct Subscriber {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Arc<Callback>,
}

struct Inner {
    /// Accumulated raw message state, without the `partial` marker.
    raw: Value,
    state: Arc<FileInfoState>,
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Accumulates merge patches and publishes one state per complete message.
///
/// Patches are applied strictly in the order [`apply`](Self::apply) is
/// called. Subscriber callbacks run outside the internal lock, so a callback
/// may read the state, attach further effects, or detach itself.
#[derive(Clone)]
pub struct SnapshotReducer {
    inner: Arc<Mutex<Inner>>,
}

impl Default for SnapshotReducer {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotReducer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                raw: Value::Null,
                state: Arc::new(FileInfoState::default()),
                subscribers: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// The most recently published state.
    pub fn state(&self) -> Arc<FileInfoState> {
        Arc::clone(&lock(&self.inner).state)
    }

    /// Attach a subscriber. It is called immediately with the current state
    /// and then once per consistent update until the returned handle is
    /// detached or dropped.
    pub fn effect<F>(&self, callback: F) -> EffectHandle
    where
        F: Fn(&FileInfoState) + Send + Sync + 'static,
    {
        let callback: Arc<Callback> = Arc::new(callback);
        let active = Arc::new(AtomicBool::new(true));

        let (id, current) = {
            let mut inner = lock(&self.inner);
            let id = inner.next_id;
            inner.next_id += 1;
            inner.subscribers.push(Subscriber {
                id,
                active: Arc::clone(&active),
                callback: Arc::clone(&callback),
            });
            (id, Arc::clone(&inner.state))
        };

        callback(&current);

        EffectHandle {
            id,
            active,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).subscribers.len()
    }

    /// Merge one channel message.
    ///
    /// A message carrying a truthy `partial` field is merged but not
    /// published. Returns `true` when subscribers were notified.
    pub fn apply(&self, message: &Value) -> bool {
        let partial = message
            .get("partial")
            .map(|flag| !flag.is_null() && flag != &Value::Bool(false))
            .unwrap_or(false);

        let (state, subscribers) = {
            let mut inner = lock(&self.inner);
            merge_patch(&mut inner.raw, message);
            if let Value::Object(map) = &mut inner.raw {
                map.remove("partial");
            }
            if partial {
                return false;
            }

            let state = Arc::new(decode_state(&inner.raw));
            inner.state = Arc::clone(&state);
            let subscribers: Vec<(Arc<AtomicBool>, Arc<Callback>)> = inner
                .subscribers
                .iter()
                .map(|s| (Arc::clone(&s.active), Arc::clone(&s.callback)))
                .collect();
            (state, subscribers)
        };

        for (active, callback) in subscribers {
            if active.load(Ordering::Acquire) {
                callback(&state);
            }
        }
        true
    }

    /// Detach every subscriber.
    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        for subscriber in inner.subscribers.drain(..) {
            subscriber.active.store(false, Ordering::Release);
        }
    }
}

fn decode_state(raw: &Value) -> FileInfoState {
    let info = match raw.get("info") {
        Some(value @ Value::Object(_)) => match serde_json::from_value::<FileInfo>(value.clone()) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!("Discarding malformed directory info: {e}");
                None
            }
        },
        _ => None,
    };

    let error = match raw.get("error") {
        Some(value @ Value::Object(_)) => {
            let error = serde_json::from_value::<FsInfoError>(value.clone()).unwrap_or_else(|e| {
                debug!("Unrecognised directory error payload: {e}");
                FsInfoError::default()
            });
            Some(error)
        }
        _ => None,
    };

    FileInfoState {
        info,
        error,
        loading: false,
    }
}

/// Detaches its subscriber when dropped.
pub struct EffectHandle {
    id: u64,
    active: Arc<AtomicBool>,
    inner: Weak<Mutex<Inner>>,
}

impl EffectHandle {
    /// Stop notifications. A notification already in flight on another
    /// task may still complete, but no new one starts after this returns.
    pub fn detach(&self) {
        self.active.store(false, Ordering::Release);
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner).subscribers.retain(|s| s.id != self.id);
        }
    }
}

impl Drop for EffectHandle {
    fn drop(&mut self) {
        self.detach();
    }
}
