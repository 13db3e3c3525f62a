// BeatRegistry: ordered beat listeners and frame-aligned visual dispatch
//
// The scheduler enqueues a BeatEvent for every beat it hands to the audio
// backend. The visual side (frame pump or host frame callback) pops events
// whose audio-clock time has arrived and dispatches them to listeners in
// registration order, plus an async broadcast for stream consumers.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A beat as seen by listeners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    /// Zero-based beat index since the transport started
    pub index: u64,
    /// Audio-clock time the beat sounds at, in seconds
    pub audio_time: f64,
    /// Tempo in effect at the beat
    pub tempo_bpm: f64,
}

pub type BeatCallback = Arc<dyn Fn(&BeatEvent) + Send + Sync>;

struct Listener {
    id: u64,
    callback: BeatCallback,
}

/// Result of dispatching one beat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub invoked: usize,
    pub panicked: usize,
}

/// Beats popped by one `take_due` call, tagged with the clear count seen
/// at the time so a later `clear_pending` can revoke them.
#[derive(Debug, Default)]
pub struct DueBeats {
    pub events: Vec<BeatEvent>,
    clears: u64,
}

pub struct BeatRegistry {
    listeners: Mutex<Vec<Listener>>,
    pending: Mutex<VecDeque<BeatEvent>>,
    /// Incremented under the pending lock by every `clear_pending`
    clears: AtomicU64,
    next_id: AtomicU64,
    closed: AtomicBool,
    tx: broadcast::Sender<BeatEvent>,
}

fn lock_recovering<'a, T>(mutex: &'a Mutex<T>, component: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::warn!("[BeatRegistry] Recovering poisoned {} lock", component);
        poisoned.into_inner()
    })
}

impl BeatRegistry {
    pub fn new(broadcast_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(broadcast_capacity.max(1));
        Self {
            listeners: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            clears: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            tx,
        }
    }

    /// Append a listener. Once the registry is closed the returned
    /// subscription is inert and the callback is never invoked.
    pub fn register(self: &Arc<Self>, callback: BeatCallback) -> BeatSubscription {
        if self.is_closed() {
            return BeatSubscription::inert();
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock_recovering(&self.listeners, "listeners").push(Listener { id, callback });
        BeatSubscription {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Remove the listener registered under `id`. Returns false if it was
    /// already gone.
    pub fn unregister(&self, id: u64) -> bool {
        let mut listeners = lock_recovering(&self.listeners, "listeners");
        match listeners.iter().position(|listener| listener.id == id) {
            Some(pos) => {
                listeners.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn listener_count(&self) -> usize {
        lock_recovering(&self.listeners, "listeners").len()
    }

    /// Queue a beat for visual dispatch.
    pub fn enqueue(&self, event: BeatEvent) {
        if self.is_closed() {
            return;
        }
        lock_recovering(&self.pending, "pending").push_back(event);
    }

    /// Pop every queued beat whose audio time is at or before `cutoff`.
    pub fn take_due(&self, cutoff: f64) -> DueBeats {
        let mut pending = lock_recovering(&self.pending, "pending");
        let mut events = Vec::new();
        while pending.front().is_some_and(|event| event.audio_time <= cutoff) {
            if let Some(event) = pending.pop_front() {
                events.push(event);
            }
        }
        DueBeats {
            events,
            clears: self.clears.load(Ordering::Acquire),
        }
    }

    /// True once `clear_pending` has run since `due` was taken.
    pub fn is_revoked(&self, due: &DueBeats) -> bool {
        self.clears.load(Ordering::Acquire) != due.clears
    }

    pub fn pending_len(&self) -> usize {
        lock_recovering(&self.pending, "pending").len()
    }

    /// Drop queued beats that have not been dispatched yet.
    pub fn clear_pending(&self) -> usize {
        let mut pending = lock_recovering(&self.pending, "pending");
        let dropped = pending.len();
        pending.clear();
        self.clears.fetch_add(1, Ordering::AcqRel);
        dropped
    }

    /// Invoke every listener registered right now, in registration order.
    ///
    /// The listener list is snapshotted first so callbacks may register,
    /// unregister or call back into the engine. A panicking callback is
    /// contained and later callbacks still run.
    pub fn dispatch(&self, event: &BeatEvent) -> DispatchOutcome {
        if self.is_closed() {
            return DispatchOutcome::default();
        }

        let snapshot: Vec<BeatCallback> = lock_recovering(&self.listeners, "listeners")
            .iter()
            .map(|listener| Arc::clone(&listener.callback))
            .collect();

        let mut outcome = DispatchOutcome::default();
        for callback in snapshot {
            outcome.invoked += 1;
            if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                outcome.panicked += 1;
                log::warn!("[BeatRegistry] Beat listener panicked on beat {}", event.index);
            }
        }

        // No receivers is not an error
        let _ = self.tx.send(*event);

        tracing::debug!(
            index = event.index,
            audio_time = event.audio_time,
            listeners = outcome.invoked,
            "beat dispatched"
        );
        outcome
    }

    /// Subscribe to dispatched beats as an async broadcast.
    pub fn subscribe(&self) -> broadcast::Receiver<BeatEvent> {
        self.tx.subscribe()
    }

    /// Drop every listener and queued beat; later registrations are inert.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        lock_recovering(&self.listeners, "listeners").clear();
        lock_recovering(&self.pending, "pending").clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Handle returned by `on_beat`; `unregister()` removes exactly this
/// registration. Dropping the handle leaves the listener registered.
#[must_use = "keep the subscription to unregister the listener later"]
#[derive(Debug, Clone)]
pub struct BeatSubscription {
    id: u64,
    registry: Weak<BeatRegistry>,
}

impl BeatSubscription {
    fn inert() -> Self {
        Self {
            id: 0,
            registry: Weak::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the listener. Safe to call any number of times; returns true
    /// only for the call that actually removed it.
    pub fn unregister(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.unregister(self.id),
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let listeners = lock_recovering(&registry.listeners, "listeners");
        listeners.iter().any(|listener| listener.id == self.id)
    }
}
