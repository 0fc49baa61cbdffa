use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use parking_lot::Mutex;
use strum::Display;
use tokio::sync::{watch, Notify};

use super::{error::QueueError, store::ObjectStore};
use crate::objects::Object;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DeltaKind {
    Added,
    Updated,
    Deleted,
    /// Re-delivery of the cached state, not a remote change.
    Resync,
}

/// One observed transition of one key.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta<T> {
    pub kind: DeltaKind,
    pub key: String,
    pub object: T,
}

impl<T: Object> Delta<T> {
    pub fn new(kind: DeltaKind, object: T) -> Self {
        Self {
            kind,
            key: object.key(),
            object,
        }
    }
}

struct Pending<T> {
    /// Keys in arrival order of their oldest pending delta.
    order: VecDeque<String>,
    deltas: HashMap<String, Delta<T>>,
    /// Delta handed out by `pop` and not yet reported `done`.
    in_flight: Option<Delta<T>>,
    closed: bool,
    /// Whether the first listing has been enqueued.
    populated: bool,
    /// Slots of the first listing not yet processed by the consumer.
    initial_population: usize,
}

impl<T: Object> Pending<T> {
    /// Returns true if the delta took a new slot in the queue.
    fn enqueue(&mut self, delta: Delta<T>) -> bool {
        match self.deltas.get_mut(&delta.key) {
            Some(pending) => {
                // a resync carries cached state and must not shadow a real change
                if delta.kind == DeltaKind::Resync && pending.kind != DeltaKind::Resync {
                    return false;
                }
                *pending = delta;
                false
            },
            None => {
                self.order.push_back(delta.key.to_owned());
                self.deltas.insert(delta.key.to_owned(), delta);
                true
            },
        }
    }

    fn pop_front(&mut self) -> Option<Delta<T>> {
        let key = self.order.pop_front()?;
        self.deltas.remove(&key)
    }
}

/// Ordered, deduplicating queue between the reflector and the dispatcher.
///
/// Each key owns at most one slot; newer deltas for a queued key are folded
/// into that slot, so ordering per key is preserved and the final state of
/// every key survives compression.
pub struct DeltaQueue<T> {
    pending: Mutex<Pending<T>>,
    known_objects: Arc<ObjectStore<T>>,
    capacity: usize,
    item_ready: Notify,
    space_ready: Notify,
    synced: watch::Sender<bool>,
}

impl<T: Object> DeltaQueue<T> {
    pub fn new(known_objects: Arc<ObjectStore<T>>, capacity: usize) -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            pending: Mutex::new(Pending {
                order: VecDeque::new(),
                deltas: HashMap::new(),
                in_flight: None,
                closed: false,
                populated: false,
                initial_population: 0,
            }),
            known_objects,
            capacity: capacity.max(1),
            item_ready: Notify::new(),
            space_ready: Notify::new(),
            synced,
        }
    }

    /// Enqueue a single delta, waiting for room if the queue is full and
    /// the key has no slot yet.
    pub async fn push(&self, delta: Delta<T>) -> Result<(), QueueError> {
        loop {
            let notified = {
                let mut pending = self.pending.lock();
                if pending.closed {
                    return Err(QueueError::Closed);
                }
                if pending.deltas.contains_key(&delta.key) || pending.order.len() < self.capacity {
                    pending.enqueue(delta);
                    drop(pending);
                    self.item_ready.notify_waiters();
                    return Ok(());
                }
                // registered before unlocking so a pop or close cannot be missed
                self.space_ready.notified()
            };
            notified.await;
        }
    }

    /// Enqueue a full listing: `Added` for every item in list order, and
    /// `Deleted` for every known key the listing no longer contains. Known
    /// keys include the delta currently being dispatched.
    pub fn replace(&self, items: Vec<T>) -> Result<(), QueueError> {
        let mut pending = self.pending.lock();
        if pending.closed {
            return Err(QueueError::Closed);
        }

        let listed = items.iter().map(Object::key).collect::<HashSet<_>>();
        for item in items {
            pending.enqueue(Delta::new(DeltaKind::Added, item));
        }

        let mut vanished = Vec::new();
        for object in self.known_objects.list() {
            let key = object.key();
            if listed.contains(&key) {
                continue;
            }
            match pending.deltas.get(&key) {
                Some(delta) if delta.kind == DeltaKind::Deleted => {},
                Some(delta) => vanished.push(delta.object.clone()),
                None => vanished.push(object),
            }
        }
        for (key, delta) in pending.deltas.iter() {
            if !listed.contains(key)
                && delta.kind != DeltaKind::Deleted
                && !self.known_objects.contains_key(key)
            {
                vanished.push(delta.object.clone());
            }
        }
        // popped but not applied yet, the store would keep it after the apply
        if let Some(delta) = &pending.in_flight {
            if !listed.contains(&delta.key)
                && delta.kind != DeltaKind::Deleted
                && !pending.deltas.contains_key(&delta.key)
            {
                vanished.push(delta.object.clone());
            }
        }
        for object in vanished {
            tracing::debug!("Object {} vanished from listing", object.key());
            pending.enqueue(Delta::new(DeltaKind::Deleted, object));
        }

        if !pending.populated {
            pending.populated = true;
            pending.initial_population = pending.order.len();
            if pending.initial_population == 0 {
                self.synced.send_replace(true);
            }
        }
        drop(pending);
        self.item_ready.notify_waiters();
        Ok(())
    }

    /// Enqueue a `Resync` for every cached object without a pending change.
    pub fn resync(&self) -> Result<(), QueueError> {
        let mut pending = self.pending.lock();
        if pending.closed {
            return Err(QueueError::Closed);
        }
        for object in self.known_objects.list() {
            pending.enqueue(Delta::new(DeltaKind::Resync, object));
        }
        drop(pending);
        self.item_ready.notify_waiters();
        Ok(())
    }

    /// Wait for the next delta. Returns `None` once the queue is closed and
    /// every remaining delta has been handed out.
    pub async fn pop(&self) -> Option<Delta<T>> {
        loop {
            let notified = {
                let mut pending = self.pending.lock();
                if let Some(delta) = pending.pop_front() {
                    pending.in_flight = Some(delta.clone());
                    drop(pending);
                    self.space_ready.notify_waiters();
                    return Some(delta);
                }
                if pending.closed {
                    return None;
                }
                self.item_ready.notified()
            };
            notified.await;
        }
    }

    /// Report that the last popped delta has been fully processed.
    pub fn done(&self) {
        let mut pending = self.pending.lock();
        pending.in_flight = None;
        if pending.populated && pending.initial_population > 0 {
            pending.initial_population -= 1;
            if pending.initial_population == 0 {
                self.synced.send_replace(true);
            }
        }
    }

    /// True once every delta of the first listing has been processed.
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    pub fn subscribe_synced(&self) -> watch::Receiver<bool> {
        self.synced.subscribe()
    }

    pub fn close(&self) {
        self.pending.lock().closed = true;
        self.item_ready.notify_waiters();
        self.space_ready.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.pending.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
