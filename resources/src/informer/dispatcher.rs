use std::{panic::AssertUnwindSafe, sync::Arc};

use anyhow::anyhow;
use futures_util::FutureExt;

use super::{Delta, DeltaKind, DeltaQueue, EventHandler, HandlerError, ObjectStore};
use crate::objects::Object;

pub(super) struct Dispatcher<T: Object> {
    pub(super) queue: Arc<DeltaQueue<T>>,
    pub(super) store: Arc<ObjectStore<T>>,
    pub(super) handlers: Arc<Vec<EventHandler<T>>>,
}

#[derive(Debug)]
enum Notification<T> {
    Add(T),
    /// old value, new value
    Update(T, T),
    Delete(T),
}

impl<T: Object> Dispatcher<T> {
    /// Drain the queue until it is closed and empty.
    pub(super) async fn run(self) {
        tracing::info!("Dispatcher started");
        while let Some(delta) = self.queue.pop().await {
            let initial = !self.queue.has_synced();
            self.dispatch(delta).await;
            self.queue.done();
            if initial && self.queue.has_synced() {
                tracing::info!("Initial sync completed, {} objects cached", self.store.len());
            }
        }
        tracing::info!("Dispatcher exited");
    }

    async fn dispatch(&self, mut delta: Delta<T>) {
        let old = self.store.get(&delta.key);
        let notification = match (delta.kind, old) {
            (DeltaKind::Resync, None) => {
                tracing::debug!("Skip resync of {}, no longer cached", delta.key);
                return;
            },
            (DeltaKind::Resync, Some(old)) => {
                // the queued snapshot may predate a change applied since
                delta.object = old.clone();
                Notification::Update(old, delta.object.clone())
            },
            (DeltaKind::Deleted, None) => {
                tracing::debug!("Object {} is already deleted", delta.key);
                return;
            },
            (DeltaKind::Deleted, Some(_)) => Notification::Delete(delta.object.clone()),
            (DeltaKind::Added | DeltaKind::Updated, Some(old)) => {
                if old == delta.object {
                    tracing::debug!("Object {} is already up to date", delta.key);
                    return;
                }
                Notification::Update(old, delta.object.clone())
            },
            (DeltaKind::Added | DeltaKind::Updated, None) => Notification::Add(delta.object.clone()),
        };

        self.store.apply(&delta);
        self.notify(delta.kind, &delta.key, notification).await;
    }

    async fn notify(&self, kind: DeltaKind, key: &str, notification: Notification<T>) {
        for eh in self.handlers.iter() {
            let fut = match &notification {
                Notification::Add(new) => (eh.add_cls)(new.clone()),
                Notification::Update(old, new) => (eh.update_cls)((old.clone(), new.clone())),
                Notification::Delete(old) => (eh.delete_cls)(old.clone()),
            };
            let result = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(anyhow!("handler panicked")),
            };
            if let Err(cause) = result {
                let e = HandlerError {
                    kind,
                    key: key.to_owned(),
                    cause,
                };
                tracing::error!("{}", e);
            }
        }
    }
}
