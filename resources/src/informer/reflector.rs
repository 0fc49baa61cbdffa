use std::{future::Future, sync::Arc, time::Duration};

use futures_util::stream::StreamExt;
use tokio_util::sync::CancellationToken;

use super::{
    backoff::Backoff, Delta, DeltaKind, DeltaQueue, ListOptions, ListWatcher, WatchError,
    WatchStream,
};
use crate::{config::BackoffConfig, models::watch::WatchEvent, objects::Object};

pub(super) struct Reflector<T: Object> {
    pub(super) lw: Arc<dyn ListWatcher<T>>,
    pub(super) queue: Arc<DeltaQueue<T>>,
    pub(super) options: ListOptions,
    pub(super) backoff: BackoffConfig,
    pub(super) stop: CancellationToken,
}

/// Connection state of one watch, recreated on every reconnect.
#[derive(Debug)]
struct WatchSession {
    cursor: String,
    connected: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum WatchOutcome {
    /// Stop requested or queue closed.
    Stopped,
    /// The cursor is no longer valid, a relist is required.
    Expired,
    /// Stream ended or failed, resume from the last cursor.
    Disconnected,
}

impl<T: Object> Reflector<T> {
    pub(super) async fn run(self) {
        tracing::info!("Reflector started");
        let mut backoff = Backoff::new(self.backoff.clone());
        let mut cursor: Option<String> = None;

        loop {
            let resource_version = match cursor.take() {
                Some(resource_version) => resource_version,
                None => match self.cancellable(self.lw.list(&self.options)).await {
                    None => break,
                    Some(Ok(list)) => {
                        tracing::info!(
                            "List succeeded, {} objects at version {}",
                            list.items.len(),
                            list.resource_version
                        );
                        if self.queue.replace(list.items).is_err() {
                            break;
                        }
                        list.resource_version
                    },
                    Some(Err(e)) => {
                        tracing::warn!("List failed, caused by: {}", e);
                        if !self.sleep(backoff.next_delay()).await {
                            break;
                        }
                        continue;
                    },
                },
            };

            let mut session = WatchSession {
                cursor: resource_version,
                connected: false,
            };
            match self.watch(&mut session, &mut backoff).await {
                WatchOutcome::Stopped => break,
                WatchOutcome::Expired => {
                    tracing::warn!("Resource version {} expired, relisting", session.cursor);
                },
                WatchOutcome::Disconnected if session.connected => {
                    tracing::warn!("Restarting watcher from version {}", session.cursor);
                    cursor = Some(session.cursor);
                },
                WatchOutcome::Disconnected => {
                    tracing::warn!("Retrying watch from version {}", session.cursor);
                    cursor = Some(session.cursor);
                },
            }
            if !self.sleep(backoff.next_delay()).await {
                break;
            }
        }
        tracing::info!("Reflector exited");
    }

    async fn watch(&self, session: &mut WatchSession, backoff: &mut Backoff) -> WatchOutcome {
        let mut stream: WatchStream<T> =
            match self.cancellable(self.lw.watch(&self.options, &session.cursor)).await {
                None => return WatchOutcome::Stopped,
                Some(Ok(stream)) => stream,
                Some(Err(e)) if e.is_expired() => return WatchOutcome::Expired,
                Some(Err(e)) => {
                    tracing::warn!("Watcher failed, caused by: {}", e);
                    return WatchOutcome::Disconnected;
                },
            };
        session.connected = true;
        tracing::info!("Watcher connected at version {}, receiving events...", session.cursor);

        loop {
            let event = match self.cancellable(stream.next()).await {
                None => break WatchOutcome::Stopped,
                Some(None) => {
                    tracing::warn!("Api-server watch disconnect");
                    break WatchOutcome::Disconnected;
                },
                Some(Some(Ok(event))) => event,
                Some(Some(Err(WatchError::Decode(e)))) => {
                    tracing::warn!("Skipping malformed watch event: {}", e);
                    continue;
                },
                Some(Some(Err(e))) if e.is_expired() => break WatchOutcome::Expired,
                Some(Some(Err(e))) => {
                    tracing::warn!("Watcher ended unexpectedly, caused by: {}", e);
                    break WatchOutcome::Disconnected;
                },
            };
            backoff.reset();

            let resource_version = event
                .resource_version()
                .filter(|rv| !rv.is_empty())
                .map(str::to_owned);
            let delta = match event {
                WatchEvent::Added { object } => Delta::new(DeltaKind::Added, object),
                WatchEvent::Modified { object } => Delta::new(DeltaKind::Updated, object),
                WatchEvent::Deleted { object } => Delta::new(DeltaKind::Deleted, object),
                WatchEvent::Bookmark { .. } => {
                    if let Some(resource_version) = resource_version {
                        session.cursor = resource_version;
                    }
                    continue;
                },
                WatchEvent::Error { status } => {
                    let e = WatchError::from(status);
                    if e.is_expired() {
                        break WatchOutcome::Expired;
                    }
                    tracing::warn!("Watcher received error event: {}", e);
                    break WatchOutcome::Disconnected;
                },
            };
            tracing::debug!("Observed {} {}", delta.kind, delta.key);

            match self.cancellable(self.queue.push(delta)).await {
                Some(Ok(())) => {},
                None | Some(Err(_)) => break WatchOutcome::Stopped,
            }
            if let Some(resource_version) = resource_version {
                session.cursor = resource_version;
            }
        }
    }

    async fn cancellable<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => None,
            output = fut => Some(output),
        }
    }

    /// Returns false if the stop signal fired while sleeping.
    async fn sleep(&self, delay: Duration) -> bool {
        self.cancellable(tokio::time::sleep(delay)).await.is_some()
    }
}
