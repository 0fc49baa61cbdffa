use std::{future::Future, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use futures_util::{future::BoxFuture, stream::BoxStream};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use self::{dispatcher::Dispatcher, reflector::Reflector};
pub use self::{
    delta_queue::{Delta, DeltaKind, DeltaQueue},
    error::{HandlerError, LifecycleError, QueueError, WatchError},
    factory::{InformerFactory, ListWatcherSource},
    store::ObjectStore,
};
use crate::{
    config::InformerConfig,
    models::watch::WatchEvent,
    objects::Object,
    utils::{parse_selector, selector_match},
};

mod backoff;
mod delta_queue;
mod dispatcher;
mod error;
mod factory;
mod reflector;
mod store;

pub type WatchStream<T> = BoxStream<'static, Result<WatchEvent<T>, WatchError>>;

pub type CLS<ARG, RES> = Box<dyn Fn(ARG) -> BoxFuture<'static, Result<RES>> + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListOptions {
    /// Equality-based label selector, e.g. `run=server`.
    pub label_selector: Option<String>,
    /// Field selector; `metadata.name` and `metadata.namespace` are supported.
    pub field_selector: Option<String>,
}

impl ListOptions {
    pub fn with_label_selector(mut self, selector: &str) -> Self {
        self.label_selector = Some(selector.to_owned());
        self
    }

    pub fn with_field_selector(mut self, selector: &str) -> Self {
        self.field_selector = Some(selector.to_owned());
        self
    }

    /// Whether `object` is selected. Malformed selectors select nothing.
    pub fn matches<T: Object>(&self, object: &T) -> bool {
        let metadata = object.metadata();
        if let Some(selector) = &self.label_selector {
            match parse_selector(selector) {
                Some(selector) if selector_match(&selector, &metadata.labels) => {},
                _ => return false,
            }
        }
        if let Some(selector) = &self.field_selector {
            for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                let matched = match term.split_once('=') {
                    Some(("metadata.name", name)) => metadata.name == name,
                    Some(("metadata.namespace", namespace)) => {
                        metadata.namespace.as_deref() == Some(namespace)
                    },
                    _ => false,
                };
                if !matched {
                    return false;
                }
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectList<T> {
    pub items: Vec<T>,
    pub resource_version: String,
}

/// Remote side of an informer: a full listing plus an incremental stream
/// resumable from a resource version.
#[async_trait]
pub trait ListWatcher<T: Object>: Send + Sync + 'static {
    async fn list(&self, options: &ListOptions) -> Result<ObjectList<T>, WatchError>;

    async fn watch(
        &self,
        options: &ListOptions,
        resource_version: &str,
    ) -> Result<WatchStream<T>, WatchError>;
}

pub struct EventHandler<T> {
    pub add_cls: CLS<T, ()>,
    /// old value, new value
    pub update_cls: CLS<(T, T), ()>,
    pub delete_cls: CLS<T, ()>,
}

impl<T: Object> Default for EventHandler<T> {
    fn default() -> Self {
        Self {
            add_cls: Box::new(|_| Box::pin(async { Ok(()) })),
            update_cls: Box::new(|_| Box::pin(async { Ok(()) })),
            delete_cls: Box::new(|_| Box::pin(async { Ok(()) })),
        }
    }
}

impl<T: Object> EventHandler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_add<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.add_cls = Box::new(move |new| Box::pin(f(new)));
        self
    }

    pub fn on_update<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(T, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.update_cls = Box::new(move |(old, new)| Box::pin(f(old, new)));
        self
    }

    pub fn on_delete<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.delete_cls = Box::new(move |old| Box::pin(f(old)));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LifecycleState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Keeps an [`ObjectStore`] in sync with a remote collection and notifies
/// the registered [`EventHandler`]s of every change.
pub struct Informer<T: Object> {
    lw: Arc<dyn ListWatcher<T>>,
    config: InformerConfig,
    store: Arc<ObjectStore<T>>,
    queue: Arc<DeltaQueue<T>>,
    handlers: Mutex<Vec<EventHandler<T>>>,
    state: Mutex<LifecycleState>,
    stop_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Object> Informer<T> {
    pub fn new<L: ListWatcher<T>>(lw: L, config: InformerConfig) -> Self {
        Self::with_list_watcher(Arc::new(lw), config)
    }

    pub fn with_list_watcher(lw: Arc<dyn ListWatcher<T>>, config: InformerConfig) -> Self {
        let store = Arc::new(ObjectStore::new());
        let queue = Arc::new(DeltaQueue::new(store.clone(), config.queue_capacity));
        Self {
            lw,
            config,
            store,
            queue,
            handlers: Mutex::new(Vec::new()),
            state: Mutex::new(LifecycleState::Idle),
            stop_token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Handlers are invoked in registration order, and only those
    /// registered before [`Informer::start`] are used.
    pub fn add_event_handler(&self, eh: EventHandler<T>) -> Result<(), LifecycleError> {
        match *self.state.lock() {
            LifecycleState::Idle => {
                self.handlers.lock().push(eh);
                Ok(())
            },
            LifecycleState::Starting | LifecycleState::Running => {
                Err(LifecycleError::AlreadyStarted)
            },
            LifecycleState::Stopping | LifecycleState::Stopped => Err(LifecycleError::Closed),
        }
    }

    /// Spawn the reflector, the dispatcher and the resync timer on the
    /// current tokio runtime.
    pub fn start(&self) -> Result<(), LifecycleError> {
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Idle => *state = LifecycleState::Starting,
                LifecycleState::Starting | LifecycleState::Running => {
                    return Err(LifecycleError::AlreadyStarted)
                },
                LifecycleState::Stopping | LifecycleState::Stopped => {
                    return Err(LifecycleError::Closed)
                },
            }
        }

        let handlers = Arc::new(std::mem::take(&mut *self.handlers.lock()));
        let dispatcher = Dispatcher {
            queue: self.queue.clone(),
            store: self.store.clone(),
            handlers,
        };
        let reflector = Reflector {
            lw: self.lw.clone(),
            queue: self.queue.clone(),
            options: self.config.list_options.clone(),
            backoff: self.config.backoff.clone(),
            stop: self.stop_token.clone(),
        };

        // `stop` takes the task list after leaving `Starting`, so either it
        // sees every task spawned here or nothing is spawned at all
        let mut tasks = self.tasks.lock();
        let mut state = self.state.lock();
        if *state != LifecycleState::Starting {
            return Err(LifecycleError::Closed);
        }
        tasks.push(tokio::spawn(dispatcher.run()));
        tasks.push(tokio::spawn(reflector.run()));
        if let Some(period) = self.config.resync_period() {
            let queue = self.queue.clone();
            let stop = self.stop_token.clone();
            tasks.push(tokio::spawn(run_resync(queue, period, stop)));
        }
        *state = LifecycleState::Running;
        drop(state);
        drop(tasks);

        tracing::info!("Informer started");
        Ok(())
    }

    /// Stop watching, let the dispatcher drain the queue, and wait for
    /// every task to exit.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Idle => {
                    *state = LifecycleState::Stopped;
                    self.queue.close();
                    return Ok(());
                },
                LifecycleState::Starting | LifecycleState::Running => {
                    *state = LifecycleState::Stopping
                },
                LifecycleState::Stopping | LifecycleState::Stopped => {
                    return Err(LifecycleError::Closed)
                },
            }
        }

        self.stop_token.cancel();
        self.queue.close();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("Informer task failed: {}", e);
            }
        }

        *self.state.lock() = LifecycleState::Stopped;
        tracing::info!("Informer stopped");
        Ok(())
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// True once every object of the initial listing has been dispatched.
    pub fn has_synced(&self) -> Result<bool, LifecycleError> {
        self.ensure_open()?;
        Ok(self.queue.has_synced())
    }

    /// Wait until the initial listing has been dispatched. Resolves to
    /// `false` if `timeout` elapses first.
    pub async fn wait_for_cache_sync(&self, timeout: Duration) -> Result<bool, LifecycleError> {
        match self.state() {
            LifecycleState::Idle => return Err(LifecycleError::NotStarted),
            LifecycleState::Stopping | LifecycleState::Stopped => {
                return Err(LifecycleError::Closed)
            },
            LifecycleState::Starting | LifecycleState::Running => {},
        }

        let mut synced = self.queue.subscribe_synced();
        let wait = async {
            while !*synced.borrow_and_update() {
                if synced.changed().await.is_err() {
                    return false;
                }
            }
            true
        };
        tokio::select! {
            _ = self.stop_token.cancelled() => Err(LifecycleError::Closed),
            result = tokio::time::timeout(timeout, wait) => Ok(result.unwrap_or(false)),
        }
    }

    pub fn list(&self) -> Result<Vec<T>, LifecycleError> {
        self.ensure_open()?;
        Ok(self.store.list())
    }

    pub fn get(&self, key: &str) -> Result<Option<T>, LifecycleError> {
        self.ensure_open()?;
        Ok(self.store.get(key))
    }

    /// Shared handle to the cache, for readers that outlive a borrow of
    /// the informer.
    pub fn get_store(&self) -> Arc<ObjectStore<T>> {
        self.store.clone()
    }

    fn ensure_open(&self) -> Result<(), LifecycleError> {
        match self.state() {
            LifecycleState::Stopping | LifecycleState::Stopped => Err(LifecycleError::Closed),
            _ => Ok(()),
        }
    }
}

async fn run_resync<T: Object>(queue: Arc<DeltaQueue<T>>, period: Duration, stop: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    // the first tick completes immediately
    interval.tick().await;
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval.tick() => {
                tracing::debug!("Resync {} cached objects", queue.len());
                if queue.resync().is_err() {
                    break;
                }
            },
        }
    }
}
