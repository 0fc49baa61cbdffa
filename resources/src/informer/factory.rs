use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{Informer, LifecycleError, ListWatcher};
use crate::{
    client::{ClientContext, HttpListWatcher},
    config::InformerConfig,
    objects::{namespace::Namespace, pod::Pod, Object},
};

/// Builds list-watchers for a resource path such as `pods`.
pub trait ListWatcherSource: Send + Sync + 'static {
    fn list_watcher<T: Object>(&self, resource: &str) -> Arc<dyn ListWatcher<T>>;
}

impl ListWatcherSource for ClientContext {
    fn list_watcher<T: Object>(&self, resource: &str) -> Arc<dyn ListWatcher<T>> {
        Arc::new(HttpListWatcher::<T>::new(self.clone(), resource))
    }
}

/// Type-erased view of an informer held by the factory.
trait SharedInformer: Send + Sync {
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn start(&self) -> Result<(), LifecycleError>;
    fn stop(&self) -> BoxFuture<'_, Result<(), LifecycleError>>;
    fn wait_for_cache_sync(&self, timeout: Duration) -> BoxFuture<'_, Result<bool, LifecycleError>>;
}

impl<T: Object> SharedInformer for Informer<T> {
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn start(&self) -> Result<(), LifecycleError> {
        Informer::start(self)
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), LifecycleError>> {
        Box::pin(Informer::stop(self))
    }

    fn wait_for_cache_sync(&self, timeout: Duration) -> BoxFuture<'_, Result<bool, LifecycleError>> {
        Box::pin(Informer::wait_for_cache_sync(self, timeout))
    }
}

/// Hands out one shared informer per resource, so several consumers can
/// register handlers on the same cache.
pub struct InformerFactory<S: ListWatcherSource = ClientContext> {
    source: S,
    config: InformerConfig,
    informers: Mutex<HashMap<(TypeId, String), Arc<dyn SharedInformer>>>,
}

impl<S: ListWatcherSource> InformerFactory<S> {
    pub fn new(source: S, config: InformerConfig) -> Self {
        Self {
            source,
            config,
            informers: Mutex::new(HashMap::new()),
        }
    }

    pub fn informer_for<T: Object>(&self, resource: &str) -> Arc<Informer<T>> {
        let key = (TypeId::of::<T>(), resource.to_owned());
        let mut informers = self.informers.lock();
        if let Some(existing) = informers.get(&key) {
            if let Ok(informer) = existing.clone().as_any().downcast::<Informer<T>>() {
                return informer;
            }
        }
        let lw = self.source.list_watcher::<T>(resource);
        let informer = Arc::new(Informer::with_list_watcher(lw, self.config.clone()));
        informers.insert(key, informer.clone());
        informer
    }

    pub fn namespaces(&self) -> Arc<Informer<Namespace>> {
        self.informer_for("namespaces")
    }

    pub fn pods(&self) -> Arc<Informer<Pod>> {
        self.informer_for("pods")
    }

    /// Start every informer created so far. Informers already running are
    /// left alone.
    pub fn start(&self) -> Result<(), LifecycleError> {
        for informer in self.snapshot() {
            match informer.start() {
                Ok(()) | Err(LifecycleError::AlreadyStarted) => {},
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// True once every informer has synced; false if they have not all
    /// synced within `timeout`.
    pub async fn wait_for_cache_sync(&self, timeout: Duration) -> Result<bool, LifecycleError> {
        let deadline = Instant::now() + timeout;
        for informer in self.snapshot() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !informer.wait_for_cache_sync(remaining).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub async fn shutdown(&self) {
        for informer in self.snapshot() {
            if let Err(e) = informer.stop().await {
                tracing::debug!("Informer already stopped: {}", e);
            }
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn SharedInformer>> {
        self.informers.lock().values().cloned().collect()
    }
}
