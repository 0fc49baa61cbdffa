use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Error};
use async_trait::async_trait;
use futures::{
    channel::mpsc,
    stream::{self, StreamExt},
};
use parking_lot::Mutex;
use resources::{
    config::{BackoffConfig, InformerConfig},
    informer::{
        EventHandler, Informer, InformerFactory, LifecycleError, LifecycleState, ListOptions,
        ListWatcher, ListWatcherSource, ObjectList, WatchError, WatchStream,
    },
    models::watch::{Status, WatchEvent},
    objects::{namespace::Namespace, pod::Pod, Object},
};

type Feed<T> = mpsc::UnboundedSender<Result<WatchEvent<T>, WatchError>>;

/// Serves queued listings and watch streams. Once the queued streams run
/// out, watches park forever; once the listings run out, lists fail.
struct FakeApi<T: Object> {
    lists: Mutex<VecDeque<ObjectList<T>>>,
    watches: Mutex<VecDeque<WatchStream<T>>>,
    cursors: Mutex<Vec<String>>,
    list_calls: AtomicUsize,
    list_delay: Duration,
}

impl<T: Object> FakeApi<T> {
    fn new() -> Self {
        Self {
            lists: Mutex::new(VecDeque::new()),
            watches: Mutex::new(VecDeque::new()),
            cursors: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
            list_delay: Duration::ZERO,
        }
    }

    fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = delay;
        self
    }

    fn with_list(self, items: Vec<T>, resource_version: &str) -> Self {
        self.lists.lock().push_back(ObjectList {
            items,
            resource_version: resource_version.to_owned(),
        });
        self
    }

    /// Queue a watch stream driven by the returned sender.
    fn feed(&self) -> Feed<T> {
        let (tx, rx) = mpsc::unbounded();
        self.watches.lock().push_back(rx.boxed());
        tx
    }

    fn cursors(&self) -> Vec<String> {
        self.cursors.lock().clone()
    }
}

#[async_trait]
impl<T: Object> ListWatcher<T> for FakeApi<T> {
    async fn list(&self, _: &ListOptions) -> Result<ObjectList<T>, WatchError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.list_delay).await;
        self.lists
            .lock()
            .pop_front()
            .ok_or_else(|| WatchError::transport("connection refused"))
    }

    async fn watch(&self, _: &ListOptions, resource_version: &str) -> Result<WatchStream<T>, WatchError> {
        self.cursors.lock().push(resource_version.to_owned());
        match self.watches.lock().pop_front() {
            Some(stream) => Ok(stream),
            None => Ok(stream::pending().boxed()),
        }
    }
}

type Log = Arc<Mutex<Vec<String>>>;

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn fast_config() -> InformerConfig {
    InformerConfig {
        backoff: BackoffConfig {
            initial_ms: 1,
            max_ms: 10,
            factor: 2.0,
            jitter: 0.0,
        },
        ..InformerConfig::default()
    }
}

fn ns(name: &str, rv: &str) -> Namespace {
    Namespace::new(name, rv)
}

fn recorder(log: Log) -> EventHandler<Namespace> {
    let (add_log, update_log, delete_log) = (log.clone(), log.clone(), log);
    EventHandler::new()
        .on_add(move |new: Namespace| {
            let log = add_log.clone();
            async move {
                log.lock().push(format!("add {}@{}", new.name(), new.resource_version()));
                Ok::<(), Error>(())
            }
        })
        .on_update(move |old: Namespace, new: Namespace| {
            let log = update_log.clone();
            async move {
                log.lock().push(format!(
                    "update {}@{}->{}",
                    new.name(),
                    old.resource_version(),
                    new.resource_version()
                ));
                Ok::<(), Error>(())
            }
        })
        .on_delete(move |old: Namespace| {
            let log = delete_log.clone();
            async move {
                log.lock().push(format!("delete {}", old.name()));
                Ok::<(), Error>(())
            }
        })
}

async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn started(api: &Arc<FakeApi<Namespace>>, config: InformerConfig, log: &Log) -> Informer<Namespace> {
    let informer = Informer::with_list_watcher(api.clone(), config);
    informer.add_event_handler(recorder(log.clone())).unwrap();
    informer.start().unwrap();
    informer
}

#[tokio::test]
async fn follows_list_then_watch() {
    init_logging();
    let api = Arc::new(FakeApi::new().with_list(vec![ns("a", "1"), ns("b", "1")], "1"));
    let feed = api.feed();
    let log = Log::default();
    let informer = started(&api, fast_config(), &log);

    assert!(informer.wait_for_cache_sync(Duration::from_secs(2)).await.unwrap());
    assert!(informer.has_synced().unwrap());
    assert_eq!(*log.lock(), vec!["add a@1", "add b@1"]);

    feed.unbounded_send(Ok(WatchEvent::new_modified(ns("a", "2")))).unwrap();
    feed.unbounded_send(Ok(WatchEvent::new_deleted(ns("b", "3")))).unwrap();
    drop(feed);

    // the stream ends, and the informer resumes from the last version seen
    eventually("reconnect", || api.cursors().len() == 2).await;
    eventually("deletion", || log.lock().len() == 4).await;
    assert_eq!(api.cursors(), vec!["1", "3"]);
    assert_eq!(api.list_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        *log.lock(),
        vec!["add a@1", "add b@1", "update a@1->2", "delete b"]
    );
    assert_eq!(informer.get("a").unwrap(), Some(ns("a", "2")));
    assert_eq!(informer.get("b").unwrap(), None);
    assert_eq!(informer.list().unwrap(), vec![ns("a", "2")]);

    informer.stop().await.unwrap();
    assert_eq!(informer.state(), LifecycleState::Stopped);
    assert_eq!(log.lock().len(), 4);
}

#[tokio::test]
async fn sync_waits_for_handlers() {
    init_logging();
    let api = Arc::new(FakeApi::new().with_list(vec![ns("a", "1"), ns("b", "1"), ns("c", "1")], "1"));
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = handled.clone();
    let informer = Informer::with_list_watcher(api.clone(), fast_config());
    informer
        .add_event_handler(EventHandler::new().on_add(move |_: Namespace| {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), Error>(())
            }
        }))
        .unwrap();
    informer.start().unwrap();

    assert!(informer.wait_for_cache_sync(Duration::from_secs(2)).await.unwrap());
    assert_eq!(handled.load(Ordering::SeqCst), 3);
    assert_eq!(informer.get_store().len(), 3);
    informer.stop().await.unwrap();
}

#[tokio::test]
async fn sync_times_out_while_listing_fails() {
    init_logging();
    let api = Arc::new(FakeApi::<Namespace>::new());
    let informer = Informer::with_list_watcher(api.clone(), fast_config());
    informer.start().unwrap();

    assert!(!informer.wait_for_cache_sync(Duration::from_millis(50)).await.unwrap());
    assert!(!informer.has_synced().unwrap());
    assert!(api.list_calls.load(Ordering::SeqCst) > 1);
    informer.stop().await.unwrap();
}

#[tokio::test]
async fn empty_listing_syncs_immediately() {
    let api = Arc::new(FakeApi::<Namespace>::new().with_list(Vec::new(), "7"));
    let log = Log::default();
    let informer = started(&api, fast_config(), &log);

    assert!(informer.wait_for_cache_sync(Duration::from_secs(2)).await.unwrap());
    assert!(log.lock().is_empty());
    eventually("watch", || api.cursors() == vec!["7"]).await;
    informer.stop().await.unwrap();
}

#[tokio::test]
async fn changes_of_one_key_are_handled_in_order() {
    init_logging();
    let api = Arc::new(FakeApi::new().with_list(vec![ns("a", "1")], "1"));
    let feed = api.feed();
    let seen = Arc::new(Mutex::new(Vec::<u64>::new()));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let informer = Informer::with_list_watcher(api.clone(), fast_config());
    let (seen_cb, in_flight_cb, overlaps_cb) = (seen.clone(), in_flight.clone(), overlaps.clone());
    informer
        .add_event_handler(EventHandler::new().on_update(move |_: Namespace, new: Namespace| {
            let (seen, in_flight, overlaps) = (seen_cb.clone(), in_flight_cb.clone(), overlaps_cb.clone());
            async move {
                if in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
                seen.lock().push(new.resource_version().parse::<u64>()?);
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<(), Error>(())
            }
        }))
        .unwrap();
    informer.start().unwrap();
    assert!(informer.wait_for_cache_sync(Duration::from_secs(2)).await.unwrap());

    for rv in 2..=30 {
        feed.unbounded_send(Ok(WatchEvent::new_modified(ns("a", &rv.to_string()))))
            .unwrap();
    }
    eventually("last version", || seen.lock().last() == Some(&30)).await;

    let seen = seen.lock().clone();
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "out of order: {:?}", seen);
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(informer.get("a").unwrap(), Some(ns("a", "30")));
    informer.stop().await.unwrap();
}

#[tokio::test]
async fn resync_replays_cached_state() {
    init_logging();
    let api = Arc::new(FakeApi::new().with_list(vec![ns("a", "1")], "1"));
    let log = Log::default();
    let informer = started(
        &api,
        fast_config().with_resync_period(Duration::from_millis(10)),
        &log,
    );
    assert!(informer.wait_for_cache_sync(Duration::from_secs(2)).await.unwrap());

    eventually("a few resyncs", || log.lock().len() >= 3).await;
    informer.stop().await.unwrap();

    let log = log.lock().clone();
    assert_eq!(log[0], "add a@1");
    assert!(log[1..].iter().all(|entry| entry == "update a@1->1"), "{:?}", log);
    assert_eq!(informer.get_store().get("a"), Some(ns("a", "1")));
}

#[tokio::test]
async fn relists_when_version_expires() {
    init_logging();
    let api = Arc::new(
        FakeApi::new()
            .with_list(vec![ns("a", "1"), ns("b", "1")], "1")
            .with_list(vec![ns("b", "1"), ns("c", "5")], "5"),
    );
    let feed = api.feed();
    let log = Log::default();
    let informer = started(&api, fast_config(), &log);
    assert!(informer.wait_for_cache_sync(Duration::from_secs(2)).await.unwrap());

    feed.unbounded_send(Ok(WatchEvent::Error {
        status: Status::gone("too old resource version: 1"),
    }))
    .unwrap();

    eventually("relist", || log.lock().len() == 4).await;
    assert_eq!(api.list_calls.load(Ordering::SeqCst), 2);
    eventually("watch from the new listing", || api.cursors() == vec!["1", "5"]).await;
    assert_eq!(*log.lock(), vec!["add a@1", "add b@1", "add c@5", "delete a"]);

    let mut keys = informer.get_store().list_keys();
    keys.sort();
    assert_eq!(keys, vec!["b", "c"]);
    informer.stop().await.unwrap();
}

#[tokio::test]
async fn failing_handlers_are_isolated() {
    init_logging();
    let api = Arc::new(FakeApi::new().with_list(vec![ns("a", "1"), ns("b", "1")], "1"));
    let log = Log::default();
    let informer = Informer::with_list_watcher(api.clone(), fast_config());
    informer
        .add_event_handler(EventHandler::new().on_add(|new: Namespace| async move {
            Err::<(), Error>(anyhow!("refusing {}", new.name()))
        }))
        .unwrap();
    informer
        .add_event_handler(EventHandler::new().on_add(|new: Namespace| async move {
            assert_ne!(new.name(), "b", "cannot handle b");
            Ok::<(), Error>(())
        }))
        .unwrap();
    informer.add_event_handler(recorder(log.clone())).unwrap();
    informer.start().unwrap();

    assert!(informer.wait_for_cache_sync(Duration::from_secs(2)).await.unwrap());
    assert_eq!(*log.lock(), vec!["add a@1", "add b@1"]);
    assert_eq!(informer.get_store().len(), 2);
    informer.stop().await.unwrap();
}

#[tokio::test]
async fn lifecycle_misuse_is_reported() {
    let api = Arc::new(FakeApi::<Namespace>::new().with_list(Vec::new(), "1"));
    let informer = Informer::with_list_watcher(api.clone(), fast_config());

    assert_eq!(informer.state(), LifecycleState::Idle);
    assert_eq!(
        informer.wait_for_cache_sync(Duration::from_millis(10)).await,
        Err(LifecycleError::NotStarted)
    );

    informer.start().unwrap();
    assert_eq!(informer.state(), LifecycleState::Running);
    assert_eq!(informer.start(), Err(LifecycleError::AlreadyStarted));
    assert_eq!(
        informer.add_event_handler(EventHandler::new()),
        Err(LifecycleError::AlreadyStarted)
    );

    informer.stop().await.unwrap();
    assert_eq!(informer.stop().await, Err(LifecycleError::Closed));
    assert_eq!(informer.start(), Err(LifecycleError::Closed));
    assert_eq!(informer.list(), Err(LifecycleError::Closed));
    assert_eq!(informer.get("a"), Err(LifecycleError::Closed));
    assert_eq!(informer.has_synced(), Err(LifecycleError::Closed));
    assert_eq!(
        informer.wait_for_cache_sync(Duration::from_millis(10)).await,
        Err(LifecycleError::Closed)
    );
    assert_eq!(
        informer.add_event_handler(EventHandler::new()),
        Err(LifecycleError::Closed)
    );
}

#[tokio::test]
async fn stop_releases_sync_waiters() {
    let api = Arc::new(FakeApi::<Namespace>::new());
    let informer = Arc::new(Informer::with_list_watcher(api, fast_config()));
    informer.start().unwrap();

    let waiter = {
        let informer = informer.clone();
        tokio::spawn(async move { informer.wait_for_cache_sync(Duration::from_secs(30)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    informer.stop().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result, Err(LifecycleError::Closed));
}

/// Builds an api with one empty listing per informer.
struct FakeSource;

impl ListWatcherSource for FakeSource {
    fn list_watcher<T: Object>(&self, _resource: &str) -> Arc<dyn ListWatcher<T>> {
        Arc::new(FakeApi::<T>::new().with_list(Vec::new(), "1"))
    }
}

/// Namespaces list slowly, every other resource never lists.
struct SlowSource;

impl ListWatcherSource for SlowSource {
    fn list_watcher<T: Object>(&self, resource: &str) -> Arc<dyn ListWatcher<T>> {
        match resource {
            "namespaces" => Arc::new(
                FakeApi::<T>::new()
                    .with_list(Vec::new(), "1")
                    .with_list_delay(Duration::from_millis(150)),
            ),
            _ => Arc::new(FakeApi::<T>::new()),
        }
    }
}

#[tokio::test]
async fn factory_shares_informers() {
    let factory = InformerFactory::new(FakeSource, fast_config());

    let first = factory.namespaces();
    let second = factory.informer_for::<Namespace>("namespaces");
    assert!(Arc::ptr_eq(&first, &second));
    let pods: Arc<Informer<Pod>> = factory.pods();

    first.add_event_handler(EventHandler::new()).unwrap();
    second.add_event_handler(EventHandler::new()).unwrap();

    factory.start().unwrap();
    // starting again leaves running informers alone
    factory.start().unwrap();
    assert!(factory.wait_for_cache_sync(Duration::from_secs(2)).await.unwrap());
    assert_eq!(pods.state(), LifecycleState::Running);

    factory.shutdown().await;
    assert_eq!(first.state(), LifecycleState::Stopped);
    assert_eq!(pods.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn factory_sync_shares_one_deadline() {
    let factory = InformerFactory::new(SlowSource, fast_config());
    factory.namespaces();
    factory.pods();
    factory.start().unwrap();

    let begin = tokio::time::Instant::now();
    assert!(!factory.wait_for_cache_sync(Duration::from_millis(200)).await.unwrap());
    assert!(begin.elapsed() < Duration::from_millis(300), "waited {:?}", begin.elapsed());
    factory.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_start_and_stop_end_stopped() {
    for _ in 0..200 {
        let api = Arc::new(FakeApi::<Namespace>::new().with_list(Vec::new(), "1"));
        let informer = Arc::new(Informer::with_list_watcher(api, fast_config()));

        let starter = {
            let informer = informer.clone();
            tokio::spawn(async move { informer.start() })
        };
        let stopper = {
            let informer = informer.clone();
            tokio::spawn(async move { informer.stop().await })
        };
        let started = starter.await.unwrap();
        stopper.await.unwrap().unwrap();

        assert!(matches!(started, Ok(()) | Err(LifecycleError::Closed)));
        assert_eq!(informer.state(), LifecycleState::Stopped);
        assert_eq!(informer.list(), Err(LifecycleError::Closed));
        assert_eq!(informer.has_synced(), Err(LifecycleError::Closed));
    }
}
