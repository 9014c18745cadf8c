//! Request execution engine
//!
//! An [`Engine`] is bound to one async fetch function. Every call derives a
//! cache key from its arguments, answers from the cache when a fresh entry
//! exists, and otherwise runs the fetch while tracking loading and error state
//! and notifying subscribers.
//!
//! ```no_run
//! use reqcache::Engine;
//!
//! # async fn demo() -> Result<(), reqcache::ExecuteError<String>> {
//! let users = Engine::builder(|(id,): (u32,)| async move {
//!     Ok::<_, String>(format!("user {id}"))
//! })
//! .cache_time_seconds(60)
//! .build();
//!
//! let first = users.execute(false, (7,)).await?;
//! let again = users.execute(false, (7,)).await?; // answered from the cache
//! assert!(std::sync::Arc::ptr_eq(&first, &again));
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::{canonical_arg, ArgsKey, CacheKey, CacheTable, CachedData};
use crate::config::EngineConfig;
use crate::error::{ExecuteError, KeyError, RefError};
use crate::events::{EventHook, Subscription};
use crate::lock::mutex_lock;
use crate::reactive::{GroupRef, Ref, RefId};

const SOURCE: &str = "engine";

type Request<A, R, RE> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<R, RE>> + Send + Sync>;
type Fetcher<A, D, E> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<D, E>> + Send + Sync>;
type Outcome<D, E> = Result<Arc<D>, Arc<E>>;
type Flight<D, E> = Shared<BoxFuture<'static, Outcome<D, E>>>;

/// Configures an [`Engine`] before it is built
///
/// `R` and `RE` are the raw result and error types of the wrapped request,
/// `D` and `E` the adapted ones the engine caches and reports.
pub struct EngineBuilder<A, R, D, RE, E> {
    request: Request<A, R, RE>,
    adapter: Arc<dyn Fn(R) -> D + Send + Sync>,
    error_adapter: Arc<dyn Fn(RE) -> E + Send + Sync>,
    config: EngineConfig,
}

impl<A, R, RE> EngineBuilder<A, R, R, RE, RE>
where
    A: Send + 'static,
    R: Send + 'static,
    RE: Send + 'static,
{
    /// Starts a builder around `request` with identity adapters and no TTL
    pub fn new<F, Fut>(request: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RE>> + Send + 'static,
    {
        Self {
            request: Arc::new(move |args: A| request(args).boxed()),
            adapter: Arc::new(|raw: R| raw),
            error_adapter: Arc::new(|err: RE| err),
            config: EngineConfig::default(),
        }
    }
}

impl<A, R, D, RE, E> EngineBuilder<A, R, D, RE, E>
where
    A: Send + 'static,
    R: Send + 'static,
    D: Send + Sync + 'static,
    RE: Send + 'static,
    E: Send + Sync + 'static,
{
    /// Converts every raw response before it is cached or reported
    pub fn adapter<D2, G>(self, adapter: G) -> EngineBuilder<A, R, D2, RE, E>
    where
        G: Fn(R) -> D2 + Send + Sync + 'static,
    {
        EngineBuilder {
            request: self.request,
            adapter: Arc::new(adapter),
            error_adapter: self.error_adapter,
            config: self.config,
        }
    }

    /// Converts every raw failure before it is stored or reported
    pub fn error_adapter<E2, H>(self, error_adapter: H) -> EngineBuilder<A, R, D, RE, E2>
    where
        H: Fn(RE) -> E2 + Send + Sync + 'static,
    {
        EngineBuilder {
            request: self.request,
            adapter: self.adapter,
            error_adapter: Arc::new(error_adapter),
            config: self.config,
        }
    }

    /// Expires cached entries `seconds` after they were written
    pub fn cache_time_seconds(mut self, seconds: u64) -> Self {
        self.config.cache_time_seconds = Some(seconds);
        self
    }

    /// Lets concurrent calls for one uncached key share a single request
    pub fn coalesce_in_flight(mut self, enabled: bool) -> Self {
        self.config.coalesce_in_flight = enabled;
        self
    }

    /// Replaces the whole configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Engine<A, D, E>
    where
        A: Serialize + Clone + Sync,
    {
        let Self {
            request,
            adapter,
            error_adapter,
            config,
        } = self;

        let fetch: Fetcher<A, D, E> = Arc::new(move |args: A| {
            let response = request(args);
            let adapter = adapter.clone();
            let error_adapter = error_adapter.clone();
            async move {
                match response.await {
                    Ok(raw) => Ok(adapter(raw)),
                    Err(raw) => Err(error_adapter(raw)),
                }
            }
            .boxed()
        });

        Engine::from_parts(fetch, config)
    }
}

/// Shared state behind every clone of an [`Engine`]
pub(crate) struct Inner<A, D, E> {
    fetch: Fetcher<A, D, E>,
    config: EngineConfig,
    table: Mutex<CacheTable<D>>,
    in_flight: Mutex<HashMap<CacheKey, (u64, Flight<D, E>)>>,
    loading: watch::Sender<bool>,
    last_error: watch::Sender<Option<Arc<E>>>,
    /// Bumped on every successful cache write
    revision: watch::Sender<u64>,
    /// Bumped on every change to the table contents, removals included
    generation: watch::Sender<u64>,
    next_flight: AtomicU64,
    next_ref: AtomicU64,
    success: EventHook<D>,
    error: EventHook<E>,
    finally: EventHook<()>,
}

/// Clears the loading flag when a fetch settles or its future is dropped
struct LoadingGuard<'a>(&'a watch::Sender<bool>);

impl<'a> LoadingGuard<'a> {
    fn start(loading: &'a watch::Sender<bool>) -> Self {
        loading.send_replace(true);
        Self(loading)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

impl<A, D, E> Inner<A, D, E>
where
    A: Serialize + Clone + Send + Sync + 'static,
    D: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn lookup(&self, key: &CacheKey) -> Option<Arc<D>> {
        mutex_lock(&self.table, SOURCE, "lookup").fresh(key, Instant::now())
    }

    fn store(&self, args: ArgsKey, data: Arc<D>) {
        mutex_lock(&self.table, SOURCE, "store").write(args, data, Instant::now());
        self.revision.send_modify(|revision| *revision += 1);
        self.generation.send_modify(|generation| *generation += 1);
    }

    fn removed(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    /// The stored entry for `key`, expired or not
    pub(crate) fn stored(&self, key: &CacheKey) -> Option<Arc<D>> {
        mutex_lock(&self.table, SOURCE, "stored")
            .read(key, Instant::now())
            .map(|cached| cached.data)
    }

    pub(crate) fn matching(&self, index: Option<usize>, value: &serde_json::Value) -> Vec<Arc<D>> {
        mutex_lock(&self.table, SOURCE, "matching").matching(index, value, Instant::now())
    }

    /// Runs one fetch cycle: loading flag, request, cache write, events
    async fn run(self: Arc<Self>, key: ArgsKey, args: A, flight: Option<u64>) -> Outcome<D, E> {
        let loading = LoadingGuard::start(&self.loading);
        self.last_error.send_replace(None);

        let outcome = match (self.fetch)(args).await {
            Ok(data) => {
                let data = Arc::new(data);
                self.store(key.clone(), data.clone());
                debug!(key = %key.key, "cache write");
                self.success.trigger(&data);
                Ok(data)
            }
            Err(err) => {
                let err = Arc::new(err);
                warn!(key = %key.key, "request failed");
                self.last_error.send_replace(Some(err.clone()));
                self.error.trigger(&err);
                Err(err)
            }
        };

        if let Some(id) = flight {
            let mut in_flight = mutex_lock(&self.in_flight, SOURCE, "run.land");
            if in_flight.get(&key.key).is_some_and(|(current, _)| *current == id) {
                in_flight.remove(&key.key);
            }
        }

        drop(loading);
        self.finally.trigger(&());
        outcome
    }
}

/// Caching front for one async fetch function
///
/// Cloning the engine is cheap and every clone shares the same cache, state
/// and subscribers. Share a clone when several call sites should see the same
/// cached results.
pub struct Engine<A, D, E> {
    inner: Arc<Inner<A, D, E>>,
}

impl<A, D, E> Clone for Engine<A, D, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A, D, E> Engine<A, D, E>
where
    A: Serialize + Clone + Send + Sync + 'static,
    D: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Wraps `request` with default settings and no adapters
    pub fn new<F, Fut>(request: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<D, E>> + Send + 'static,
    {
        EngineBuilder::new(request).build()
    }

    /// Starts configuring an engine around `request`
    pub fn builder<F, Fut>(request: F) -> EngineBuilder<A, D, D, E, E>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<D, E>> + Send + 'static,
    {
        EngineBuilder::new(request)
    }

    fn from_parts(fetch: Fetcher<A, D, E>, config: EngineConfig) -> Self {
        let inner = Inner {
            fetch,
            table: Mutex::new(CacheTable::new(config.cache_time())),
            in_flight: Mutex::new(HashMap::new()),
            loading: watch::Sender::new(false),
            last_error: watch::Sender::new(None),
            revision: watch::Sender::new(0),
            generation: watch::Sender::new(0),
            next_flight: AtomicU64::new(0),
            next_ref: AtomicU64::new(0),
            success: EventHook::new(),
            error: EventHook::new(),
            finally: EventHook::new(),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner<A, D, E>>) -> Self {
        Self { inner }
    }

    /// Returns the result for `args`, from the cache unless `bypass_cache`
    ///
    /// A fresh cache entry is returned as is: the request is not invoked, the
    /// loading flag is untouched and no event fires. Otherwise the request
    /// runs, the result is cached and the success or error subscribers are
    /// notified, followed by the finally subscribers.
    ///
    /// Inside a Tokio runtime the request runs on its own task, so dropping
    /// the returned future does not cancel it: the entry is still written and
    /// the events still fire.
    pub async fn execute(&self, bypass_cache: bool, args: A) -> Result<Arc<D>, ExecuteError<E>> {
        let key = ArgsKey::new(&args)?;

        if !bypass_cache {
            if let Some(data) = self.inner.lookup(&key.key) {
                debug!(key = %key.key, "cache hit");
                return Ok(data);
            }
        }

        if !self.inner.config.coalesce_in_flight {
            debug!(key = %key.key, bypass_cache, "fetching");
            let run = Inner::run(self.inner.clone(), key, args, None);
            // Spawned so the fetch settles even if this caller goes away.
            return match tokio::runtime::Handle::try_current() {
                Ok(runtime) => match runtime.spawn(run).await {
                    Ok(outcome) => outcome.map_err(ExecuteError::Request),
                    Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                    Err(_) => Err(ExecuteError::Cancelled),
                },
                Err(_) => run.await.map_err(ExecuteError::Request),
            };
        }

        let flight = {
            let mut in_flight = mutex_lock(&self.inner.in_flight, SOURCE, "execute.in_flight");
            match in_flight.get(&key.key) {
                Some((_, flight)) if !bypass_cache => {
                    debug!(key = %key.key, "joining in-flight request");
                    flight.clone()
                }
                _ => {
                    // A flight may have landed between the lookup and taking the lock.
                    if !bypass_cache {
                        if let Some(data) = self.inner.lookup(&key.key) {
                            debug!(key = %key.key, "cache hit");
                            return Ok(data);
                        }
                    }

                    debug!(key = %key.key, bypass_cache, "fetching");
                    let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
                    let cache_key = key.key.clone();
                    let flight = Inner::run(self.inner.clone(), key, args, Some(id))
                        .boxed()
                        .shared();
                    in_flight.insert(cache_key, (id, flight.clone()));

                    // Keep the flight going for its joiners even if this caller goes away.
                    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                        runtime.spawn(flight.clone());
                    }
                    flight
                }
            }
        };

        flight.await.map_err(ExecuteError::Request)
    }

    /// Always invokes the request, replacing any cached entry on success
    pub async fn load(&self, args: A) -> Result<Arc<D>, ExecuteError<E>> {
        self.execute(true, args).await
    }

    pub fn cache_key(&self, args: &A) -> Result<CacheKey, KeyError> {
        CacheKey::new(args)
    }

    /// Empties the cache table
    pub fn clear(&self) {
        let removed = mutex_lock(&self.inner.table, SOURCE, "clear").clear();
        debug!(removed, "cache cleared");
        if removed > 0 {
            self.inner.removed();
        }
    }

    /// Removes the entry for `args`, returning whether one existed
    pub fn clear_one(&self, args: &A) -> Result<bool, KeyError> {
        let key = CacheKey::new(args)?;
        let removed = mutex_lock(&self.inner.table, SOURCE, "clear_one").remove(&key);
        debug!(key = %key, removed, "cache entry cleared");
        if removed {
            self.inner.removed();
        }
        Ok(removed)
    }

    /// Looks at the stored entry for `args`, expired or not
    pub fn peek(&self, args: &A) -> Result<Option<CachedData<D>>, KeyError> {
        let key = CacheKey::new(args)?;
        Ok(mutex_lock(&self.inner.table, SOURCE, "peek").read(&key, Instant::now()))
    }

    /// Creates a reactive cell following `args`
    ///
    /// The cell starts out holding `default` and re-executes (through the
    /// cache) once right away and again every time the revision advances.
    /// Each call creates a distinct cell. Fails outside a Tokio runtime.
    pub fn get_ref(&self, default: D, args: A) -> Result<Ref<D>, RefError> {
        let runtime = tokio::runtime::Handle::try_current()?;
        let key = CacheKey::new(&args)?;
        let serial = self.inner.next_ref.fetch_add(1, Ordering::Relaxed);
        Ok(Ref::spawn(
            &runtime,
            RefId::new(serial, key),
            default,
            Arc::downgrade(&self.inner),
            self.inner.revision.subscribe(),
            args,
        ))
    }

    /// A view over fresh entries whose argument at `index` equals `arg`
    ///
    /// Values are compared through their canonical serialization. Use
    /// [`group_all`](Self::group_all) to select every entry.
    pub fn group_by_arg<T>(&self, index: usize, arg: &T) -> Result<GroupRef<D>, KeyError>
    where
        T: Serialize + ?Sized,
    {
        let value = canonical_arg(arg)?;
        let inner = Arc::downgrade(&self.inner);
        let source = Arc::new(move || match inner.upgrade() {
            Some(inner) => inner.matching(Some(index), &value),
            None => Vec::new(),
        });
        Ok(GroupRef::new(
            Some(index),
            self.inner.generation.subscribe(),
            source,
        ))
    }

    /// A view over every fresh entry, whatever its arguments
    pub fn group_all(&self) -> GroupRef<D> {
        let inner = Arc::downgrade(&self.inner);
        let source = Arc::new(move || match inner.upgrade() {
            Some(inner) => inner.matching(None, &serde_json::Value::Null),
            None => Vec::new(),
        });
        GroupRef::new(None, self.inner.generation.subscribe(), source)
    }

    /// Subscribes to successful fetches
    pub fn on_success<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&D) + Send + Sync + 'static,
    {
        self.inner.success.on(handler)
    }

    /// Subscribes to failed fetches, receiving the adapted error
    pub fn on_error<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.inner.error.on(handler)
    }

    /// Subscribes to the end of every fetch, successful or not
    pub fn on_finally<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.finally.on(move |_: &()| handler())
    }

    /// Whether the most recently started fetch is still running
    pub fn is_loading(&self) -> bool {
        *self.inner.loading.borrow()
    }

    /// The error of the most recent failed fetch, cleared when a fetch starts
    pub fn last_error(&self) -> Option<Arc<E>> {
        self.inner.last_error.borrow().clone()
    }

    pub fn revision(&self) -> u64 {
        *self.inner.revision.borrow()
    }

    pub fn watch_loading(&self) -> watch::Receiver<bool> {
        self.inner.loading.subscribe()
    }

    pub fn watch_errors(&self) -> watch::Receiver<Option<Arc<E>>> {
        self.inner.last_error.subscribe()
    }

    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        mutex_lock(&self.inner.table, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        mutex_lock(&self.inner.table, SOURCE, "is_empty").is_empty()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }
}

impl<A, D, E> fmt::Debug for Engine<A, D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("loading", &*self.inner.loading.borrow())
            .field("revision", &*self.inner.revision.borrow())
            .finish_non_exhaustive()
    }
}
