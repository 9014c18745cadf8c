//! Reactive cells bound to an engine
//!
//! A [`Ref`] follows one argument list: a background task re-runs the cached
//! execution whenever the engine's revision advances and publishes the result
//! through a `tokio::sync::watch` channel. An entry written for the same key by
//! someone else is published as is. A [`GroupRef`] is a pull-based view
//! that recomputes on read and signals when the table contents change.

use std::fmt;
use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::cache::CacheKey;
use crate::engine::{Engine, Inner};

pub use tokio::sync::watch::error::RecvError;

/// Identity of one reactive cell
///
/// `serial` is unique per engine, so two cells created for the same arguments
/// never collide even though they read the same cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefId {
    serial: u64,
    key: CacheKey,
}

impl RefId {
    pub(crate) fn new(serial: u64, key: CacheKey) -> Self {
        Self { serial, key }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Cache key of the arguments the cell follows
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref#{}:{}", self.serial, self.key)
    }
}

/// Read-only cell holding the latest result for one argument list
///
/// Reads never wait: they return the default until the first execution
/// resolves, and keep the previous value when an execution fails. The
/// background task stops once every clone of the cell is dropped or the
/// engine goes away.
pub struct Ref<D> {
    id: RefId,
    value: watch::Receiver<Arc<D>>,
}

impl<D> Ref<D>
where
    D: Send + Sync + 'static,
{
    pub(crate) fn spawn<A, E>(
        runtime: &Handle,
        id: RefId,
        default: D,
        engine: Weak<Inner<A, D, E>>,
        mut revision: watch::Receiver<u64>,
        args: A,
    ) -> Self
    where
        A: Serialize + Clone + Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        let (tx, rx) = watch::channel(Arc::new(default));
        let task_id = id.clone();

        runtime.spawn(async move {
            let mut published: Option<Arc<D>> = None;
            loop {
                let Some(inner) = engine.upgrade() else {
                    break;
                };

                if let Some(data) = refresh(inner, &args, published.as_ref(), &task_id).await {
                    trace!(cell = %task_id, "ref updated");
                    tx.send_replace(data.clone());
                    published = Some(data);
                }
                // Our own write bumped the revision; only later changes count.
                revision.borrow_and_update();

                tokio::select! {
                    changed = revision.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tx.closed() => {
                        break;
                    }
                }
            }
            trace!(cell = %task_id, "ref task stopped");
        });

        Self { id, value: rx }
    }
}

/// Produces the next value for a cell, or `None` to keep the current one
///
/// When someone else wrote the cell's key since it last published, that
/// entry is taken as is, even if it already expired. Refetching it instead
/// would let two cells on one short-lived key keep re-triggering each other.
async fn refresh<A, D, E>(
    inner: Arc<Inner<A, D, E>>,
    args: &A,
    published: Option<&Arc<D>>,
    cell: &RefId,
) -> Option<Arc<D>>
where
    A: Serialize + Clone + Send + Sync + 'static,
    D: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    if let (Some(published), Some(stored)) = (published, inner.stored(cell.key())) {
        if !Arc::ptr_eq(published, &stored) {
            return Some(stored);
        }
    }

    match Engine::from_inner(inner).execute(false, args.clone()).await {
        Ok(data) => Some(data),
        Err(_) => {
            debug!(cell = %cell, "ref refresh failed, keeping previous value");
            None
        }
    }
}

impl<D> Ref<D> {
    pub fn id(&self) -> &RefId {
        &self.id
    }

    /// The last resolved value, or the default
    pub fn get(&self) -> Arc<D> {
        self.value.borrow().clone()
    }

    /// Waits until the cell holds a value it has not reported yet
    pub async fn changed(&mut self) -> Result<(), RecvError> {
        self.value.changed().await
    }

    /// A raw receiver for callers that want to plug into their own select loop
    pub fn watch(&self) -> watch::Receiver<Arc<D>> {
        self.value.clone()
    }
}

impl<D> Clone for Ref<D> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            value: self.value.clone(),
        }
    }
}

impl<D> fmt::Debug for Ref<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref").field("id", &self.id).finish_non_exhaustive()
    }
}

type GroupSource<D> = Arc<dyn Fn() -> Vec<Arc<D>> + Send + Sync>;

/// Read-only view over cached entries sharing an argument value
pub struct GroupRef<D> {
    index: Option<usize>,
    generation: watch::Receiver<u64>,
    source: GroupSource<D>,
}

impl<D> GroupRef<D> {
    pub(crate) fn new(
        index: Option<usize>,
        generation: watch::Receiver<u64>,
        source: GroupSource<D>,
    ) -> Self {
        Self {
            index,
            generation,
            source,
        }
    }

    /// Argument position this view filters on; `None` means every entry
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// Currently fresh matching entries, ordered by cache key
    pub fn get(&self) -> Vec<Arc<D>> {
        (self.source)()
    }

    /// Waits until the cache table contents change
    pub async fn changed(&mut self) -> Result<(), RecvError> {
        self.generation.changed().await
    }
}

impl<D> Clone for GroupRef<D> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            generation: self.generation.clone(),
            source: self.source.clone(),
        }
    }
}

impl<D> fmt::Debug for GroupRef<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupRef")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}
