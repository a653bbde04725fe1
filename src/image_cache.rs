//! Bounded async image cache for tile artwork.
//!
//! DESIGN
//! ======
//! Decoded images live in a 64-entry LRU keyed by cache key. Misses are
//! queued to a small fixed pool of worker tasks over a bounded channel, so
//! image downloads never run on the caller's task. Each key has at most one
//! fetch in flight; later requests for the same key attach their callback to
//! the outstanding fetch.
//!
//! ERROR HANDLING
//! ==============
//! A failed download or decode is abandoned silently: no callback, no entry,
//! no retry. The next snapshot that still references the key asks again.
//!
//! SHUTDOWN
//! ========
//! Completions hold the `gate` read lock while they write the cache and run
//! callbacks; `shutdown` takes the write lock. Once `shutdown` returns, no
//! callback runs and nothing is written. Callbacks must not call back into
//! the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::ImageFetcher;
use crate::config::ImagePoolConfig;
use crate::lru::LruCache;

pub const IMAGE_CACHE_CAPACITY: usize = 64;

/// Decoded tile image.
pub type TileImage = image::DynamicImage;

type ImageCallback = Box<dyn FnOnce(Arc<TileImage>) + Send + 'static>;

struct FetchJob {
    key: String,
    url: String,
}

struct CacheState {
    entries: LruCache<String, Arc<TileImage>>,
    /// Keys with a fetch outstanding, and the callbacks waiting on it.
    in_flight: HashMap<String, Vec<ImageCallback>>,
}

struct Shared {
    state: Mutex<CacheState>,
    /// `true` once shut down.
    gate: RwLock<bool>,
    jobs: Mutex<Option<mpsc::Sender<FetchJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Process-wide image cache. Cheap to clone; clones share one cache.
#[derive(Clone)]
pub struct ImageCache {
    shared: Arc<Shared>,
}

impl ImageCache {
    /// Create the cache and spawn its worker pool on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new(fetcher: Arc<dyn ImageFetcher>, config: ImagePoolConfig) -> Self {
        let workers = config.workers.max(1);
        let (tx, rx) = mpsc::channel::<FetchJob>(config.queue_capacity.max(1));
        let shared = Arc::new(Shared {
            state: Mutex::new(CacheState {
                entries: LruCache::new(IMAGE_CACHE_CAPACITY),
                in_flight: HashMap::new(),
            }),
            gate: RwLock::new(false),
            jobs: Mutex::new(Some(tx)),
            workers: Mutex::new(Vec::with_capacity(workers)),
        });

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let handles = (0..workers)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let fetcher = Arc::clone(&fetcher);
                let shared = Arc::downgrade(&shared);
                tokio::spawn(run_worker(worker, rx, fetcher, shared))
            })
            .collect::<Vec<_>>();
        lock(&shared.workers).extend(handles);

        info!(workers, queue_capacity = config.queue_capacity, "image cache started");
        Self { shared }
    }

    /// Cached image for `key`, marking it most recently used.
    #[must_use]
    pub fn get_if_present(&self, key: &str) -> Option<Arc<TileImage>> {
        lock(&self.shared.state).entries.get(&key.to_string()).cloned()
    }

    /// Resolve `key` and hand the image to `callback`.
    ///
    /// Blank `key` or `url` is a no-op. A cached image is delivered before
    /// this returns; otherwise the callback runs on a worker task once the
    /// download succeeds, or never if it fails.
    pub fn fetch_async<F>(&self, key: &str, url: &str, callback: F)
    where
        F: FnOnce(Arc<TileImage>) + Send + 'static,
    {
        let key = key.trim();
        let url = url.trim();
        if key.is_empty() || url.is_empty() {
            return;
        }

        let closed = read_gate(&self.shared.gate);
        if *closed {
            return;
        }

        let mut state = lock(&self.shared.state);
        if let Some(image) = state.entries.get(&key.to_string()).cloned() {
            drop(state);
            callback(image);
            return;
        }
        if let Some(waiters) = state.in_flight.get_mut(key) {
            debug!(key, "image fetch already in flight; attaching callback");
            waiters.push(Box::new(callback));
            return;
        }
        state.in_flight.insert(key.to_string(), vec![Box::new(callback)]);
        drop(state);

        if !self.enqueue(FetchJob { key: key.to_string(), url: url.to_string() }) {
            lock(&self.shared.state).in_flight.remove(key);
        }
    }

    /// Stop the worker pool and drop every pending callback. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut closed = self.shared.gate.write().unwrap_or_else(PoisonError::into_inner);
            if *closed {
                return;
            }
            *closed = true;
        }
        lock(&self.shared.jobs).take();
        for handle in lock(&self.shared.workers).drain(..) {
            handle.abort();
        }
        let abandoned = {
            let mut state = lock(&self.shared.state);
            let count = state.in_flight.len();
            state.in_flight.clear();
            count
        };
        info!(abandoned, "image cache shut down");
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.shared.state).entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a fetch for `key` is outstanding.
    #[must_use]
    pub fn is_in_flight(&self, key: &str) -> bool {
        lock(&self.shared.state).in_flight.contains_key(key)
    }

    fn enqueue(&self, job: FetchJob) -> bool {
        let jobs = lock(&self.shared.jobs);
        let Some(tx) = jobs.as_ref() else {
            return false;
        };
        match tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                warn!(key = %job.key, "image fetch queue full; dropping request");
                false
            }
            Err(TrySendError::Closed(job)) => {
                warn!(key = %job.key, "image fetch queue closed; dropping request");
                false
            }
        }
    }
}

impl Shared {
    /// Record a finished fetch and deliver it to every waiter.
    fn complete(&self, key: &str, image: Option<TileImage>) {
        let closed = read_gate(&self.gate);
        if *closed {
            return;
        }

        let (image, waiters) = {
            let mut state = lock(&self.state);
            let waiters = state.in_flight.remove(key).unwrap_or_default();
            let Some(image) = image else {
                return;
            };
            let image = Arc::new(image);
            if let Some((evicted, _)) = state.entries.insert(key.to_string(), Arc::clone(&image)) {
                debug!(key = %evicted, "evicted least recently used image");
            }
            (image, waiters)
        };

        for callback in waiters {
            callback(Arc::clone(&image));
        }
    }
}

async fn run_worker(
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<FetchJob>>>,
    fetcher: Arc<dyn ImageFetcher>,
    shared: Weak<Shared>,
) {
    loop {
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };

        let image = match fetcher.fetch_image(&job.url).await {
            Ok(bytes) => decode(bytes).await,
            Err(e) => {
                debug!(worker, key = %job.key, error = %e, "image download failed");
                None
            }
        };
        if image.is_none() {
            debug!(worker, key = %job.key, "image fetch abandoned");
        }

        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.complete(&job.key, image);
    }
    debug!(worker, "image worker exiting");
}

async fn decode(bytes: Vec<u8>) -> Option<TileImage> {
    match tokio::task::spawn_blocking(move || image::load_from_memory(&bytes)).await {
        Ok(Ok(image)) => Some(image),
        Ok(Err(e)) => {
            debug!(error = %e, "image decode failed");
            None
        }
        Err(e) => {
            debug!(error = %e, "image decode task failed");
            None
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_gate(gate: &RwLock<bool>) -> std::sync::RwLockReadGuard<'_, bool> {
    gate.read().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "image_cache_test.rs"]
mod tests;
