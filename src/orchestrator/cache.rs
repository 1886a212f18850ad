use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tokio::time::Instant;

use crate::error::ResolveError;
use crate::models::{PriceRequest, PriceSeries};

pub type Resolution = Result<Arc<PriceSeries>, ResolveError>;

/// Time-bounded cache of complete series, keyed by request
pub struct SeriesCache {
    entries: RwLock<HashMap<PriceRequest, (Arc<PriceSeries>, Instant)>>,
    ttl: Duration,
}

impl SeriesCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Cached series if present and not older than the TTL
    pub async fn get(&self, request: &PriceRequest) -> Option<Arc<PriceSeries>> {
        let entries = self.entries.read().await;
        entries
            .get(request)
            .filter(|(_, stored_at)| stored_at.elapsed() < self.ttl)
            .map(|(series, _)| Arc::clone(series))
    }

    /// Store a series, replacing any expired entry for the key
    pub async fn insert(&self, request: PriceRequest, series: Arc<PriceSeries>) {
        let mut entries = self.entries.write().await;
        entries.insert(request, (series, Instant::now()));
        let ttl = self.ttl;
        entries.retain(|_, (_, stored_at)| stored_at.elapsed() < ttl);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

/// Resolutions currently running, shared by every caller asking for the same key
#[derive(Default)]
pub struct InFlight {
    pending: Mutex<HashMap<PriceRequest, Arc<OnceCell<Resolution>>>>,
}

impl InFlight {
    /// Join the running resolution for `request` or register a new one
    pub async fn join(&self, request: &PriceRequest) -> Arc<OnceCell<Resolution>> {
        let mut pending = self.pending.lock().await;
        if let Some(cell) = pending.get(request) {
            tracing::debug!("Coalescing with in-flight resolution of {}", request);
            return Arc::clone(cell);
        }
        let cell = Arc::new(OnceCell::new());
        pending.insert(request.clone(), Arc::clone(&cell));
        cell
    }

    /// Forget a finished resolution, unless a newer one took its place
    pub async fn finish(&self, request: &PriceRequest, cell: &Arc<OnceCell<Resolution>>) {
        let mut pending = self.pending.lock().await;
        if pending.get(request).is_some_and(|c| Arc::ptr_eq(c, cell)) {
            pending.remove(request);
        }
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn clear(&self) {
        self.pending.lock().await.clear();
    }
}
