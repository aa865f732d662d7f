//! Host-owned lifecycle for per-user stores.
//!
//! Stores are acquired on request and cached in an LRU; when a user is
//! evicted (or released) the last `Arc` going out of scope closes their
//! file handles. The host decides capacity and when to release; there is
//! no process-wide registry behind the caller's back.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::DossierError;
use crate::store::Store;
use crate::vec::Embedder;

pub struct StoreManager {
    root: PathBuf,
    embedder: Option<Arc<dyn Embedder>>,
    stores: Mutex<LruCache<String, Arc<Store>>>,
}

impl StoreManager {
    /// `capacity` bounds how many users' stores stay open at once.
    pub fn new(
        root: impl Into<PathBuf>,
        embedder: Option<Arc<dyn Embedder>>,
        capacity: usize,
    ) -> Self {
        Self {
            root: root.into(),
            embedder,
            stores: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(16).unwrap()),
            )),
        }
    }

    /// Get the store for `user_id`, opening it on first access. Each user's
    /// data lives under `<root>/<user_id>/`.
    pub fn acquire(&self, user_id: &str) -> Result<Arc<Store>, DossierError> {
        validate_user_id(user_id)?;
        let mut stores = self.stores.lock();
        if let Some(store) = stores.get(user_id) {
            return Ok(Arc::clone(store));
        }
        let store = Arc::new(Store::open(
            self.root.join(user_id),
            self.embedder.clone(),
        )?);
        if let Some((evicted, _)) = stores.push(user_id.to_string(), Arc::clone(&store)) {
            if evicted != user_id {
                debug!(user = %evicted, "evicted idle store");
            }
        }
        Ok(store)
    }

    /// Drop the cached handle for a user (e.g. on session end). Returns
    /// whether a store was open.
    pub fn release(&self, user_id: &str) -> bool {
        self.stores.lock().pop(user_id).is_some()
    }

    pub fn open_count(&self) -> usize {
        self.stores.lock().len()
    }
}

/// User ids become directory names; keep them boring.
fn validate_user_id(id: &str) -> Result<(), DossierError> {
    let ok_len = !id.is_empty() && id.len() <= 128;
    let ok_chars = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !ok_len || !ok_chars || id.starts_with('.') {
        return Err(DossierError::Validation(format!(
            "invalid user id '{id}': use 1-128 ascii letters, digits, '-', '_' or '.'"
        )));
    }
    Ok(())
}
