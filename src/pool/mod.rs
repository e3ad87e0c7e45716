//! Store pool — named store roles, transient rentals, and atomic role
//! swaps.
//!
//! A [`StorePool`] owns a base directory and hands out [`QuadStore`]
//! handles by **role name** (`primary`, `secondary`, …). Each role maps
//! to a subdirectory; handles are cached, so repeated `get` calls share
//! one store. Two operations make the pool more than a map:
//!
//! - [`StorePool::switch`] — atomically swaps which stores two roles
//!   point at. Readers holding guards on the old store keep their
//!   snapshot until they release it; only new `get` calls see the swap.
//!   The pruner's commit step is exactly one switch.
//! - [`StorePool::rent`] — borrows a transient store for scratch work
//!   (the SERVICE materializer indexes remote rows this way). Returned
//!   stores are cleared and recycled.
//!
//! The pruner itself lives in [`pruner`].

pub mod pruner;

#[cfg(test)]
mod tests;

pub use pruner::{
    GraphFilter, HistoryMode, PredicateFilter, PruneError, PruneOptions, PruneReport, Pruner,
    QuadFilter,
};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info};

use crate::store::{QuadStore, StoreConfig, StoreError};

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Error originating from a pooled store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A named role does not exist.
    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// A role name is not usable as a directory component.
    #[error("invalid role name: {0}")]
    InvalidRole(String),

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Pool
// ------------------------------------------------------------------------------------------------

struct PoolInner {
    /// role name → (directory name, open handle)
    roles: HashMap<String, (String, QuadStore)>,
    /// Cleared transient stores awaiting re-rental.
    idle_rentals: Vec<(String, QuadStore)>,
    /// Monotonic suffix for fresh directories.
    next_dir: u64,
}

/// A named set of stores under one base directory.
pub struct StorePool {
    base_dir: PathBuf,
    config: StoreConfig,
    inner: Mutex<PoolInner>,
}

impl StorePool {
    /// Creates a pool rooted at `base_dir`. Store directories are
    /// created lazily as roles are first requested.
    pub fn new(base_dir: impl AsRef<Path>, config: StoreConfig) -> Result<Self, PoolError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            config,
            inner: Mutex::new(PoolInner {
                roles: HashMap::new(),
                idle_rentals: Vec::new(),
                next_dir: 1,
            }),
        })
    }

    /// The store for a role, opening (or creating) it on first use.
    pub fn get(&self, role: &str) -> Result<QuadStore, PoolError> {
        Self::validate_role(role)?;
        let mut inner = self.lock()?;
        if let Some((_, store)) = inner.roles.get(role) {
            return Ok(store.clone());
        }
        let dir_name = role.to_string();
        let store = QuadStore::open(self.base_dir.join(&dir_name), self.config.clone())?;
        inner
            .roles
            .insert(role.to_string(), (dir_name, store.clone()));
        debug!(role, "pool role opened");
        Ok(store)
    }

    /// True if the role has been opened.
    pub fn contains(&self, role: &str) -> bool {
        self.lock().map(|i| i.roles.contains_key(role)).unwrap_or(false)
    }

    /// Rents a transient store for scratch work.
    ///
    /// The store is empty on rental. Dropping the [`RentedStore`]
    /// clears it and returns it to the idle list.
    pub fn rent(&self) -> Result<RentedStore<'_>, PoolError> {
        let mut inner = self.lock()?;
        if let Some((dir_name, store)) = inner.idle_rentals.pop() {
            return Ok(RentedStore {
                pool: self,
                dir_name,
                store: Some(store),
            });
        }
        let dir_name = format!(".rent-{:04}", inner.next_dir);
        inner.next_dir += 1;
        drop(inner);
        let store = QuadStore::open(self.base_dir.join(&dir_name), self.config.clone())?;
        Ok(RentedStore {
            pool: self,
            dir_name,
            store: Some(store),
        })
    }

    /// Wipes a role's data, leaving an empty store in its place.
    ///
    /// Existing handles keep reading their old snapshot (the files are
    /// unlinked, not overwritten); new `get` calls see the empty store.
    pub fn clear(&self, role: &str) -> Result<(), PoolError> {
        let mut inner = self.lock()?;
        let (dir_name, store) = inner
            .roles
            .remove(role)
            .ok_or_else(|| PoolError::UnknownRole(role.to_string()))?;
        store.close()?;
        drop(store);
        let dir = self.base_dir.join(&dir_name);
        if dir.is_dir() {
            fs::remove_dir_all(&dir)?;
        }
        let fresh = QuadStore::open(&dir, self.config.clone())?;
        inner.roles.insert(role.to_string(), (dir_name, fresh));
        info!(role, "pool role cleared");
        Ok(())
    }

    /// Atomically swaps which stores two roles point at.
    ///
    /// Readers that already hold a handle or guard keep their old
    /// snapshot; the swap is only visible to subsequent `get` calls.
    pub fn switch(&self, a: &str, b: &str) -> Result<(), PoolError> {
        let mut inner = self.lock()?;
        if !inner.roles.contains_key(a) {
            return Err(PoolError::UnknownRole(a.to_string()));
        }
        if !inner.roles.contains_key(b) {
            return Err(PoolError::UnknownRole(b.to_string()));
        }
        let entry_a = inner
            .roles
            .remove(a)
            .ok_or_else(|| PoolError::Internal("role vanished during switch".into()))?;
        let entry_b = inner
            .roles
            .remove(b)
            .ok_or_else(|| PoolError::Internal("role vanished during switch".into()))?;
        inner.roles.insert(a.to_string(), entry_b);
        inner.roles.insert(b.to_string(), entry_a);
        info!(a, b, "pool roles switched");
        Ok(())
    }

    /// The configuration every pooled store opens with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PoolInner>, PoolError> {
        self.inner
            .lock()
            .map_err(|_| PoolError::Internal("pool mutex poisoned".into()))
    }

    fn validate_role(role: &str) -> Result<(), PoolError> {
        let ok = !role.is_empty()
            && !role.starts_with('.')
            && role
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if ok {
            Ok(())
        } else {
            Err(PoolError::InvalidRole(role.to_string()))
        }
    }

    fn give_back(&self, dir_name: String, store: QuadStore) {
        // Clear by deleting and reopening; failures just drop the
        // rental instead of recycling it.
        let dir = self.base_dir.join(&dir_name);
        let recycled = store
            .close()
            .and_then(|_| {
                fs::remove_dir_all(&dir)?;
                QuadStore::open(&dir, self.config.clone())
            })
            .ok();
        if let Some(fresh) = recycled
            && let Ok(mut inner) = self.inner.lock()
        {
            inner.idle_rentals.push((dir_name, fresh));
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Rented store
// ------------------------------------------------------------------------------------------------

/// A transient store borrowed from the pool.
///
/// Dereferences to [`QuadStore`]. On drop the store is cleared and
/// recycled.
pub struct RentedStore<'a> {
    pool: &'a StorePool,
    dir_name: String,
    store: Option<QuadStore>,
}

impl std::ops::Deref for RentedStore<'_> {
    type Target = QuadStore;

    fn deref(&self) -> &QuadStore {
        // Present from construction until drop.
        self.store.as_ref().unwrap_or_else(|| unreachable!("rented store taken"))
    }
}

impl Drop for RentedStore<'_> {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            self.pool.give_back(std::mem::take(&mut self.dir_name), store);
        }
    }
}
