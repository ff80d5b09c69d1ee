//! Maps a catalog name to its `CatalogStore`, opening on demand and sharing
//! the result across every session that subsequently chooses the same name.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::errors::RegistryError;
use crate::store::{catalog_path, CatalogStore, DEFAULT_BATCH};

/// Catalog names must match this shape before touching the filesystem: no
/// path separators, no leading dot, bounded length.
fn is_valid_catalog_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

struct State {
    stores: HashMap<String, Arc<CatalogStore>>,
}

/// Shared, process-lifetime registry of open catalogs. Cloning a
/// `CatalogRegistry` is cheap and yields a handle to the same underlying map.
#[derive(Clone)]
pub struct CatalogRegistry {
    root: PathBuf,
    num_hashes: usize,
    batch: u64,
    state: Arc<Mutex<State>>,
}

impl CatalogRegistry {
    pub fn new(root: PathBuf, num_hashes: usize) -> Self {
        Self::with_batch(root, num_hashes, DEFAULT_BATCH)
    }

    pub fn with_batch(root: PathBuf, num_hashes: usize, batch: u64) -> Self {
        Self {
            root,
            num_hashes,
            batch,
            state: Arc::new(Mutex::new(State {
                stores: HashMap::new(),
            })),
        }
    }

    /// Resolves `name` to its store, opening it if this is the first
    /// reference in the process. Concurrent callers asking for the same name
    /// observe the same store.
    pub async fn choose_db(&self, name: &str) -> Result<Arc<CatalogStore>, RegistryError> {
        if !is_valid_catalog_name(name) {
            return Err(RegistryError::InvalidName(name.to_string()));
        }

        let mut state = self.state.lock().await;
        if let Some(store) = state.stores.get(name) {
            return Ok(Arc::clone(store));
        }

        let path = catalog_path(&self.root, name);
        let root = self.root.clone();
        let num_hashes = self.num_hashes;
        let batch = self.batch;
        let name_owned = name.to_string();

        let store = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&root)?;
            CatalogStore::open(&path, num_hashes, batch)
        })
        .await
        .expect("blocking task panicked")?;

        info!(catalog = %name_owned, "opened catalog");
        let store = Arc::new(store);
        state.stores.insert(name_owned, Arc::clone(&store));
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names_are_accepted() {
        for name in ["a", "abc123", "My-Catalog_1", &"x".repeat(64)] {
            assert!(is_valid_catalog_name(name), "{name} should be valid");
        }
    }

    #[test]
    fn invalid_names_are_rejected() {
        for name in ["", "../escape", "with/slash", "with space", &"x".repeat(65)] {
            assert!(!is_valid_catalog_name(name), "{name} should be invalid");
        }
    }

    #[tokio::test]
    async fn choosing_the_same_name_twice_yields_the_same_store() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CatalogRegistry::new(dir.path().to_path_buf(), 16);

        let a = registry.choose_db("shared").await.unwrap();
        let b = registry.choose_db("shared").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn invalid_name_is_rejected_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CatalogRegistry::new(dir.path().to_path_buf(), 16);

        let err = registry.choose_db("../escape").await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidName(_)));
    }
}
