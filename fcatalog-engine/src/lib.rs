//! The similarity engine and its on-disk index: signatures, the per-catalog
//! SQLite-backed store, and the registry that opens catalogs by name.

pub mod errors;
pub mod registry;
pub mod signature;
pub mod store;

pub use errors::{RegistryError, StoreError};
pub use registry::CatalogRegistry;
pub use signature::{sign, strong_hash, SIGNATURE_VERSION, STRONG_HASH_LEN};
pub use store::{catalog_path, CatalogStore, DbSimilar, DEFAULT_BATCH};
