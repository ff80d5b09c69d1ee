use thiserror::Error;

/// Errors from a single `CatalogStore` operation or its opening.
///
/// Variants split along a storage-vs-validation-vs-fatal taxonomy: callers
/// (the session layer) match on the variant rather than inspecting messages
/// to decide whether a failure is session-fatal or just drops one record.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("function name must not be empty")]
    EmptyFuncName,

    #[error("structure name must not be empty")]
    EmptyStructName,

    #[error("structure name must be ASCII")]
    NonAsciiStructName,

    #[error(
        "catalog was created with {found} signature components, this process is configured for {expected}"
    )]
    NumHashesMismatch { expected: usize, found: usize },

    #[error(
        "catalog's signature version is {found}, this process implements version {expected}"
    )]
    SignatureVersionMismatch { expected: u32, found: u32 },

    #[error("catalog metadata row '{0}' is missing or malformed")]
    CorruptMeta(&'static str),
}

impl StoreError {
    /// True for failures that should fault the whole catalog rather than
    /// just drop the one offending operation (a fatal system error).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::NumHashesMismatch { .. }
                | StoreError::SignatureVersionMismatch { .. }
                | StoreError::CorruptMeta(_)
                | StoreError::Io(_)
        )
    }
}

/// Errors from resolving a catalog name to a store.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("catalog name '{0}' is invalid: must match [A-Za-z0-9_-]{{1,64}}")]
    InvalidName(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
