use thiserror::Error;

/// Fatal errors that propagate to the process entry point (a "fatal
/// system error"): anything that stops the server from starting at all.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind listen address: {0}")]
    Bind(#[source] std::io::Error),

    #[error("catalog root directory is not usable: {0}")]
    CatalogDir(#[source] std::io::Error),

    #[error("accept loop stopped: {0}")]
    Accept(#[source] std::io::Error),
}
