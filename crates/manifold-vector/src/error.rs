use thiserror::Error;

/// Vector index errors
#[derive(Debug, Error)]
pub enum VectorError {
    /// The embedder could not be reached or rejected the request
    ///
    /// Surfaces to smart-scope callers as `embedder_unavailable`; the hub
    /// does not fall back to lexical search.
    #[error("embedder unavailable: {0}")]
    Embedder(String),

    /// The backing store failed
    #[error("vector store error: {0}")]
    Store(String),
}
