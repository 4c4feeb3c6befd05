#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

//! Persistent embedding store and similarity search for tool discovery
//!
//! One vector per enabled catalog tool. Rows are keyed by
//! `(upstream, tool)`, re-embedded only when their text digest changes, and
//! searched by cosine similarity in double precision. A reconciler task
//! keeps the index in lockstep with catalog versions.

mod embedder;
mod error;
mod index;
mod reconcile;
mod store;

pub use embedder::{Embedder, HttpEmbedder};
pub use error::VectorError;
pub use index::{SearchHit, VectorIndex};
pub use reconcile::spawn_reconciler;
pub use store::{digest, EmbeddingRow, JsonFileStore, MemoryStore, VectorStore};
