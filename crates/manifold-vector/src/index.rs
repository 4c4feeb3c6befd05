use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use manifold_catalog::{CatalogSnapshot, ToolKey};
use tokio::sync::{Mutex, RwLock};

use crate::embedder::Embedder;
use crate::error::VectorError;
use crate::store::{digest, EmbeddingRow, VectorStore};

/// One similarity-search result
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub key: ToolKey,
    pub text: String,
    /// Cosine similarity in [−1, 1], computed in double precision
    pub similarity: f64,
}

/// Embedding index over the enabled tool catalog
///
/// Rows are gated by text digest, so re-upserting unchanged content costs
/// no embedder calls. The first stored vector fixes the dimensionality; a
/// mismatch (typically a model switch) rebuilds the index from scratch.
pub struct VectorIndex {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    rows: RwLock<HashMap<ToolKey, EmbeddingRow>>,
    dim: Mutex<Option<usize>>,
    /// Rows whose embedding failed; retried on the next reconcile pass
    pending: Mutex<BTreeMap<ToolKey, String>>,
}

impl VectorIndex {
    /// Load the persisted rows and fix the dimensionality
    pub async fn open(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self, VectorError> {
        let mut loaded = store.load().await?;
        loaded.sort_by(|a, b| a.key().cmp(&b.key()));

        let dim = loaded.first().map(|r| r.vector.len());

        // Rows from an older dimensionality are dropped here and re-embedded
        // by the next reconcile pass.
        let mut mismatched = Vec::new();
        let rows: HashMap<ToolKey, EmbeddingRow> = loaded
            .into_iter()
            .filter_map(|row| {
                if Some(row.vector.len()) == dim {
                    Some((row.key(), row))
                } else {
                    mismatched.push(row.key());
                    None
                }
            })
            .collect();

        if !mismatched.is_empty() {
            tracing::warn!(count = mismatched.len(), "dropping mismatched-dimension rows");
            store.delete(&mismatched).await?;
        }

        tracing::info!(rows = rows.len(), dim = dim.unwrap_or(0), "vector index loaded");

        Ok(Self {
            embedder,
            store,
            rows: RwLock::new(rows),
            dim: Mutex::new(dim),
            pending: Mutex::new(BTreeMap::new()),
        })
    }

    /// Number of indexed rows
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Upsert `(key, text)` pairs, embedding only rows whose text changed
    ///
    /// Returns how many embeddings were computed. On embedder failure the
    /// stale rows stay intact and the batch is queued for retry.
    pub async fn upsert_many(
        &self,
        entries: Vec<(ToolKey, String)>,
    ) -> Result<usize, VectorError> {
        let changed: Vec<(ToolKey, String)> = {
            let rows = self.rows.read().await;
            entries
                .into_iter()
                .filter(|(key, text)| {
                    rows.get(key).is_none_or(|row| row.digest != digest(text))
                })
                .collect()
        };

        if changed.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = changed.iter().map(|(_, text)| text.clone()).collect();
        let vectors = match self.embedder.embed(&texts).await {
            Ok(vectors) => vectors,
            Err(e) => {
                let mut pending = self.pending.lock().await;
                for (key, text) in changed {
                    pending.insert(key, text);
                }
                return Err(e);
            }
        };

        if vectors.len() != changed.len() {
            return Err(VectorError::Embedder(format!(
                "expected {} vectors, got {}",
                changed.len(),
                vectors.len()
            )));
        }

        let new_rows: Vec<EmbeddingRow> = changed
            .into_iter()
            .zip(vectors)
            .map(|((key, text), vector)| EmbeddingRow::new(&key, text, vector))
            .collect();

        if let Some(first) = new_rows.first() {
            self.admit_dimension(first.vector.len()).await?;
        }

        self.store.upsert(&new_rows).await?;

        let count = new_rows.len();
        let mut rows = self.rows.write().await;
        let mut pending = self.pending.lock().await;
        for row in new_rows {
            pending.remove(&row.key());
            rows.insert(row.key(), row);
        }

        tracing::debug!(embedded = count, "vector index upsert complete");
        Ok(count)
    }

    /// Fix the dimensionality on first write; rebuild on mismatch
    async fn admit_dimension(&self, new_dim: usize) -> Result<(), VectorError> {
        let mut dim = self.dim.lock().await;
        match *dim {
            None => {
                *dim = Some(new_dim);
                Ok(())
            }
            Some(existing) if existing == new_dim => Ok(()),
            Some(existing) => {
                tracing::warn!(existing, new_dim, "embedding dimensionality changed, rebuilding index");
                self.rows.write().await.clear();
                self.store.clear().await?;
                *dim = Some(new_dim);
                Ok(())
            }
        }
    }

    /// Drop every row not present in the keep set
    pub async fn retain(&self, keep: &HashSet<ToolKey>) -> Result<(), VectorError> {
        let stale: Vec<ToolKey> = {
            let rows = self.rows.read().await;
            rows.keys().filter(|k| !keep.contains(k)).cloned().collect()
        };
        if stale.is_empty() {
            return Ok(());
        }

        self.store.delete(&stale).await?;
        let mut rows = self.rows.write().await;
        let mut pending = self.pending.lock().await;
        for key in &stale {
            rows.remove(key);
            pending.remove(key);
        }
        Ok(())
    }

    /// Delete one row
    pub async fn delete_by_key(&self, key: &ToolKey) -> Result<(), VectorError> {
        self.store.delete(std::slice::from_ref(key)).await?;
        self.rows.write().await.remove(key);
        self.pending.lock().await.remove(key);
        Ok(())
    }

    /// Delete every row belonging to an upstream
    pub async fn delete_by_upstream(&self, upstream: &str) -> Result<(), VectorError> {
        let keys: Vec<ToolKey> = {
            let rows = self.rows.read().await;
            rows.keys()
                .filter(|k| k.upstream == upstream)
                .cloned()
                .collect()
        };
        if keys.is_empty() {
            return Ok(());
        }

        self.store.delete(&keys).await?;
        let mut rows = self.rows.write().await;
        let mut pending = self.pending.lock().await;
        for key in &keys {
            rows.remove(key);
            pending.remove(key);
        }
        Ok(())
    }

    /// Retry rows whose embedding previously failed
    pub async fn retry_pending(&self) {
        let batch: Vec<(ToolKey, String)> = {
            let pending = self.pending.lock().await;
            pending.iter().map(|(k, t)| (k.clone(), t.clone())).collect()
        };
        if batch.is_empty() {
            return;
        }
        if let Err(e) = self.upsert_many(batch).await {
            tracing::warn!(error = %e, "embedding retry failed");
        }
    }

    /// k-nearest search above a similarity threshold
    ///
    /// Slightly stale rows are tolerated, but a key absent from (or disabled
    /// in) the given catalog snapshot is never returned. Equal similarities
    /// tie-break by `(upstream, tool)` ascending.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        threshold: f64,
        catalog: &CatalogSnapshot,
    ) -> Result<Vec<SearchHit>, VectorError> {
        let query_vector = self
            .embedder
            .embed(std::slice::from_ref(&query.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| VectorError::Embedder("empty embedding response".to_string()))?;

        let rows = self.rows.read().await;
        let mut hits: Vec<SearchHit> = rows
            .values()
            .filter(|row| catalog.contains_enabled(&row.upstream, &row.tool))
            .map(|row| SearchHit {
                key: row.key(),
                text: row.text.clone(),
                similarity: cosine(&query_vector, &row.vector),
            })
            .filter(|hit| hit.similarity >= threshold)
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });
        hits.truncate(k);

        Ok(hits)
    }
}

/// Cosine similarity in double precision; zero vectors score 0
fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
