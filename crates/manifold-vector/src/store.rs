use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use manifold_catalog::ToolKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::VectorError;

/// One persisted embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRow {
    pub upstream: String,
    pub tool: String,
    /// The embedded text (name + description + formatted schema)
    pub text: String,
    /// sha256 of `text`, the re-embedding gate
    pub digest: String,
    pub vector: Vec<f32>,
    /// Unix seconds of the last write
    pub updated_at: u64,
}

impl EmbeddingRow {
    pub fn key(&self) -> ToolKey {
        ToolKey::new(self.upstream.clone(), self.tool.clone())
    }

    pub fn new(key: &ToolKey, text: String, vector: Vec<f32>) -> Self {
        Self {
            upstream: key.upstream.clone(),
            tool: key.tool.clone(),
            digest: digest(&text),
            text,
            vector,
            updated_at: now_secs(),
        }
    }
}

/// Content digest used to decide whether a row needs re-embedding
pub fn digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Persistence driver for embedding rows
///
/// The index holds the working set in memory; the store only has to survive
/// restarts. Implementations provide per-row atomicity, nothing stronger.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn load(&self) -> Result<Vec<EmbeddingRow>, VectorError>;
    async fn upsert(&self, rows: &[EmbeddingRow]) -> Result<(), VectorError>;
    async fn delete(&self, keys: &[ToolKey]) -> Result<(), VectorError>;
    async fn clear(&self) -> Result<(), VectorError>;
}

/// Volatile store for tests and smart-routing without persistence
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<ToolKey, EmbeddingRow>>,
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn load(&self) -> Result<Vec<EmbeddingRow>, VectorError> {
        Ok(self.rows.lock().await.values().cloned().collect())
    }

    async fn upsert(&self, rows: &[EmbeddingRow]) -> Result<(), VectorError> {
        let mut guard = self.rows.lock().await;
        for row in rows {
            guard.insert(row.key(), row.clone());
        }
        Ok(())
    }

    async fn delete(&self, keys: &[ToolKey]) -> Result<(), VectorError> {
        let mut guard = self.rows.lock().await;
        for key in keys {
            guard.remove(key);
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), VectorError> {
        self.rows.lock().await.clear();
        Ok(())
    }
}

/// JSON-lines file store, one row per line
///
/// The whole file is rewritten on each mutation; tool catalogs are small
/// enough that this stays cheap, and a torn write can lose at most the
/// latest batch, which the reconciler re-embeds.
pub struct JsonFileStore {
    path: PathBuf,
    rows: Mutex<HashMap<ToolKey, EmbeddingRow>>,
}

impl JsonFileStore {
    /// Open the store, reading any existing rows
    pub async fn open(path: PathBuf) -> Result<Self, VectorError> {
        let mut rows = HashMap::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                for (lineno, line) in contents.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<EmbeddingRow>(line) {
                        Ok(row) => {
                            rows.insert(row.key(), row);
                        }
                        Err(e) => {
                            tracing::warn!(
                                path = %path.display(),
                                line = lineno + 1,
                                error = %e,
                                "skipping unreadable embedding row"
                            );
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(VectorError::Store(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        }

        Ok(Self {
            path,
            rows: Mutex::new(rows),
        })
    }

    async fn flush(&self, rows: &HashMap<ToolKey, EmbeddingRow>) -> Result<(), VectorError> {
        let mut ordered: Vec<&EmbeddingRow> = rows.values().collect();
        ordered.sort_by(|a, b| a.key().cmp(&b.key()));

        let mut contents = String::new();
        for row in ordered {
            let line = serde_json::to_string(row)
                .map_err(|e| VectorError::Store(format!("unserializable row: {e}")))?;
            contents.push_str(&line);
            contents.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VectorError::Store(format!("failed to create {}: {e}", parent.display())))?;
        }

        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|e| VectorError::Store(format!("failed to write {}: {e}", self.path.display())))
    }
}

#[async_trait]
impl VectorStore for JsonFileStore {
    async fn load(&self) -> Result<Vec<EmbeddingRow>, VectorError> {
        Ok(self.rows.lock().await.values().cloned().collect())
    }

    async fn upsert(&self, rows: &[EmbeddingRow]) -> Result<(), VectorError> {
        let mut guard = self.rows.lock().await;
        for row in rows {
            guard.insert(row.key(), row.clone());
        }
        self.flush(&guard).await
    }

    async fn delete(&self, keys: &[ToolKey]) -> Result<(), VectorError> {
        let mut guard = self.rows.lock().await;
        for key in keys {
            guard.remove(key);
        }
        self.flush(&guard).await
    }

    async fn clear(&self) -> Result<(), VectorError> {
        let mut guard = self.rows.lock().await;
        guard.clear();
        self.flush(&guard).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(upstream: &str, tool: &str, text: &str) -> EmbeddingRow {
        EmbeddingRow::new(&ToolKey::new(upstream, tool), text.to_string(), vec![1.0, 0.0])
    }

    #[test]
    fn digest_is_stable_and_content_sensitive() {
        assert_eq!(digest("abc"), digest("abc"));
        assert_ne!(digest("abc"), digest("abd"));
    }

    #[tokio::test]
    async fn file_store_round_trips() {
        let dir = std::env::temp_dir().join(format!("manifold-vector-{}", std::process::id()));
        let path = dir.join("embeddings.jsonl");
        let _ = tokio::fs::remove_file(&path).await;

        let store = JsonFileStore::open(path.clone()).await.unwrap();
        store
            .upsert(&[row("a", "weather", "forecast"), row("b", "mail", "send email")])
            .await
            .unwrap();
        store.delete(&[ToolKey::new("b", "mail")]).await.unwrap();

        let reopened = JsonFileStore::open(path.clone()).await.unwrap();
        let rows = reopened.load().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key(), ToolKey::new("a", "weather"));

        let _ = tokio::fs::remove_file(&path).await;
    }
}
