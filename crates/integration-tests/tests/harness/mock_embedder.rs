//! Mock embeddings API with deterministic keyword vectors

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

#[derive(Default)]
struct Counters {
    requests: AtomicUsize,
    texts: AtomicUsize,
}

/// OpenAI-wire embeddings server on a random port
pub struct MockEmbedder {
    addr: SocketAddr,
    counters: Arc<Counters>,
}

impl MockEmbedder {
    pub async fn start() -> anyhow::Result<Self> {
        let counters = Arc::new(Counters::default());

        let app = Router::new()
            .route("/embeddings", post(embed))
            .with_state(Arc::clone(&counters));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self { addr, counters })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// HTTP requests served
    pub fn request_count(&self) -> usize {
        self.counters.requests.load(Ordering::SeqCst)
    }

    /// Individual texts embedded across all requests
    pub fn embedded_count(&self) -> usize {
        self.counters.texts.load(Ordering::SeqCst)
    }
}

async fn embed(State(counters): State<Arc<Counters>>, Json(body): Json<Value>) -> Json<Value> {
    counters.requests.fetch_add(1, Ordering::SeqCst);

    let inputs: Vec<String> = body["input"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();
    counters.texts.fetch_add(inputs.len(), Ordering::SeqCst);

    let data: Vec<Value> = inputs
        .iter()
        .enumerate()
        .map(|(index, text)| json!({ "embedding": vector_for(text), "index": index }))
        .collect();

    Json(json!({
        "object": "list",
        "data": data,
        "model": body["model"],
        "usage": { "prompt_tokens": 0, "total_tokens": 0 },
    }))
}

/// Map keywords onto unit basis vectors so similarities are predictable
fn vector_for(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v = vec![0.0f32; 4];
    if lower.contains("weather") || lower.contains("forecast") {
        v[0] = 1.0;
    }
    if lower.contains("email") || lower.contains("mail") {
        v[1] = 1.0;
    }
    if lower.contains("note") {
        v[2] = 1.0;
    }
    if v.iter().all(|x| *x == 0.0) {
        v[3] = 1.0;
    }
    v
}
