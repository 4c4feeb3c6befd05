#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

//! Upstream MCP connections and their supervision
//!
//! Four transport families share one [`UpstreamClient`] contract: stdio
//! child processes, SSE streams, and streamable HTTP ride the rmcp client,
//! while the OpenAPI adapter synthesizes tools from an API description. One
//! supervisor task per upstream drives the
//! disconnected → connecting → ready → degraded → closed lifecycle with
//! exponential backoff and keep-alive probing.

pub mod backoff;
mod client;
mod error;
mod openapi;
mod rmcp_client;
mod supervisor;

pub use client::{Connect, Connector, ServerIdentity, ToolDef, UpstreamClient, UpstreamEvent};
pub use error::UpstreamError;
pub use openapi::OpenApiClient;
pub use supervisor::{UpstreamSet, UpstreamState, UpstreamStatus};
