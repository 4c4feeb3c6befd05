#![allow(clippy::must_use_candidate)]

//! In-memory projection of every upstream's effective tool set
//!
//! A single reconciliation task owns the catalog; upstream supervisors push
//! their overlaid tool lists through a [`CatalogWriter`] and everyone else
//! consumes immutable [`CatalogSnapshot`]s via a [`CatalogReader`]. The
//! snapshot version is strictly monotonic and bumps only on set-level
//! change.

mod snapshot;
mod task;

pub use snapshot::{CatalogSnapshot, EffectiveTool, ToolKey};
pub use task::{spawn, CatalogChange, CatalogDiff, CatalogReader, CatalogWriter};
