#![warn(missing_docs)]
//! SPDB Ingest Engine
//!
//! # What does it do?
//!
//! Records keyed by an integer primary key are buffered in an in-memory B-Tree. When the raw
//! size of the buffered input exceeds a configured memory budget, the tree is drained in
//! ascending key order into two immutable segment files on disk and ingestion starts again
//! with an empty tree.
//!
//! # Implementation Details
//!
//! The in-memory index is a classic B-Tree (not a B+Tree) with a user specified minimum
//! degree `t`. Every node, internal or leaf, holds complete items, so an upsert replaces a
//! matching key wherever it is first encountered on the way down.
//!
//! (If you aren't sure what that means, you can read more about B-Trees here: <https://en.wikipedia.org/wiki/B-tree>.)
//!
//! A flush writes the smallest keys into a "lower" segment until half the budget worth of
//! bytes has been written, then everything else into an "upper" segment. Each segment is
//! named after the inclusive key range it holds: `{min}_{max}.spdb`.
//!
//! Segment files have no header, footer or index. They are a plain concatenation of
//! length-prefixed records, see [`codec`] for the record layout.
//!
//! Note: The order of fields within a record is whatever order the row's map yields. It is
//! not stable across encodes and consumers must not rely on it.
//!

pub mod btree;
pub mod codec;
pub mod config;
pub mod ingest;
pub mod input;
pub mod io;
pub mod record;

// Re-export
pub use crate::btree::Index;
pub use crate::config::IngestConfig;
pub use crate::ingest::Ingestor;
pub use crate::record::{Item, Row, Value};
