//! # agentgraph-checkpoint — execution state persistence
//!
//! The [`Checkpointer`] trait is the storage abstraction a compiled graph
//! saves snapshots through — on an explicit `checkpoint` signal from a node,
//! or automatically after every step when `autoCheckpoint` is enabled. A
//! checkpoint is a plain JSON state snapshot labelled within its execution;
//! this crate has no dependency on `agentgraph-core` (the dependency runs
//! the other way), so it never sees a typed `State`, only the `Value` a
//! caller hands it.
//!
//! Four implementations:
//!
//! - [`memory::InMemoryCheckpointer`] — process-lifetime only, for tests and
//!   short-lived local runs.
//! - [`file::FileCheckpointer`] — one directory per execution, one JSON file
//!   per label, sanitized filenames.
//! - [`markdown::MarkdownCheckpointer`] — a human-readable `key: value`
//!   header followed by a `---` separator and a JSON body, meant to be
//!   skimmed directly.
//! - [`sequential::SessionSequentialCheckpointer`] — `node-NNN.json` files in
//!   save order, with the counter resumed from whatever's already on disk.

pub mod error;
pub mod file;
pub mod markdown;
pub mod memory;
pub mod sequential;
pub mod traits;

pub use error::{CheckpointError, Result};
pub use file::FileCheckpointer;
pub use markdown::MarkdownCheckpointer;
pub use memory::InMemoryCheckpointer;
pub use sequential::SessionSequentialCheckpointer;
pub use traits::{CheckpointRecord, Checkpointer};
