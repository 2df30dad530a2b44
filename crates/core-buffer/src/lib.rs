//! Buffer engine: the document directory, live marks, and transactional
//! undo/redo.
//!
//! The store owns every buffer and composes the subsystems into atomic,
//! observable edits:
//! - `store` — directory and lifecycle (alloc/find/rename/free), viewer
//!   refcounts, the edit operations, and undo traversal.
//! - `mark` — generational handles to live buffer offsets, rewritten on
//!   every edit so external position references never go stale.
//! - `undo` — whole-state snapshots, the per-buffer undo/redo stacks, and
//!   the single-line line-version slot.
//! - `options` — the per-buffer option schema with name-based access and
//!   default inheritance.
//! - `config` — TOML defaults file feeding the default-options buffer.
//! - `notify` — the synchronous notification sink with veto-capable
//!   pre-hooks.
//!
//! The engine is single-threaded and cooperative: the host event loop
//! serializes all mutations, so no locking discipline exists anywhere in
//! this crate.

pub mod config;
pub mod mark;
pub mod notify;
pub mod options;
pub mod store;
pub mod undo;

pub use config::{Config, load_from};
pub use mark::MarkId;
pub use notify::{BufferEvents, NoopBufferEvents};
pub use options::{BufferOptions, OptError, OptFlags, OptValue};
pub use store::{
    Buffer, BufferId, BufferStore, DEFAULT_BUF, FreeOutcome, Spot, cut_buffer_name,
};
pub use undo::{BufferState, Snapshot};
