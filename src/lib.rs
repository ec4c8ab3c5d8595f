//! Purpose: Library crate behind the `exthub` CLI: install, update, load, and uninstall engine extensions.
//! Exports: `api` (stable surface), `core` (decision logic, collaborators, errors).
//! Role: Embedders pass their own registry/installer; the CLI uses the defaults.
//! Invariants: The static-link check always precedes installer or loader work.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
mod ext_paths;
