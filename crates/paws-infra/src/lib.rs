//! Infrastructure layer for paws.
//!
//! Filesystem-backed implementations of the ports defined in `paws-core`:
//! the engine config loader, an append-only file message sink, and a plugin
//! registry read from a JSON document.

pub mod config;
pub mod plugin;
pub mod sink;
