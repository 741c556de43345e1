//! Shared domain types for the paws workflow engine.
//!
//! This crate holds the vocabulary every other crate speaks: input locators,
//! batch bindings and iteration snapshots, engine/tree events, engine
//! configuration, and the error types raised across the engine.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, uuid, chrono, thiserror.

pub mod binding;
pub mod config;
pub mod error;
pub mod event;
pub mod locator;
