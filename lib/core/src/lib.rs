//! Core domain types and utilities for the adgraph workflow engine.
//!
//! This crate provides the foundational strongly-typed ID types shared by
//! the engine and server crates. Error handling is layered per-crate
//! instead (see `adgraph_engine::error`): each component defines its own
//! closed error enum, since the Runner, Debug Controller, and HTTP layer
//! all need to match on error *structure* (which variant, which field)
//! rather than carry an opaque causal chain.

pub mod id;

pub use id::*;
