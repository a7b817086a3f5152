//! Testing utilities for quire-prompt.
//!
//! Builders for agent definitions, conversations and in-memory wiki
//! services shared by the unit tests.

pub mod fixtures;

pub use fixtures::*;
