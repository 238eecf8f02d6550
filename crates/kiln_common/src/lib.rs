//! Shared foundational types for the Kiln build cache.
//!
//! This crate provides content hashing and canonical text encoding, the
//! deterministic building blocks that cache key derivation and entry
//! integrity checks are built on.

#![warn(missing_docs)]

pub mod canon;
pub mod hash;

pub use canon::canonical_map_text;
pub use hash::ContentHash;
