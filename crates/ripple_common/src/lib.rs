//! Shared foundational types for the Ripple pipeline cache.
//!
//! This crate provides the 128-bit content hash used for all signature and
//! fingerprint computation, together with a small streaming writer for
//! combining hash parts deterministically.

#![warn(missing_docs)]

pub mod hash;

pub use hash::{ContentHash, HashWriter};
