//! Shared utilities.
//!
//! Common utilities used across the crate including hashing and test helpers.

pub mod hash;
pub mod version;

#[cfg(test)]
pub mod testutil;
