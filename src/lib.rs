//! orakel: cross-lingual semantic search over a fixed passage corpus.
//!
//! Shared modules for the `orakel` binary.

pub mod config;
pub mod semantic;
pub mod storage;
pub mod web;

#[cfg(test)]
mod tests;
