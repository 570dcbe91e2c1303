//! Floodgate - Per-Key Sliding-Window-Log Rate Limiter
//!
//! This crate implements an in-process rate limiter using the
//! sliding-window-log algorithm: every admitted request's timestamp is kept
//! per key, and a request is admitted when fewer than the key's quota fall
//! inside the trailing window. State is sharded per key for concurrent
//! callers, and idle keys are evicted to bound memory.

pub mod config;
pub mod error;
pub mod ratelimit;
