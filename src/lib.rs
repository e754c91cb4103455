//! # sortq
//!
//! Tenant-scoped line queue with fuzzy dedup and atomic batch claims.
//!
//! Teams submit batches of text lines, and a fuzzy dedup filter keeps
//! near-duplicates out of the pool. Users then claim bounded FIFO
//! batches into an append-only history, rate-limited per user by a
//! configurable cooldown.

pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod storage;
pub mod telemetry;
