//! Domain Layer - Core relay types and business logic.
//!
//! This layer contains the protocol types, subscription bookkeeping and
//! the upstream connection state machine. Nothing here performs I/O.

/// Upstream connection lifecycle.
pub mod connection;

/// Client, relay and upstream message types.
pub mod streaming;

/// Subscription tracking and management.
pub mod subscription;
