//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for the upstream connection and fan-out.
pub mod ports;

/// Registry, session, routing and relay services.
pub mod services;
