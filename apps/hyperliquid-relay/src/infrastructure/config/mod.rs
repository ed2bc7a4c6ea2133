//! Configuration Module
//!
//! Configuration loading for the relay service.

mod settings;

pub use settings::{
    ConfigError, Network, RelayConfig, ServerSettings, SessionSettings, UpstreamSettings,
};
