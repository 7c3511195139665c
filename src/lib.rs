#![forbid(unsafe_code)]

// chat-load library - simulated client population for WebSocket chat load tests

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod signaling;

pub use client::{ConnectionState, SimulatedClient};
pub use config::HarnessConfig;
pub use controller::{Phase, PopulationController, RoundOutcome, StopHandle};
pub use error::{ConfigError, HarnessError, TransportError};
pub use metrics::RunSummary;
