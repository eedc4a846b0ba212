//! tagwatch: readiness polling and client for a tag-prediction inference service.

pub mod client;
pub mod config;
pub mod error;
pub mod poller;
pub mod probe;

pub use client::{CorrectionRequest, InferenceClient, PredictionRequest, PredictionResult};
pub use config::{ClientConfig, PollConfig};
pub use error::{ClientError, ConfigError};
pub use poller::{Effect, PollHandle, PollObserver, PollState, PollStatus, start_polling};
pub use probe::{Probe, ProbeOutcome, classify_response};

/// tagwatch version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
