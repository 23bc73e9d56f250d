//! FAIR (Factor Analysis of Information Risk) Monte Carlo estimator.
//!
//! Each scenario draws a threat event frequency, a vulnerability and a loss
//! magnitude from uniform ranges; their product is one year's loss. A run's
//! losses are summarized into mean, median, extremes, p90/p95/p99 and a
//! 50-bin histogram, then stored in SQLite for later listing, comparison and
//! CSV export.

pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod params;
pub mod service;
pub mod simulation;
pub mod stats;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use error::{FairError, ServiceError, StoreError};
pub use params::{ParameterInput, SimulationParameters};
pub use service::FairService;
pub use simulation::{ScenarioResult, Simulator, simulate};
pub use stats::{Histogram, SimulationSummary, histogram, summarize};
