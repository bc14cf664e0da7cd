pub mod adapter;
pub mod aggregate;
pub mod config;
pub mod domain;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod pipeline;
pub mod price;
pub mod runtime;
pub mod telemetry;

pub use aggregate::snapshot::WindowSnapshot;
pub use config::MonitorConfig;
pub use error::{Error, Result};
pub use pipeline::monitor::Monitor;
