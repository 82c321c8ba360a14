//! Guard library for thermal-stress prediction and process offload
//!
//! This crate provides the core functionality for:
//! - Telemetry sampling from /proc and the thermal sysfs
//! - Heuristic thermal-risk prediction with accuracy tracking
//! - Candidate selection and process suspension/restoration
//! - The periodic control loop tying the pipeline together
//! - Health checks and observability

pub mod driver;
pub mod error;
pub mod health;
pub mod models;
pub mod notify;
pub mod observability;
pub mod offload;
pub mod predictor;
pub mod telemetry;

pub use driver::{CycleRunner, DriverConfig, GuardDriver, SharedSnapshot, SharedTracker};
pub use error::GuardError;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use notify::{LogNotifier, Notifier};
pub use observability::{GuardMetrics, StructuredLogger};
