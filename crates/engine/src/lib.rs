//! SelfHeal Engine
//!
//! Classifies browser-test failures, picks a repair strategy and drives the
//! repair and visual backends to produce a healed selector, a patched test
//! or a list of suggestions.

pub mod audit;
pub mod batch;
pub mod classifier;
pub mod config;
pub mod context;
pub mod metrics;
pub mod orchestrator;
pub mod repair;
pub mod service;
pub mod strategy;
pub mod visual;

pub use batch::BatchOutcome;
pub use classifier::classify;
pub use config::HealingConfig;
pub use metrics::{HealingMetrics, InMemoryMetrics, NoopMetrics};
pub use orchestrator::Orchestrator;
pub use repair::{RepairBackend, RepairClient};
pub use service::{HealingService, ServiceBuilder};
pub use visual::{VisualBackend, VisualClient};
