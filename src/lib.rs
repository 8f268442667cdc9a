// incubator_twin: self-adaptation loop for a temperature-controlled incubator twin

pub mod adaptation;
pub mod calibration;
pub mod config;
pub mod controller;
pub mod ctrl_optimizer;
pub mod estimator;
pub mod export;
pub mod history;
pub mod optimize;
pub mod params;
pub mod plant;
pub mod scenario;
pub mod simulator;
pub mod supervisor;
pub mod twin;

// Re-exports for the driver and the binary
pub use crate::adaptation::{AdaptationOutcome, AdaptationState, SelfAdaptationManager};
pub use crate::calibration::{Calibrate, CalibrationJob, Calibrator, TimeWindow};
pub use crate::config::{Config, ConfigError, load_config};
pub use crate::ctrl_optimizer::{ControllerOptimizer, NoOpControllerOptimizer, OptimizationJob, OptimizeController};
pub use crate::estimator::KalmanFilter;
pub use crate::history::{HistoryPort, InMemoryHistory, PlantSample};
pub use crate::params::{ControllerParameters, PlantParameters};
pub use crate::supervisor::{Supervisor, SupervisorOutcome, SupervisorState};
pub use crate::twin::{DigitalTwin, RunSummary, StepReport, TwinError, build_simulated_twin};
