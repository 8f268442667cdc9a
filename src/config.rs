//! # Incubator Twin Configuration
//!
//! Every section and field is optional; missing values fall back to the defaults below.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [simulation]
//! step_size = 3.0
//! duration = 3000.0
//!
//! [self_adaptation]
//! anomaly_threshold = 1.0
//! ensure_anomaly_timer = 2
//! gather_data_timer = 40
//!
//! [[disturbance]]
//! time = 1000.0
//! parameter = "g_box"
//! factor = 10.0
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::optimize::NelderMeadOptions;
use crate::params::{ControllerParameters, PlantParameters};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration for one twin run.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub plant: PlantConfig,
    #[serde(default, rename = "disturbance")]
    pub disturbances: Vec<DisturbanceConfig>,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub self_adaptation: SelfAdaptationConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Clock, run length and the simulated incubator's initial conditions.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    #[serde(default = "default_step_size")]
    pub step_size: f64,
    #[serde(default = "default_duration")]
    pub duration: f64,
    #[serde(default = "default_initial_box_temperature")]
    pub initial_box_temperature: f64,
    #[serde(default = "default_initial_heater_temperature")]
    pub initial_heater_temperature: f64,
    #[serde(default = "default_room_temperature")]
    pub room_temperature: f64,
    /// Half-width of the uniform sensor noise added to measured temperatures
    #[serde(default = "default_measurement_noise")]
    pub measurement_noise: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            step_size: default_step_size(),
            duration: default_duration(),
            initial_box_temperature: default_initial_box_temperature(),
            initial_heater_temperature: default_initial_heater_temperature(),
            room_temperature: default_room_temperature(),
            measurement_noise: default_measurement_noise(),
            seed: default_seed(),
        }
    }
}

/// Initial four-parameter model. The simulated incubator starts from the same values.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlantConfig {
    #[serde(default = "default_c_air")]
    pub c_air: f64,
    #[serde(default = "default_g_box")]
    pub g_box: f64,
    #[serde(default = "default_c_heater")]
    pub c_heater: f64,
    #[serde(default = "default_g_heater")]
    pub g_heater: f64,
}

impl Default for PlantConfig {
    fn default() -> Self {
        Self {
            c_air: default_c_air(),
            g_box: default_g_box(),
            c_heater: default_c_heater(),
            g_heater: default_g_heater(),
        }
    }
}

impl PlantConfig {
    pub fn parameters(&self) -> PlantParameters {
        PlantParameters::new(self.c_air, self.g_box, self.c_heater, self.g_heater)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlantParameterName {
    CAir,
    GBox,
    CHeater,
    GHeater,
}

/// Scheduled change of one true plant parameter (multiplied by `factor` at `time`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DisturbanceConfig {
    pub time: f64,
    pub parameter: PlantParameterName,
    pub factor: f64,
}

impl DisturbanceConfig {
    pub fn apply(&self, params: &PlantParameters) -> PlantParameters {
        let mut p = *params;
        match self.parameter {
            PlantParameterName::CAir => p.c_air *= self.factor,
            PlantParameterName::GBox => p.g_box *= self.factor,
            PlantParameterName::CHeater => p.c_heater *= self.factor,
            PlantParameterName::GHeater => p.g_heater *= self.factor,
        }
        p
    }
}

/// Initial duty cycle and the bounds the controller is tuned against.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    #[serde(default = "default_heating_time")]
    pub heating_time: u32,
    #[serde(default = "default_heating_gap")]
    pub heating_gap: u32,
    #[serde(default = "default_lower_bound")]
    pub lower_bound: f64,
    #[serde(default = "default_temperature_desired")]
    pub temperature_desired: f64,
    #[serde(default = "default_max_heater_temperature")]
    pub max_heater_temperature: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            heating_time: default_heating_time(),
            heating_gap: default_heating_gap(),
            lower_bound: default_lower_bound(),
            temperature_desired: default_temperature_desired(),
            max_heater_temperature: default_max_heater_temperature(),
        }
    }
}

impl ControllerConfig {
    pub fn parameters(&self) -> ControllerParameters {
        ControllerParameters {
            heating_time: self.heating_time,
            heating_gap: self.heating_gap,
            lower_bound: self.lower_bound,
            temperature_desired: self.temperature_desired,
            max_heater_temperature: self.max_heater_temperature,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EstimatorConfig {
    #[serde(default = "default_std_dev")]
    pub std_dev: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self { std_dev: default_std_dev() }
    }
}

/// Anomaly detection. Timers are counted in control steps.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelfAdaptationConfig {
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: f64,
    #[serde(default = "default_ensure_anomaly_timer")]
    pub ensure_anomaly_timer: u32,
    #[serde(default = "default_gather_data_timer")]
    pub gather_data_timer: u32,
}

impl Default for SelfAdaptationConfig {
    fn default() -> Self {
        Self {
            anomaly_threshold: default_anomaly_threshold(),
            ensure_anomaly_timer: default_ensure_anomaly_timer(),
            gather_data_timer: default_gather_data_timer(),
        }
    }
}

/// Calibration search. Tolerances apply in ln(parameter) space.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalibrationConfig {
    #[serde(default = "default_calibration_xatol")]
    pub conv_xatol: f64,
    #[serde(default = "default_calibration_fatol")]
    pub conv_fatol: f64,
    #[serde(default = "default_calibration_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_calibration_restarts")]
    pub restarts: usize,
    /// Initial simplex offset in ln(parameter) units
    #[serde(default = "default_calibration_log_step")]
    pub initial_log_step: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            conv_xatol: default_calibration_xatol(),
            conv_fatol: default_calibration_fatol(),
            max_iterations: default_calibration_max_iterations(),
            restarts: default_calibration_restarts(),
            initial_log_step: default_calibration_log_step(),
        }
    }
}

impl CalibrationConfig {
    pub fn search_options(&self) -> NelderMeadOptions {
        NelderMeadOptions {
            xatol: self.conv_xatol,
            fatol: self.conv_fatol,
            max_iterations: self.max_iterations,
            initial_step: Some(vec![self.initial_log_step; 4]),
            restarts: self.restarts,
        }
    }
}

/// Controller optimizer search and the closed-loop horizon each candidate is simulated over.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OptimizerConfig {
    /// `false` installs the no-op optimizer that always declines
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_optimizer_xatol")]
    pub conv_xatol: f64,
    #[serde(default = "default_optimizer_fatol")]
    pub conv_fatol: f64,
    #[serde(default = "default_optimizer_max_iterations")]
    pub max_iterations: usize,
    /// Simulated seconds per candidate evaluation
    #[serde(default = "default_horizon")]
    pub horizon: f64,
    #[serde(default = "default_heater_penalty")]
    pub heater_penalty: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            conv_xatol: default_optimizer_xatol(),
            conv_fatol: default_optimizer_fatol(),
            max_iterations: default_optimizer_max_iterations(),
            horizon: default_horizon(),
            heater_penalty: default_heater_penalty(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_wait_til_supervising_timer")]
    pub wait_til_supervising_timer: u32,
    #[serde(default = "default_performance_window")]
    pub performance_window: usize,
    #[serde(default = "default_trigger_optimization_threshold")]
    pub trigger_optimization_threshold: f64,
    #[serde(default = "default_true", rename = "restrict_T_heater", alias = "restrict_t_heater")]
    pub restrict_t_heater: bool,
    #[serde(default = "default_true")]
    pub optimize_on_recalibration: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            wait_til_supervising_timer: default_wait_til_supervising_timer(),
            performance_window: default_performance_window(),
            trigger_optimization_threshold: default_trigger_optimization_threshold(),
            restrict_t_heater: true,
            optimize_on_recalibration: true,
        }
    }
}

impl Config {
    /// Rejects settings the estimator, timers or searches cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        let sim = &self.simulation;
        if !(sim.step_size.is_finite() && sim.step_size > 0.0) {
            return invalid(format!("simulation.step_size must be > 0, got {}", sim.step_size));
        }
        if !(sim.duration.is_finite() && sim.duration >= 0.0) {
            return invalid(format!("simulation.duration must be >= 0, got {}", sim.duration));
        }
        if !(sim.measurement_noise.is_finite() && sim.measurement_noise >= 0.0) {
            return invalid(format!("simulation.measurement_noise must be >= 0, got {}", sim.measurement_noise));
        }
        if !self.plant.parameters().is_physical() {
            return invalid(format!("plant parameters must be positive: {:?}", self.plant));
        }
        for d in &self.disturbances {
            if !(d.factor.is_finite() && d.factor > 0.0) {
                return invalid(format!("disturbance at {}s has non-positive factor {}", d.time, d.factor));
            }
        }
        let ctrl = &self.controller;
        if ctrl.heating_time + ctrl.heating_gap == 0 {
            return invalid("controller duty cycle period must be > 0".to_string());
        }
        if ctrl.lower_bound >= ctrl.temperature_desired {
            return invalid(format!(
                "controller.lower_bound ({}) must be below temperature_desired ({})",
                ctrl.lower_bound, ctrl.temperature_desired
            ));
        }
        if ctrl.temperature_desired >= ctrl.max_heater_temperature {
            return invalid(format!(
                "controller.temperature_desired ({}) must be below max_heater_temperature ({})",
                ctrl.temperature_desired, ctrl.max_heater_temperature
            ));
        }
        if !(self.estimator.std_dev.is_finite() && self.estimator.std_dev > 0.0) {
            return invalid(format!("estimator.std_dev must be > 0, got {}", self.estimator.std_dev));
        }
        if !(self.self_adaptation.anomaly_threshold.is_finite() && self.self_adaptation.anomaly_threshold > 0.0) {
            return invalid("self_adaptation.anomaly_threshold must be > 0".to_string());
        }
        if !(self.calibration.initial_log_step.is_finite() && self.calibration.initial_log_step > 0.0) {
            return invalid("calibration.initial_log_step must be > 0".to_string());
        }
        if self.calibration.max_iterations == 0 || self.optimizer.max_iterations == 0 {
            return invalid("max_iterations must be > 0".to_string());
        }
        if !(self.optimizer.horizon.is_finite() && self.optimizer.horizon >= sim.step_size) {
            return invalid(format!("optimizer.horizon must cover at least one step, got {}", self.optimizer.horizon));
        }
        if self.supervisor.performance_window == 0 {
            return invalid("supervisor.performance_window must be > 0".to_string());
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_step_size() -> f64 { 3.0 }
fn default_duration() -> f64 { 3000.0 }
fn default_initial_box_temperature() -> f64 { 41.0 }
fn default_initial_heater_temperature() -> f64 { 47.0 }
fn default_room_temperature() -> f64 { 21.0 }
fn default_measurement_noise() -> f64 { 0.0 }
fn default_seed() -> u64 { 42 }
fn default_c_air() -> f64 { PlantParameters::default().c_air }
fn default_g_box() -> f64 { PlantParameters::default().g_box }
fn default_c_heater() -> f64 { PlantParameters::default().c_heater }
fn default_g_heater() -> f64 { PlantParameters::default().g_heater }
fn default_heating_time() -> u32 { 5 }
fn default_heating_gap() -> u32 { 35 }
fn default_lower_bound() -> f64 { 5.0 }
fn default_temperature_desired() -> f64 { 35.0 }
fn default_max_heater_temperature() -> f64 { 60.0 }
fn default_std_dev() -> f64 { 0.001 }
fn default_anomaly_threshold() -> f64 { 1.0 }
fn default_ensure_anomaly_timer() -> u32 { 2 }
fn default_gather_data_timer() -> u32 { 40 }
fn default_calibration_xatol() -> f64 { 1e-3 }
fn default_calibration_fatol() -> f64 { 1e-4 }
fn default_calibration_max_iterations() -> usize { 5000 }
fn default_calibration_restarts() -> usize { 2 }
fn default_calibration_log_step() -> f64 { 0.3 }
fn default_optimizer_xatol() -> f64 { 1.0 }
fn default_optimizer_fatol() -> f64 { 1e-3 }
fn default_optimizer_max_iterations() -> usize { 200 }
fn default_horizon() -> f64 { 3000.0 }
fn default_heater_penalty() -> f64 { 10.0 }
fn default_wait_til_supervising_timer() -> u32 { 100 }
fn default_performance_window() -> usize { 20 }
fn default_trigger_optimization_threshold() -> f64 { 10.0 }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<Config>(&contents) {
            Ok(config) => match config.validate() {
                Ok(()) => Ok(config),
                Err(e) => {
                    tracing::error!("Rejected config '{}': {}", path, e);
                    Err(e)
                }
            },
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            Err(ConfigError::Io(e))
        }
    }
}
