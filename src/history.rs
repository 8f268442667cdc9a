// src/history.rs - Time-series history port and its in-memory implementation
use serde::Serialize;
use thiserror::Error;

use crate::params::{ControllerParameters, ParameterLog, PlantParameters, Versioned};
use crate::plant::{DrivingInputs, PlantState, Trajectory};

#[derive(Debug, Error, PartialEq)]
pub enum HistoryError {
    #[error("No plant samples between {t_start:.1}s and {t_end:.1}s")]
    EmptyWindow { t_start: f64, t_end: f64 },
    #[error("Invalid time window: start {t_start:.1}s is after end {t_end:.1}s")]
    InvalidWindow { t_start: f64, t_end: f64 },
    #[error("No plant samples recorded yet")]
    NoSamples,
}

/// One measured (or simulated) plant sample. `heater_on` and
/// `room_temperature` are the inputs held over the interval ending at `time`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlantSample {
    pub time: f64,
    pub t_box: f64,
    pub t_heater: f64,
    pub heater_on: bool,
    pub room_temperature: f64,
}

impl PlantSample {
    pub fn state(&self) -> PlantState {
        PlantState { t_box: self.t_box, t_heater: self.t_heater }
    }
}

/// Samples inside a queried window, with their positions
/// (`start_index..=end_index`) in the full recorded log.
#[derive(Debug, Clone)]
pub struct SignalWindow {
    pub signals: Vec<PlantSample>,
    pub start_index: usize,
    pub end_index: usize,
}

impl SignalWindow {
    pub fn samples(&self) -> &[PlantSample] {
        &self.signals
    }

    /// Recorded inputs for replaying the window through a plant simulator.
    pub fn driving_inputs(&self) -> DrivingInputs {
        let samples = self.samples();
        DrivingInputs {
            times: samples.iter().map(|s| s.time).collect(),
            heater_on: samples.iter().skip(1).map(|s| s.heater_on).collect(),
            room_temperature: samples.iter().skip(1).map(|s| s.room_temperature).collect(),
        }
    }
}

/// Recorded outcome of a controller optimization: the policy the optimizer
/// expects the plant to follow.
#[derive(Debug, Clone)]
pub struct OptimalPolicy {
    pub parameters: ControllerParameters,
    pub trajectory: Trajectory,
}

/// Append/query interface over plant and controller history.
pub trait HistoryPort {
    fn record_plant_sample(&mut self, sample: PlantSample);
    fn get_plant_signals_between(&self, t_start: f64, t_end: f64) -> Result<SignalWindow, HistoryError>;
    fn get_plant_snapshot(&self) -> Result<PlantSample, HistoryError>;
    fn store_calibrated_trajectory(&mut self, trajectory: Trajectory);
    fn get_plant4_parameters(&self) -> Versioned<PlantParameters>;
    fn store_new_plant_parameters(&mut self, time: f64, params: PlantParameters) -> u64;
    fn get_ctrl_parameters(&self) -> Versioned<ControllerParameters>;
    fn store_new_ctrl_parameters(&mut self, time: f64, params: ControllerParameters) -> u64;
    fn store_controller_optimal_policy(&mut self, policy: OptimalPolicy);
}

/// Keeps everything in memory. Used by the simulated twin and the tests.
#[derive(Debug, Clone)]
pub struct InMemoryHistory {
    samples: Vec<PlantSample>,
    plant_parameters: ParameterLog<PlantParameters>,
    ctrl_parameters: ParameterLog<ControllerParameters>,
    calibrated_trajectories: Vec<Trajectory>,
    optimal_policies: Vec<OptimalPolicy>,
}

impl InMemoryHistory {
    pub fn new(plant: PlantParameters, ctrl: ControllerParameters) -> Self {
        Self {
            samples: Vec::new(),
            plant_parameters: ParameterLog::new(plant, 0.0),
            ctrl_parameters: ParameterLog::new(ctrl, 0.0),
            calibrated_trajectories: Vec::new(),
            optimal_policies: Vec::new(),
        }
    }

    pub fn samples(&self) -> &[PlantSample] {
        &self.samples
    }

    pub fn plant_parameter_history(&self) -> &[Versioned<PlantParameters>] {
        self.plant_parameters.history()
    }

    pub fn ctrl_parameter_history(&self) -> &[Versioned<ControllerParameters>] {
        self.ctrl_parameters.history()
    }

    pub fn calibrated_trajectories(&self) -> &[Trajectory] {
        &self.calibrated_trajectories
    }

    pub fn optimal_policies(&self) -> &[OptimalPolicy] {
        &self.optimal_policies
    }
}

impl HistoryPort for InMemoryHistory {
    fn record_plant_sample(&mut self, sample: PlantSample) {
        self.samples.push(sample);
    }

    fn get_plant_signals_between(&self, t_start: f64, t_end: f64) -> Result<SignalWindow, HistoryError> {
        if t_start > t_end {
            return Err(HistoryError::InvalidWindow { t_start, t_end });
        }
        // samples are appended in time order
        let start_index = self.samples.partition_point(|s| s.time < t_start);
        let after_end = self.samples.partition_point(|s| s.time <= t_end);
        if after_end <= start_index {
            return Err(HistoryError::EmptyWindow { t_start, t_end });
        }
        Ok(SignalWindow {
            signals: self.samples[start_index..after_end].to_vec(),
            start_index,
            end_index: after_end - 1,
        })
    }

    fn get_plant_snapshot(&self) -> Result<PlantSample, HistoryError> {
        self.samples.last().copied().ok_or(HistoryError::NoSamples)
    }

    fn store_calibrated_trajectory(&mut self, trajectory: Trajectory) {
        tracing::debug!("Stored calibration trajectory with {} points", trajectory.len());
        self.calibrated_trajectories.push(trajectory);
    }

    fn get_plant4_parameters(&self) -> Versioned<PlantParameters> {
        *self.plant_parameters.latest()
    }

    fn store_new_plant_parameters(&mut self, time: f64, params: PlantParameters) -> u64 {
        self.plant_parameters.commit(time, params)
    }

    fn get_ctrl_parameters(&self) -> Versioned<ControllerParameters> {
        *self.ctrl_parameters.latest()
    }

    fn store_new_ctrl_parameters(&mut self, time: f64, params: ControllerParameters) -> u64 {
        self.ctrl_parameters.commit(time, params)
    }

    fn store_controller_optimal_policy(&mut self, policy: OptimalPolicy) {
        self.optimal_policies.push(policy);
    }
}
