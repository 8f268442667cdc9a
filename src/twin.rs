//! Lockstep driver for the self-adaptation loop.
//!
//! Each step runs, in order: plant sample, history append, estimator
//! predict/update, residual, self-adaptation manager, supervisor.

use serde::Serialize;
use thiserror::Error;

use crate::adaptation::{AdaptationError, AdaptationOutcome, AdaptationState, SelfAdaptationManager};
use crate::calibration::{Calibrate, Calibrator};
use crate::config::{Config, ConfigError};
use crate::ctrl_optimizer::{ControllerOptimizer, NoOpControllerOptimizer, OptimizeController};
use crate::estimator::{EstimatorError, KalmanFilter, StateEstimate};
use crate::export::{ExportError, StepSink};
use crate::history::{HistoryPort, InMemoryHistory, PlantSample};
use crate::params::{ControllerParameters, PlantParameters, Versioned};
use crate::simulator::{PlantInterface, SimulatedIncubator};
use crate::supervisor::{Supervisor, SupervisorError, SupervisorOutcome, SupervisorState};

#[derive(Debug, Error)]
pub enum TwinError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Estimator error: {0}")]
    Estimator(#[from] EstimatorError),
    #[error("Self-adaptation error: {0}")]
    Adaptation(#[from] AdaptationError),
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),
    #[error("Export error: {0}")]
    Export(#[from] ExportError),
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),
}

/// Everything that happened in one control step.
#[derive(Debug)]
pub struct StepReport {
    pub step: u64,
    pub sample: PlantSample,
    pub estimate: StateEstimate,
    pub residual: f64,
    pub adaptation_state: AdaptationState,
    pub supervisor_state: SupervisorState,
    pub adaptation: Option<AdaptationOutcome>,
    pub supervision: Vec<SupervisorOutcome>,
    pub plant_parameters: Versioned<PlantParameters>,
    pub ctrl_parameters: Versioned<ControllerParameters>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub steps: u64,
    pub end_time: f64,
    pub anomaly_episodes: usize,
    pub calibrations: usize,
    pub recalibrations: usize,
    pub optimizations: usize,
    pub controller_commits: usize,
    pub plant_parameters: Versioned<PlantParameters>,
    pub ctrl_parameters: Versioned<ControllerParameters>,
}

pub struct DigitalTwin<P, C, O, H = InMemoryHistory>
where
    P: PlantInterface,
    C: Calibrate,
    O: OptimizeController,
    H: HistoryPort,
{
    plant: P,
    history: H,
    estimator: KalmanFilter,
    manager: SelfAdaptationManager<C>,
    supervisor: Supervisor<O>,
    step_size: f64,
    steps: u64,
    recalibrations: usize,
    controller_commits: usize,
}

/// Twin over the simulated incubator, as built from a [`Config`].
pub type SimulatedTwin = DigitalTwin<SimulatedIncubator, Calibrator, Box<dyn OptimizeController>>;

impl<P, C, O, H> DigitalTwin<P, C, O, H>
where
    P: PlantInterface,
    C: Calibrate,
    O: OptimizeController,
    H: HistoryPort,
{
    /// Records the plant's current sample so the history is never empty.
    pub fn new(
        mut plant: P,
        mut history: H,
        estimator: KalmanFilter,
        manager: SelfAdaptationManager<C>,
        supervisor: Supervisor<O>,
    ) -> Self {
        history.record_plant_sample(plant.current_sample());
        let step_size = estimator.step_size();
        Self {
            plant,
            history,
            estimator,
            manager,
            supervisor,
            step_size,
            steps: 0,
            recalibrations: 0,
            controller_commits: 0,
        }
    }

    pub fn step(&mut self) -> Result<StepReport, TwinError> {
        let sample = self.plant.advance(self.step_size);
        let now = sample.time;
        self.history.record_plant_sample(sample);

        let estimate = self
            .estimator
            .predict_update(now, sample.heater_on, sample.room_temperature, sample.t_box)?;
        let residual = (sample.t_box - estimate.t_box_prior).abs();

        let adaptation = self.manager.step(now, residual, &mut self.history, &mut self.estimator)?;

        let mut supervision = Vec::new();
        if let Some(AdaptationOutcome::Recalibrated { .. }) = adaptation {
            self.recalibrations += 1;
            if let Some(outcome) = self.supervisor.on_plant_recalibrated(now, &mut self.history, &mut self.plant)? {
                supervision.push(outcome);
            }
        }
        if let Some(outcome) = self.supervisor.step(now, &sample, &mut self.history, &mut self.plant)? {
            supervision.push(outcome);
        }
        self.controller_commits += supervision
            .iter()
            .filter(|o| matches!(o, SupervisorOutcome::Committed { .. }))
            .count();

        self.steps += 1;
        Ok(StepReport {
            step: self.steps,
            sample,
            estimate,
            residual,
            adaptation_state: self.manager.state(),
            supervisor_state: self.supervisor.state(),
            adaptation,
            supervision,
            plant_parameters: self.history.get_plant4_parameters(),
            ctrl_parameters: self.history.get_ctrl_parameters(),
        })
    }

    /// Steps until the plant clock reaches `until`, handing every report to `sink`.
    pub fn run_until(&mut self, until: f64, sink: &mut dyn StepSink) -> Result<RunSummary, TwinError> {
        tracing::info!("Running twin from {:.1}s to {:.1}s (dt {:.1}s)", self.plant.time(), until, self.step_size);
        // half a step of slack against accumulated rounding in the clock
        while self.plant.time() + 0.5 * self.step_size <= until {
            let report = self.step()?;
            sink.record(&report)?;
        }
        let summary = self.summary();
        tracing::info!(
            "Run finished after {} steps: {} episodes, {} calibrations ({} committed), {} optimizations ({} committed)",
            summary.steps,
            summary.anomaly_episodes,
            summary.calibrations,
            summary.recalibrations,
            summary.optimizations,
            summary.controller_commits
        );
        tracing::info!(
            "Final plant parameters v{}: {:?}",
            summary.plant_parameters.version, summary.plant_parameters.value
        );
        tracing::info!(
            "Final controller parameters v{}: {} on / {} off",
            summary.ctrl_parameters.version,
            summary.ctrl_parameters.value.heating_time,
            summary.ctrl_parameters.value.heating_gap
        );
        Ok(summary)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            steps: self.steps,
            end_time: self.plant.time(),
            anomaly_episodes: self.manager.episode_count(),
            calibrations: self.manager.calibration_count(),
            recalibrations: self.recalibrations,
            optimizations: self.supervisor.optimization_count(),
            controller_commits: self.controller_commits,
            plant_parameters: self.history.get_plant4_parameters(),
            ctrl_parameters: self.history.get_ctrl_parameters(),
        }
    }

    pub fn plant(&self) -> &P {
        &self.plant
    }

    pub fn history(&self) -> &H {
        &self.history
    }

    pub fn estimator(&self) -> &KalmanFilter {
        &self.estimator
    }

    pub fn manager(&self) -> &SelfAdaptationManager<C> {
        &self.manager
    }

    pub fn supervisor(&self) -> &Supervisor<O> {
        &self.supervisor
    }
}

/// Wires the simulated incubator, estimator, calibrator and optimizer from `config`.
pub fn build_simulated_twin(config: &Config) -> Result<SimulatedTwin, TwinError> {
    config.validate()?;
    let step_size = config.simulation.step_size;
    let plant = SimulatedIncubator::from_config(config);
    let history = InMemoryHistory::new(config.plant.parameters(), config.controller.parameters());
    let estimator = KalmanFilter::new(
        step_size,
        config.estimator.std_dev,
        &config.plant.parameters(),
        config.simulation.initial_heater_temperature,
        config.simulation.initial_box_temperature,
    )?;
    let manager = SelfAdaptationManager::new(&config.self_adaptation, step_size, Calibrator::new(&config.calibration));
    let optimizer: Box<dyn OptimizeController> = if config.optimizer.enabled {
        Box::new(ControllerOptimizer::new(&config.optimizer, step_size))
    } else {
        Box::new(NoOpControllerOptimizer)
    };
    let supervisor = Supervisor::new(&config.supervisor, step_size, optimizer);
    Ok(DigitalTwin::new(plant, history, estimator, manager, supervisor))
}
