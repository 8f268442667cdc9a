// src/supervisor.rs - Watches tracking performance and commits re-optimized duty cycles
use std::collections::VecDeque;

use serde::Serialize;
use thiserror::Error;

use crate::config::SupervisorConfig;
use crate::controller::{ControllerError, ParametricController};
use crate::ctrl_optimizer::{OptimizationJob, OptimizeController, OptimizerError, PerformanceTargets};
use crate::history::{HistoryPort, PlantSample};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),
    #[error("Controller rejected new parameters: {0}")]
    Controller(#[from] ControllerError),
    #[error("Optimization requested while another one is in flight")]
    ReentrantJob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SupervisorState {
    Idle,
    WaitingToSupervise,
    Monitoring,
    TriggeringOptimization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OptimizationReason {
    PoorTracking,
    HeaterOverTemperature,
    PlantRecalibrated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorOutcome {
    /// Monitoring detected degraded performance; optimization runs on the next step.
    Triggered { reason: OptimizationReason },
    /// New duty cycle pushed to the controller and committed as `version`.
    Committed { job: OptimizationJob, version: u64 },
    /// Optimizer declined or did not improve; prior parameters kept.
    Retained { job: OptimizationJob },
}

pub struct Supervisor<O: OptimizeController> {
    optimizer: O,
    config: SupervisorConfig,
    step_size: f64,
    state: SupervisorState,
    supervise_after: f64,
    errors: VecDeque<f64>,
    pending_reason: Option<OptimizationReason>,
    optimization_pending: bool,
    optimizations: usize,
    /// (plant version, controller version) left behind by the last optimization
    last_attempt: Option<(u64, u64)>,
}

impl<O: OptimizeController> Supervisor<O> {
    pub fn new(config: &SupervisorConfig, step_size: f64, optimizer: O) -> Self {
        Self {
            optimizer,
            config: config.clone(),
            step_size,
            state: SupervisorState::Idle,
            supervise_after: 0.0,
            errors: VecDeque::with_capacity(config.performance_window),
            pending_reason: None,
            optimization_pending: false,
            optimizations: 0,
            last_attempt: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn optimization_count(&self) -> usize {
        self.optimizations
    }

    /// Mean absolute tracking error over the current window.
    pub fn mean_tracking_error(&self) -> Option<f64> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.iter().sum::<f64>() / self.errors.len() as f64)
        }
    }

    pub fn step(
        &mut self,
        now: f64,
        sample: &PlantSample,
        history: &mut dyn HistoryPort,
        controller: &mut dyn ParametricController,
    ) -> Result<Option<SupervisorOutcome>, SupervisorError> {
        match self.state {
            SupervisorState::Idle => {
                self.start_waiting(now);
                Ok(None)
            }
            SupervisorState::WaitingToSupervise => {
                // half a step of slack against accumulated rounding in the clock
                if now + 0.5 * self.step_size >= self.supervise_after {
                    tracing::info!("Supervisor monitoring from {:.1}s", now);
                    self.state = SupervisorState::Monitoring;
                }
                Ok(None)
            }
            SupervisorState::Monitoring => {
                let plant_version = history.get_plant4_parameters().version;
                let ctrl = history.get_ctrl_parameters();
                self.errors.push_back((sample.t_box - ctrl.value.temperature_desired).abs());
                while self.errors.len() > self.config.performance_window {
                    self.errors.pop_front();
                }
                // re-optimizing unchanged parameters would return the same answer
                if self.last_attempt == Some((plant_version, ctrl.version)) {
                    return Ok(None);
                }
                let ctrl = ctrl.value;

                let heater_over = self.config.restrict_t_heater && sample.t_heater > ctrl.max_heater_temperature;
                let poor_tracking = self.errors.len() == self.config.performance_window
                    && self
                        .mean_tracking_error()
                        .is_some_and(|mean| mean > self.config.trigger_optimization_threshold);
                let reason = if heater_over {
                    OptimizationReason::HeaterOverTemperature
                } else if poor_tracking {
                    OptimizationReason::PoorTracking
                } else {
                    return Ok(None);
                };
                tracing::info!("Triggering controller optimization at {:.1}s ({:?})", now, reason);
                self.pending_reason = Some(reason);
                self.state = SupervisorState::TriggeringOptimization;
                Ok(Some(SupervisorOutcome::Triggered { reason }))
            }
            SupervisorState::TriggeringOptimization => {
                let outcome = self.optimize_and_commit(now, history, controller);
                self.pending_reason = None;
                self.errors.clear();
                self.state = SupervisorState::Monitoring;
                outcome.map(Some)
            }
        }
    }

    /// Re-optimizes right after the plant model was recalibrated, then waits
    /// `wait_til_supervising_timer` steps before monitoring again.
    pub fn on_plant_recalibrated(
        &mut self,
        now: f64,
        history: &mut dyn HistoryPort,
        controller: &mut dyn ParametricController,
    ) -> Result<Option<SupervisorOutcome>, SupervisorError> {
        if !self.config.optimize_on_recalibration {
            return Ok(None);
        }
        tracing::info!("Plant recalibrated, re-optimizing controller at {:.1}s", now);
        self.pending_reason = Some(OptimizationReason::PlantRecalibrated);
        let outcome = self.optimize_and_commit(now, history, controller);
        self.pending_reason = None;
        self.errors.clear();
        self.start_waiting(now);
        outcome.map(Some)
    }

    fn start_waiting(&mut self, now: f64) {
        self.supervise_after = now + self.config.wait_til_supervising_timer as f64 * self.step_size;
        tracing::debug!("Supervisor waiting until {:.1}s", self.supervise_after);
        self.state = SupervisorState::WaitingToSupervise;
    }

    fn optimize_and_commit(
        &mut self,
        now: f64,
        history: &mut dyn HistoryPort,
        controller: &mut dyn ParametricController,
    ) -> Result<SupervisorOutcome, SupervisorError> {
        if self.optimization_pending {
            return Err(SupervisorError::ReentrantJob);
        }
        let plant = history.get_plant4_parameters();
        let ctrl = history.get_ctrl_parameters();
        let current = ctrl.value;
        let targets = PerformanceTargets::from_parameters(&current, self.config.restrict_t_heater);
        tracing::debug!(
            "Optimizing against plant parameters v{} ({:?})",
            plant.version,
            self.pending_reason
        );

        self.optimization_pending = true;
        let result = self.optimizer.optimize(&plant.value, &targets, history);
        self.optimization_pending = false;
        self.optimizations += 1;
        let job = result?;
        self.last_attempt = Some((plant.version, ctrl.version));

        if !job.converged {
            tracing::warn!("Controller optimization declined, keeping {} on / {} off", current.heating_time, current.heating_gap);
            return Ok(SupervisorOutcome::Retained { job });
        }
        if job.result.same_duty_cycle(&current) {
            tracing::info!("Current duty cycle is already optimal");
            return Ok(SupervisorOutcome::Retained { job });
        }

        controller.set_new_parameters(job.result.heating_time, job.result.heating_period())?;
        let version = history.store_new_ctrl_parameters(now, job.result);
        self.last_attempt = Some((plant.version, version));
        tracing::info!(
            "Committed controller parameters v{}: {} on / {} off",
            version, job.result.heating_time, job.result.heating_gap
        );
        Ok(SupervisorOutcome::Committed { job, version })
    }
}
