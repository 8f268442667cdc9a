// src/ctrl_optimizer.rs - Duty-cycle search against a simulated closed loop
use serde::Serialize;
use thiserror::Error;

use crate::config::OptimizerConfig;
use crate::controller::OpenLoopController;
use crate::history::{HistoryError, HistoryPort, OptimalPolicy, PlantSample};
use crate::optimize::{self, NelderMeadOptions, OptimizeError};
use crate::params::{ControllerParameters, PlantParameters};
use crate::plant::{FourParameterSimulator, Horizon, PlantSimulator, Trajectory};

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("Missing data: {0}")]
    MissingData(#[from] HistoryError),
    #[error("Search failed: {0}")]
    Search(#[from] OptimizeError),
    #[error("Invalid optimizer setting: {0}")]
    InvalidSetting(String),
}

/// What a candidate duty cycle is scored against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceTargets {
    pub temperature_desired: f64,
    pub max_heater_temperature: f64,
    pub restrict_t_heater: bool,
}

impl PerformanceTargets {
    pub fn from_parameters(params: &ControllerParameters, restrict_t_heater: bool) -> Self {
        Self {
            temperature_desired: params.temperature_desired,
            max_heater_temperature: params.max_heater_temperature,
            restrict_t_heater,
        }
    }
}

/// Terminal result of one controller optimization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationJob {
    pub initial_guess: ControllerParameters,
    pub result: ControllerParameters,
    pub converged: bool,
    pub iterations: usize,
    pub cost: f64,
}

pub trait OptimizeController {
    fn optimize(
        &mut self,
        plant: &PlantParameters,
        targets: &PerformanceTargets,
        history: &mut dyn HistoryPort,
    ) -> Result<OptimizationJob, OptimizerError>;
}

impl<T: OptimizeController + ?Sized> OptimizeController for Box<T> {
    fn optimize(
        &mut self,
        plant: &PlantParameters,
        targets: &PerformanceTargets,
        history: &mut dyn HistoryPort,
    ) -> Result<OptimizationJob, OptimizerError> {
        (**self).optimize(plant, targets, history)
    }
}

/// Mean squared tracking error over the second half of `trajectory`, plus a
/// quadratic penalty on heater overshoot when the heater is restricted.
pub fn policy_cost(trajectory: &Trajectory, targets: &PerformanceTargets, heater_penalty: f64) -> f64 {
    let settled = &trajectory.t_box[trajectory.len() / 2..];
    if settled.is_empty() {
        return f64::INFINITY;
    }
    let tracking = settled
        .iter()
        .map(|t| (t - targets.temperature_desired).powi(2))
        .sum::<f64>()
        / settled.len() as f64;
    let excess = (trajectory.max_heater_temperature() - targets.max_heater_temperature).max(0.0);
    if targets.restrict_t_heater && excess > 0.0 {
        tracking + heater_penalty * excess * excess
    } else {
        tracking
    }
}

/// Rounds a search point to a duty cycle; `None` outside `heating_time >= 0`, `heating_gap >= 1`.
fn duty_cycle(x: &[f64]) -> Option<(u32, u32)> {
    let heating_time = x.first()?.round();
    let heating_gap = x.get(1)?.round();
    if !(heating_time.is_finite() && heating_gap.is_finite()) || heating_time < 0.0 || heating_gap < 1.0 {
        return None;
    }
    Some((heating_time as u32, heating_gap as u32))
}

#[derive(Debug, Clone)]
pub struct ControllerOptimizer<S: PlantSimulator = FourParameterSimulator> {
    simulator: S,
    config: OptimizerConfig,
    step_size: f64,
}

impl ControllerOptimizer<FourParameterSimulator> {
    pub fn new(config: &OptimizerConfig, step_size: f64) -> Self {
        Self::with_simulator(FourParameterSimulator, config, step_size)
    }
}

impl<S: PlantSimulator> ControllerOptimizer<S> {
    pub fn with_simulator(simulator: S, config: &OptimizerConfig, step_size: f64) -> Self {
        Self {
            simulator,
            config: config.clone(),
            step_size,
        }
    }

    fn simulate_policy(
        &self,
        plant: &PlantParameters,
        snapshot: &PlantSample,
        horizon: Horizon,
        heating_time: u32,
        heating_gap: u32,
    ) -> Trajectory {
        let mut controller = OpenLoopController::new(heating_time, heating_time + heating_gap);
        self.simulator
            .simulate_closed_loop(plant, snapshot.state(), &mut controller, snapshot.room_temperature, horizon)
    }
}

impl<S: PlantSimulator> OptimizeController for ControllerOptimizer<S> {
    fn optimize(
        &mut self,
        plant: &PlantParameters,
        targets: &PerformanceTargets,
        history: &mut dyn HistoryPort,
    ) -> Result<OptimizationJob, OptimizerError> {
        if !(self.step_size.is_finite() && self.step_size > 0.0) {
            return Err(OptimizerError::InvalidSetting(format!("step_size must be > 0, got {}", self.step_size)));
        }
        let current = history.get_ctrl_parameters().value;
        let snapshot = history.get_plant_snapshot()?;
        let horizon = Horizon {
            start_time: snapshot.time,
            dt: self.step_size,
            steps: (self.config.horizon / self.step_size).round().max(1.0) as usize,
        };

        tracing::info!(
            "Optimizing controller from {} on / {} off (target {:.1}C, horizon {} steps)",
            current.heating_time, current.heating_gap, targets.temperature_desired, horizon.steps
        );

        let x0 = [current.heating_time as f64, current.heating_gap as f64];
        let options = NelderMeadOptions {
            xatol: self.config.conv_xatol,
            fatol: self.config.conv_fatol,
            max_iterations: self.config.max_iterations,
            initial_step: Some(x0.iter().map(|v| (0.25 * v).max(1.0)).collect()),
            restarts: 0,
        };
        let penalty = self.config.heater_penalty;
        let cost = |x: &[f64]| match duty_cycle(x) {
            Some((heating_time, heating_gap)) => {
                let trajectory = self.simulate_policy(plant, &snapshot, horizon, heating_time, heating_gap);
                policy_cost(&trajectory, targets, penalty)
            }
            None => f64::INFINITY,
        };
        let minimum = optimize::minimize(cost, &x0, &options)?;
        let (heating_time, heating_gap) = duty_cycle(&minimum.x).unwrap_or((current.heating_time, current.heating_gap));
        let result = current.with_duty_cycle(heating_time, heating_gap);

        let trajectory = self.simulate_policy(plant, &snapshot, horizon, heating_time, heating_gap);
        history.store_controller_optimal_policy(OptimalPolicy { parameters: result, trajectory });

        if minimum.converged {
            tracing::info!(
                "Controller optimization converged after {} iterations: {} on / {} off (cost {:.4})",
                minimum.iterations, heating_time, heating_gap, minimum.value
            );
        } else {
            tracing::warn!(
                "Controller optimization did not converge after {} iterations (best {} on / {} off)",
                minimum.iterations, heating_time, heating_gap
            );
        }

        Ok(OptimizationJob {
            initial_guess: current,
            result,
            converged: minimum.converged,
            iterations: minimum.iterations,
            cost: minimum.value,
        })
    }
}

/// Declines every request; the current parameters come back with `converged = false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpControllerOptimizer;

impl OptimizeController for NoOpControllerOptimizer {
    fn optimize(
        &mut self,
        _plant: &PlantParameters,
        _targets: &PerformanceTargets,
        history: &mut dyn HistoryPort,
    ) -> Result<OptimizationJob, OptimizerError> {
        let current = history.get_ctrl_parameters().value;
        tracing::debug!("Controller optimization disabled, keeping current parameters");
        Ok(OptimizationJob {
            initial_guess: current,
            result: current,
            converged: false,
            iterations: 0,
            cost: f64::INFINITY,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistory;

    fn history_at(t_box: f64, ctrl: ControllerParameters) -> InMemoryHistory {
        let mut history = InMemoryHistory::new(PlantParameters::default(), ctrl);
        history.record_plant_sample(PlantSample {
            time: 300.0,
            t_box,
            t_heater: t_box + 2.0,
            heater_on: false,
            room_temperature: 21.0,
        });
        history
    }

    #[test]
    fn test_duty_cycle_rounding_and_bounds() {
        assert_eq!(duty_cycle(&[4.6, 10.2]), Some((5, 10)));
        assert_eq!(duty_cycle(&[-0.4, 1.0]), Some((0, 1)));
        assert_eq!(duty_cycle(&[-0.6, 3.0]), None);
        assert_eq!(duty_cycle(&[2.0, 0.4]), None);
    }

    #[test]
    fn test_policy_cost_penalizes_heater_overshoot() {
        let trajectory = Trajectory {
            times: vec![0.0, 3.0, 6.0, 9.0],
            t_box: vec![30.0, 33.0, 35.0, 35.0],
            t_heater: vec![40.0, 65.0, 50.0, 45.0],
            heater_on: vec![false, true, false, false],
        };
        let mut targets = PerformanceTargets {
            temperature_desired: 35.0,
            max_heater_temperature: 60.0,
            restrict_t_heater: false,
        };
        assert_eq!(policy_cost(&trajectory, &targets, 10.0), 0.0);
        targets.restrict_t_heater = true;
        assert_eq!(policy_cost(&trajectory, &targets, 10.0), 250.0);
    }

    #[test]
    fn test_optimizer_improves_weak_duty_cycle() {
        let ctrl = ControllerParameters { heating_time: 1, heating_gap: 39, ..Default::default() };
        let mut history = history_at(25.0, ctrl);
        let config = OptimizerConfig { horizon: 3000.0, ..Default::default() };
        let mut optimizer = ControllerOptimizer::new(&config, 3.0);
        let targets = PerformanceTargets::from_parameters(&ctrl, true);
        let job = optimizer.optimize(&PlantParameters::default(), &targets, &mut history).unwrap();

        let initial_cost = policy_cost(
            &optimizer.simulate_policy(&PlantParameters::default(), &history.get_plant_snapshot().unwrap(), Horizon {
                start_time: 300.0,
                dt: 3.0,
                steps: 1000,
            }, 1, 39),
            &targets,
            config.heater_penalty,
        );
        assert!(job.cost < initial_cost);
        assert!(!job.result.same_duty_cycle(&ctrl));
        assert_eq!(history.optimal_policies().len(), 1);
        assert_eq!(history.optimal_policies()[0].parameters, job.result);
    }

    #[test]
    fn test_noop_declines() {
        let ctrl = ControllerParameters::default();
        let mut history = history_at(30.0, ctrl);
        let targets = PerformanceTargets::from_parameters(&ctrl, true);
        let job = NoOpControllerOptimizer
            .optimize(&PlantParameters::default(), &targets, &mut history)
            .unwrap();
        assert!(!job.converged);
        assert_eq!(job.iterations, 0);
        assert_eq!(job.result, ctrl);
        assert!(history.optimal_policies().is_empty());
    }

    #[test]
    fn test_missing_snapshot_is_reported() {
        let mut history = InMemoryHistory::new(PlantParameters::default(), ControllerParameters::default());
        let mut optimizer = ControllerOptimizer::new(&OptimizerConfig::default(), 3.0);
        let targets = PerformanceTargets::from_parameters(&ControllerParameters::default(), true);
        let err = optimizer
            .optimize(&PlantParameters::default(), &targets, &mut history)
            .unwrap_err();
        assert!(matches!(err, OptimizerError::MissingData(HistoryError::NoSamples)));
    }
}
