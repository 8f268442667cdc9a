// src/calibration.rs - Re-fits the four plant parameters to a window of recorded samples
use serde::Serialize;
use thiserror::Error;

use crate::config::CalibrationConfig;
use crate::history::{HistoryError, HistoryPort};
use crate::optimize::{self, NelderMeadOptions, OptimizeError};
use crate::params::PlantParameters;
use crate::plant::{FourParameterSimulator, PlantSimulator};

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Missing data: {0}")]
    MissingData(#[from] HistoryError),
    #[error("Too few samples in [{t_start:.1}s, {t_end:.1}s]: {samples} (need at least 2)")]
    TooFewSamples { t_start: f64, t_end: f64, samples: usize },
    #[error("Search failed: {0}")]
    Search(#[from] OptimizeError),
}

impl CalibrationError {
    /// Data-availability failures abort an attempt; anything else is a bug or bad setup.
    pub fn is_missing_data(&self) -> bool {
        matches!(self, CalibrationError::MissingData(_) | CalibrationError::TooFewSamples { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeWindow {
    pub t_start: f64,
    pub t_end: f64,
}

/// Terminal result of one calibration attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationJob {
    pub window: TimeWindow,
    pub initial_guess: PlantParameters,
    pub result: PlantParameters,
    pub converged: bool,
    pub iterations: usize,
    pub cost: f64,
}

pub trait Calibrate {
    fn calibrate(&mut self, window: TimeWindow, history: &mut dyn HistoryPort) -> Result<CalibrationJob, CalibrationError>;
}

/// Nelder–Mead fit of the box temperature over a recorded window.
///
/// The simplex moves in `ln(parameter)` space: positivity holds by
/// construction, all four constants share one scale, and `conv_xatol` acts as
/// a relative tolerance on the parameters.
#[derive(Debug, Clone)]
pub struct Calibrator<S: PlantSimulator = FourParameterSimulator> {
    simulator: S,
    options: NelderMeadOptions,
}

impl Calibrator<FourParameterSimulator> {
    pub fn new(config: &CalibrationConfig) -> Self {
        Self::with_simulator(FourParameterSimulator, config)
    }
}

impl<S: PlantSimulator> Calibrator<S> {
    pub fn with_simulator(simulator: S, config: &CalibrationConfig) -> Self {
        Self {
            simulator,
            options: config.search_options(),
        }
    }
}

fn parameters_from_log(y: &[f64]) -> Option<PlantParameters> {
    let values: Vec<f64> = y.iter().map(|v| v.exp()).collect();
    PlantParameters::from_slice(&values)
}

impl<S: PlantSimulator> Calibrate for Calibrator<S> {
    fn calibrate(&mut self, window: TimeWindow, history: &mut dyn HistoryPort) -> Result<CalibrationJob, CalibrationError> {
        let signals = history.get_plant_signals_between(window.t_start, window.t_end)?;
        let samples = signals.samples();
        if samples.len() < 2 {
            return Err(CalibrationError::TooFewSamples {
                t_start: window.t_start,
                t_end: window.t_end,
                samples: samples.len(),
            });
        }
        let inputs = signals.driving_inputs();
        let initial_state = samples[0].state();
        let measured: Vec<f64> = samples.iter().map(|s| s.t_box).collect();
        let initial_guess = history.get_plant4_parameters().value;

        tracing::info!(
            "Calibrating plant over [{:.1}s, {:.1}s] ({} samples)",
            window.t_start, window.t_end, samples.len()
        );

        let simulator = &self.simulator;
        let cost = |y: &[f64]| match parameters_from_log(y) {
            Some(params) if params.is_physical() => {
                let trajectory = simulator.simulate(&params, initial_state, &inputs);
                trajectory
                    .t_box
                    .iter()
                    .zip(&measured)
                    .map(|(sim, meas)| (sim - meas).powi(2))
                    .sum::<f64>()
            }
            _ => f64::INFINITY,
        };
        let start = initial_guess.to_array().map(f64::ln);
        let minimum = optimize::minimize(cost, &start, &self.options)?;
        let result = parameters_from_log(&minimum.x)
            .filter(PlantParameters::is_physical)
            .unwrap_or(initial_guess);

        // kept regardless of convergence, for inspection
        history.store_calibrated_trajectory(self.simulator.simulate(&result, initial_state, &inputs));

        if minimum.converged {
            tracing::info!(
                "Calibration converged after {} iterations (cost {:.4e}): C_air={:.3}, G_box={:.4}, C_heater={:.3}, G_heater={:.4}",
                minimum.iterations, minimum.value, result.c_air, result.g_box, result.c_heater, result.g_heater
            );
        } else {
            tracing::warn!(
                "Calibration did not converge after {} iterations (cost {:.4e})",
                minimum.iterations, minimum.value
            );
        }

        Ok(CalibrationJob {
            window,
            initial_guess,
            result,
            converged: minimum.converged,
            iterations: minimum.iterations,
            cost: minimum.value,
        })
    }
}
