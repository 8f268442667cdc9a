//! Kalman filter over the linearized four-parameter incubator model.
//!
//! State `x = [T_heater, T_box]`, input `u = [heater_on, T_room]`. Only the box
//! temperature is measured. The continuous model is discretized with the
//! backward-difference rule `M = (I - dt A)^-1`:
//!
//! ```text
//! F = M    B = M dt Bc    H = C M    D = H dt Bc
//! ```
//!
//! `H` and `D` map the state at the start of an interval and the input held
//! over it to the measurement at its end, so `H x + D u == C (F x + B u)`.
//! The gain is computed against `C`, the observation of the predicted state.

use nalgebra::{Matrix2, RowVector2, Vector2};
use serde::Serialize;
use thiserror::Error;

use crate::params::{HEATER_CURRENT, HEATER_VOLTAGE, PlantParameters};

const INITIAL_COVARIANCE: f64 = 100.0;

fn observation() -> RowVector2<f64> {
    RowVector2::new(0.0, 1.0)
}

#[derive(Debug, Error, PartialEq)]
pub enum EstimatorError {
    #[error("Invalid plant parameters for linearization: {0:?}")]
    InvalidParameters(PlantParameters),
    #[error("Invalid estimator setting: {0}")]
    InvalidSetting(String),
    #[error("Singular system: I - dt*A is not invertible")]
    SingularSystem,
    #[error("Unstable discretization: spectral radius {spectral_radius:.4} >= 1")]
    UnstableDiscretization { spectral_radius: f64 },
    #[error("Innovation covariance is not positive: {0}")]
    DegenerateInnovation(f64),
}

/// Discrete-time system matrices derived from one parameter set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscreteSystem {
    pub f: Matrix2<f64>,
    pub b: Matrix2<f64>,
    pub h: RowVector2<f64>,
    pub d: RowVector2<f64>,
}

impl DiscreteSystem {
    pub fn linearize(params: &PlantParameters, dt: f64) -> Result<Self, EstimatorError> {
        if !params.is_physical() {
            return Err(EstimatorError::InvalidParameters(*params));
        }
        let PlantParameters { c_air, g_box, c_heater, g_heater } = *params;

        let a = Matrix2::new(
            -g_heater / c_heater, g_heater / c_heater,
            g_heater / c_air, -(g_heater + g_box) / c_air,
        );
        let bc = Matrix2::new(
            HEATER_VOLTAGE * HEATER_CURRENT / c_heater, 0.0,
            0.0, g_box / c_air,
        );
        let c = observation();

        let m = (Matrix2::identity() - a * dt)
            .try_inverse()
            .ok_or(EstimatorError::SingularSystem)?;

        let f = m;
        let spectral_radius = spectral_radius(&f);
        if !spectral_radius.is_finite() || spectral_radius >= 1.0 {
            return Err(EstimatorError::UnstableDiscretization { spectral_radius });
        }

        let b = m * bc * dt;
        let h = c * m;
        let d = h * bc * dt;
        Ok(Self { f, b, h, d })
    }
}

fn spectral_radius(m: &Matrix2<f64>) -> f64 {
    let half_trace = m.trace() / 2.0;
    let det = m.determinant();
    let disc = half_trace * half_trace - det;
    if disc >= 0.0 {
        let root = disc.sqrt();
        (half_trace + root).abs().max((half_trace - root).abs())
    } else {
        // complex pair: |lambda|^2 = det
        det.sqrt()
    }
}

/// Posterior estimate for one control step, with the prediction it was built from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StateEstimate {
    pub time: f64,
    pub t_box: f64,
    pub t_heater: f64,
    pub t_box_prior: f64,
    pub t_heater_prior: f64,
    pub covariance: [[f64; 2]; 2],
}

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    step_size: f64,
    params: PlantParameters,
    system: DiscreteSystem,
    x: Vector2<f64>,
    p: Matrix2<f64>,
    q: Matrix2<f64>,
    r: f64,
}

impl KalmanFilter {
    pub fn new(
        step_size: f64,
        std_dev: f64,
        params: &PlantParameters,
        initial_heater_temperature: f64,
        initial_box_temperature: f64,
    ) -> Result<Self, EstimatorError> {
        if !(step_size.is_finite() && step_size > 0.0) {
            return Err(EstimatorError::InvalidSetting(format!("step_size must be > 0, got {}", step_size)));
        }
        if !(std_dev.is_finite() && std_dev > 0.0) {
            return Err(EstimatorError::InvalidSetting(format!("std_dev must be > 0, got {}", std_dev)));
        }
        let system = DiscreteSystem::linearize(params, step_size)?;
        Ok(Self {
            step_size,
            params: *params,
            system,
            x: Vector2::new(initial_heater_temperature, initial_box_temperature),
            p: Matrix2::identity() * INITIAL_COVARIANCE,
            q: discrete_white_noise(step_size, std_dev * std_dev),
            r: std_dev,
        })
    }

    /// One predict/update cycle. `time` only stamps the returned estimate.
    pub fn predict_update(
        &mut self,
        time: f64,
        heater_on: bool,
        room_temperature: f64,
        measured_box_temperature: f64,
    ) -> Result<StateEstimate, EstimatorError> {
        let sys = &self.system;
        let u = Vector2::new(if heater_on { 1.0 } else { 0.0 }, room_temperature);

        let c = observation();

        // predict
        let x_prior = sys.f * self.x + sys.b * u;
        let p_prior = sys.f * self.p * sys.f.transpose() + self.q;

        // update
        let predicted = (sys.h * self.x)[(0, 0)] + (sys.d * u)[(0, 0)];
        let innovation = measured_box_temperature - predicted;
        let s = (c * p_prior * c.transpose())[(0, 0)] + self.r;
        if !(s.is_finite() && s > 0.0) {
            return Err(EstimatorError::DegenerateInnovation(s));
        }
        let k = p_prior * c.transpose() / s;
        self.x = x_prior + k * innovation;
        let i_kh = Matrix2::identity() - k * c;
        self.p = i_kh * p_prior * i_kh.transpose() + k * k.transpose() * self.r;

        Ok(StateEstimate {
            time,
            t_box: self.x[1],
            t_heater: self.x[0],
            t_box_prior: x_prior[1],
            t_heater_prior: x_prior[0],
            covariance: [[self.p[(0, 0)], self.p[(0, 1)]], [self.p[(1, 0)], self.p[(1, 1)]]],
        })
    }

    /// Re-linearizes around `params`. The state and covariance carry over.
    pub fn update_parameters(&mut self, params: &PlantParameters) -> Result<(), EstimatorError> {
        let system = DiscreteSystem::linearize(params, self.step_size)?;
        tracing::info!(
            "Updating Kalman filter parameters: C_air={:.3}, G_box={:.4}, C_heater={:.3}, G_heater={:.4}",
            params.c_air, params.g_box, params.c_heater, params.g_heater
        );
        self.system = system;
        self.params = *params;
        Ok(())
    }

    pub fn system(&self) -> &DiscreteSystem {
        &self.system
    }

    pub fn parameters(&self) -> &PlantParameters {
        &self.params
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    /// Current posterior `(T_heater, T_box)`.
    pub fn state(&self) -> (f64, f64) {
        (self.x[0], self.x[1])
    }
}

/// Piecewise white-noise acceleration model for a 2-state system.
fn discrete_white_noise(dt: f64, var: f64) -> Matrix2<f64> {
    Matrix2::new(
        dt.powi(4) / 4.0, dt.powi(3) / 2.0,
        dt.powi(3) / 2.0, dt.powi(2),
    ) * var
}
