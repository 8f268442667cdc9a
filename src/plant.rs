// src/plant.rs - Four-parameter thermal model and forward simulation
use serde::Serialize;

use crate::controller::DutyCycleController;
use crate::params::{HEATER_CURRENT, HEATER_VOLTAGE, PlantParameters};

/// Longest single integration step (seconds). Longer intervals are split.
const MAX_SUBSTEP: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlantState {
    pub t_box: f64,
    pub t_heater: f64,
}

/// Inputs driving an open-loop simulation. Entry `i` of `heater_on` and
/// `room_temperature` is held over `[times[i], times[i + 1])`.
#[derive(Debug, Clone, Default)]
pub struct DrivingInputs {
    pub times: Vec<f64>,
    pub heater_on: Vec<bool>,
    pub room_temperature: Vec<f64>,
}

impl DrivingInputs {
    pub fn intervals(&self) -> usize {
        self.times
            .len()
            .saturating_sub(1)
            .min(self.heater_on.len())
            .min(self.room_temperature.len())
    }
}

/// Fixed simulation grid: `steps` samples of `dt` seconds from `start_time`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Horizon {
    pub start_time: f64,
    pub dt: f64,
    pub steps: usize,
}

/// Simulated temperatures on a time grid. `heater_on[i]` is the input held over
/// the interval ending at `times[i]` (false for the initial point).
#[derive(Debug, Clone, Default, Serialize)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub t_box: Vec<f64>,
    pub t_heater: Vec<f64>,
    pub heater_on: Vec<bool>,
}

impl Trajectory {
    fn start(time: f64, state: PlantState, capacity: usize) -> Self {
        let mut trajectory = Self {
            times: Vec::with_capacity(capacity),
            t_box: Vec::with_capacity(capacity),
            t_heater: Vec::with_capacity(capacity),
            heater_on: Vec::with_capacity(capacity),
        };
        trajectory.push(time, state, false);
        trajectory
    }

    fn push(&mut self, time: f64, state: PlantState, heater_on: bool) {
        self.times.push(time);
        self.t_box.push(state.t_box);
        self.t_heater.push(state.t_heater);
        self.heater_on.push(heater_on);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn max_heater_temperature(&self) -> f64 {
        self.t_heater.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Right-hand side of the plant ODE: (dT_box/dt, dT_heater/dt).
pub fn derivatives(params: &PlantParameters, state: PlantState, heater_on: bool, room_temperature: f64) -> (f64, f64) {
    let power_in = if heater_on { HEATER_VOLTAGE * HEATER_CURRENT } else { 0.0 };
    let heater_to_box = params.g_heater * (state.t_heater - state.t_box);
    let box_to_room = params.g_box * (state.t_box - room_temperature);
    let d_box = (heater_to_box - box_to_room) / params.c_air;
    let d_heater = (power_in - heater_to_box) / params.c_heater;
    (d_box, d_heater)
}

/// Advances the plant by `dt` seconds with inputs held constant (classic RK4).
pub fn integrate(params: &PlantParameters, state: PlantState, heater_on: bool, room_temperature: f64, dt: f64) -> PlantState {
    if dt <= 0.0 {
        return state;
    }
    let substeps = (dt / MAX_SUBSTEP).ceil().max(1.0) as usize;
    let h = dt / substeps as f64;
    let mut s = state;
    for _ in 0..substeps {
        let offset = |base: PlantState, k: (f64, f64), scale: f64| PlantState {
            t_box: base.t_box + k.0 * scale,
            t_heater: base.t_heater + k.1 * scale,
        };
        let k1 = derivatives(params, s, heater_on, room_temperature);
        let k2 = derivatives(params, offset(s, k1, h / 2.0), heater_on, room_temperature);
        let k3 = derivatives(params, offset(s, k2, h / 2.0), heater_on, room_temperature);
        let k4 = derivatives(params, offset(s, k3, h), heater_on, room_temperature);
        s = PlantState {
            t_box: s.t_box + h / 6.0 * (k1.0 + 2.0 * k2.0 + 2.0 * k3.0 + k4.0),
            t_heater: s.t_heater + h / 6.0 * (k1.1 + 2.0 * k2.1 + 2.0 * k3.1 + k4.1),
        };
    }
    s
}

/// Forward model used by the calibrator and the controller optimizer.
pub trait PlantSimulator {
    /// Advances one interval with constant inputs.
    fn step(&self, params: &PlantParameters, state: PlantState, heater_on: bool, room_temperature: f64, dt: f64) -> PlantState;

    /// Open-loop run over the input time grid, seeded with `initial` at `inputs.times[0]`.
    fn simulate(&self, params: &PlantParameters, initial: PlantState, inputs: &DrivingInputs) -> Trajectory {
        let intervals = inputs.intervals();
        let start = inputs.times.first().copied().unwrap_or(0.0);
        let mut trajectory = Trajectory::start(start, initial, intervals + 1);
        let mut state = initial;
        for i in 0..intervals {
            let dt = inputs.times[i + 1] - inputs.times[i];
            state = self.step(params, state, inputs.heater_on[i], inputs.room_temperature[i], dt);
            trajectory.push(inputs.times[i + 1], state, inputs.heater_on[i]);
        }
        trajectory
    }

    /// Plant and duty-cycle controller evolved together over `horizon`.
    fn simulate_closed_loop(
        &self,
        params: &PlantParameters,
        initial: PlantState,
        controller: &mut dyn DutyCycleController,
        room_temperature: f64,
        horizon: Horizon,
    ) -> Trajectory {
        let mut trajectory = Trajectory::start(horizon.start_time, initial, horizon.steps + 1);
        let mut state = initial;
        for k in 0..horizon.steps {
            let heater_on = controller.heater_on(state.t_box);
            state = self.step(params, state, heater_on, room_temperature, horizon.dt);
            trajectory.push(horizon.start_time + (k + 1) as f64 * horizon.dt, state, heater_on);
        }
        trajectory
    }
}

/// RK4 integration of the four-parameter model.
#[derive(Debug, Clone, Copy, Default)]
pub struct FourParameterSimulator;

impl PlantSimulator for FourParameterSimulator {
    fn step(&self, params: &PlantParameters, state: PlantState, heater_on: bool, room_temperature: f64, dt: f64) -> PlantState {
        integrate(params, state, heater_on, room_temperature, dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::OpenLoopController;

    #[test]
    fn test_equilibrium_is_stationary() {
        let params = PlantParameters::default();
        let state = PlantState { t_box: 21.0, t_heater: 21.0 };
        let next = integrate(&params, state, false, 21.0, 3.0);
        assert!((next.t_box - 21.0).abs() < 1e-12);
        assert!((next.t_heater - 21.0).abs() < 1e-12);
    }

    #[test]
    fn test_heater_warms_box() {
        let params = PlantParameters::default();
        let mut state = PlantState { t_box: 21.0, t_heater: 21.0 };
        for _ in 0..100 {
            state = integrate(&params, state, true, 21.0, 3.0);
        }
        assert!(state.t_heater > state.t_box);
        assert!(state.t_box > 21.0);
    }

    #[test]
    fn test_closed_loop_matches_open_loop_replay() {
        let sim = FourParameterSimulator;
        let params = PlantParameters::default();
        let initial = PlantState { t_box: 30.0, t_heater: 35.0 };
        let mut ctrl = OpenLoopController::new(3, 10);
        let horizon = Horizon { start_time: 0.0, dt: 3.0, steps: 50 };
        let closed = sim.simulate_closed_loop(&params, initial, &mut ctrl, 21.0, horizon);

        let inputs = DrivingInputs {
            times: closed.times.clone(),
            heater_on: closed.heater_on[1..].to_vec(),
            room_temperature: vec![21.0; 50],
        };
        let open = sim.simulate(&params, initial, &inputs);
        assert_eq!(open.t_box, closed.t_box);
        assert_eq!(open.t_heater, closed.t_heater);
    }
}
