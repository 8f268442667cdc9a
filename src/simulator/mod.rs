pub mod event_queue;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{Config, DisturbanceConfig};
use crate::controller::{ControllerError, DutyCycleController, OpenLoopController, ParametricController};
use crate::history::PlantSample;
use crate::params::PlantParameters;
use crate::plant::{PlantState, integrate};
use crate::simulator::event_queue::{DisturbanceQueue, SimClock};

/// The physical side of the twin: one measured sample per control step, and a
/// duty-cycle controller that accepts new settings.
pub trait PlantInterface: ParametricController {
    fn time(&self) -> f64;
    /// Measurement of the current state, without advancing.
    fn current_sample(&mut self) -> PlantSample;
    /// Runs the controller and the plant over one interval of `dt` seconds.
    fn advance(&mut self, dt: f64) -> PlantSample;
}

/// Simulated incubator: the true plant, its open-loop controller, seeded
/// uniform sensor noise and a schedule of parameter disturbances.
pub struct SimulatedIncubator {
    params: PlantParameters,
    state: PlantState,
    room_temperature: f64,
    clock: SimClock,
    controller: OpenLoopController,
    disturbances: DisturbanceQueue,
    noise: f64,
    rng: StdRng,
}

impl SimulatedIncubator {
    pub fn new(params: PlantParameters, initial: PlantState, room_temperature: f64, controller: OpenLoopController) -> Self {
        tracing::info!(
            "Simulated incubator at T_box={:.2}C, T_heater={:.2}C, room {:.1}C",
            initial.t_box, initial.t_heater, room_temperature
        );
        Self {
            params,
            state: initial,
            room_temperature,
            clock: SimClock::new(0.0),
            controller,
            disturbances: DisturbanceQueue::new(),
            noise: 0.0,
            rng: StdRng::seed_from_u64(0),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let sim = &config.simulation;
        let ctrl = config.controller.parameters();
        Self::new(
            config.plant.parameters(),
            PlantState { t_box: sim.initial_box_temperature, t_heater: sim.initial_heater_temperature },
            sim.room_temperature,
            OpenLoopController::new(ctrl.heating_time, ctrl.heating_period()),
        )
        .with_disturbances(&config.disturbances)
        .with_noise(sim.measurement_noise, sim.seed)
    }

    pub fn with_disturbances(mut self, disturbances: &[DisturbanceConfig]) -> Self {
        for d in disturbances {
            self.disturbances.push(d.clone());
        }
        self
    }

    /// Uniform noise in `[-amplitude, amplitude]` on both measured temperatures.
    pub fn with_noise(mut self, amplitude: f64, seed: u64) -> Self {
        self.noise = amplitude.max(0.0);
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// True parameters currently driving the plant.
    pub fn parameters(&self) -> &PlantParameters {
        &self.params
    }

    pub fn set_parameters(&mut self, params: PlantParameters) {
        self.params = params;
    }

    /// Noise-free state.
    pub fn state(&self) -> PlantState {
        self.state
    }

    pub fn controller(&self) -> &OpenLoopController {
        &self.controller
    }

    pub fn pending_disturbances(&self) -> usize {
        self.disturbances.len()
    }

    fn measure(&mut self, value: f64) -> f64 {
        if self.noise > 0.0 {
            value + self.rng.random_range(-self.noise..=self.noise)
        } else {
            value
        }
    }
}

impl ParametricController for SimulatedIncubator {
    fn set_new_parameters(&mut self, heating_time: u32, heating_period: u32) -> Result<(), ControllerError> {
        self.controller.set_new_parameters(heating_time, heating_period)
    }
}

impl PlantInterface for SimulatedIncubator {
    fn time(&self) -> f64 {
        self.clock.current_time
    }

    fn current_sample(&mut self) -> PlantSample {
        let state = self.state;
        PlantSample {
            time: self.clock.current_time,
            t_box: self.measure(state.t_box),
            t_heater: self.measure(state.t_heater),
            heater_on: false,
            room_temperature: self.room_temperature,
        }
    }

    fn advance(&mut self, dt: f64) -> PlantSample {
        while let Some(d) = self.disturbances.pop_due(self.clock.current_time) {
            let next = d.apply(&self.params);
            tracing::info!(
                "Disturbance at {:.1}s: {:?} x{} (G_box {:.4} -> {:.4})",
                self.clock.current_time, d.parameter, d.factor, self.params.g_box, next.g_box
            );
            self.params = next;
        }

        let heater_on = self.controller.heater_on(self.state.t_box);
        self.state = integrate(&self.params, self.state, heater_on, self.room_temperature, dt);
        self.clock.advance(dt);

        let state = self.state;
        PlantSample {
            time: self.clock.current_time,
            t_box: self.measure(state.t_box),
            t_heater: self.measure(state.t_heater),
            heater_on,
            room_temperature: self.room_temperature,
        }
    }
}
