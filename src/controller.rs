// src/controller.rs - Duty-cycle heater controller
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Invalid duty cycle: heating_time={heating_time}, period={period}")]
    InvalidDutyCycle { heating_time: u32, period: u32 },
}

/// Decides the heater command once per control step.
pub trait DutyCycleController {
    fn heater_on(&mut self, box_temperature: f64) -> bool;
}

/// Live controller that accepts new duty-cycle settings from the supervisor.
pub trait ParametricController {
    fn set_new_parameters(&mut self, heating_time: u32, heating_period: u32) -> Result<(), ControllerError>;
}

/// Open-loop duty cycle: heater on for the first `heating_time` samples of
/// every `period` samples, independent of the measured temperature.
#[derive(Debug, Clone)]
pub struct OpenLoopController {
    heating_time: u32,
    period: u32,
    sample: u32,
}

impl OpenLoopController {
    pub fn new(heating_time: u32, period: u32) -> Self {
        Self {
            heating_time: heating_time.min(period),
            period: period.max(1),
            sample: 0,
        }
    }

    pub fn heating_time(&self) -> u32 {
        self.heating_time
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    pub fn duty(&self) -> f64 {
        self.heating_time as f64 / self.period as f64
    }
}

impl DutyCycleController for OpenLoopController {
    fn heater_on(&mut self, _box_temperature: f64) -> bool {
        let on = self.sample < self.heating_time;
        self.sample = (self.sample + 1) % self.period;
        on
    }
}

impl ParametricController for OpenLoopController {
    fn set_new_parameters(&mut self, heating_time: u32, heating_period: u32) -> Result<(), ControllerError> {
        if heating_period == 0 || heating_time > heating_period {
            return Err(ControllerError::InvalidDutyCycle { heating_time, period: heating_period });
        }
        tracing::info!("Controller duty cycle set: {} on / {} samples", heating_time, heating_period);
        self.heating_time = heating_time;
        self.period = heating_period;
        self.sample = 0;
        Ok(())
    }
}
