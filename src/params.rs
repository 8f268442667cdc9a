// src/params.rs - Plant and controller parameter sets, versioned snapshots
use serde::{Deserialize, Serialize};

/// Heater supply voltage (V).
pub const HEATER_VOLTAGE: f64 = 12.0;
/// Heater current draw (A).
pub const HEATER_CURRENT: f64 = 10.45;

/// Thermal constants of the four-parameter incubator model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlantParameters {
    /// Heat capacity of the box air (J/K)
    pub c_air: f64,
    /// Conductance box -> room (W/K)
    pub g_box: f64,
    /// Heat capacity of the heater (J/K)
    pub c_heater: f64,
    /// Conductance heater -> box air (W/K)
    pub g_heater: f64,
}

impl PlantParameters {
    pub fn new(c_air: f64, g_box: f64, c_heater: f64, g_heater: f64) -> Self {
        Self { c_air, g_box, c_heater, g_heater }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.c_air, self.g_box, self.c_heater, self.g_heater]
    }

    pub fn from_slice(values: &[f64]) -> Option<Self> {
        match values {
            [c_air, g_box, c_heater, g_heater] => Some(Self::new(*c_air, *g_box, *c_heater, *g_heater)),
            _ => None,
        }
    }

    /// All four constants are finite and strictly positive.
    pub fn is_physical(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite() && *v > 0.0)
    }
}

impl Default for PlantParameters {
    fn default() -> Self {
        Self {
            c_air: 145.69782402776782,
            g_box: 0.79154106,
            c_heater: 227.76228512,
            g_heater: 1.92343277,
        }
    }
}

/// Duty-cycle settings plus the bounds the controller is tuned against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControllerParameters {
    /// Samples per period with the heater on
    pub heating_time: u32,
    /// Samples per period with the heater off
    pub heating_gap: u32,
    pub lower_bound: f64,
    pub temperature_desired: f64,
    pub max_heater_temperature: f64,
}

impl ControllerParameters {
    pub fn heating_period(&self) -> u32 {
        self.heating_time + self.heating_gap
    }

    /// Copy of `self` with a new duty cycle, keeping the bounds.
    pub fn with_duty_cycle(&self, heating_time: u32, heating_gap: u32) -> Self {
        Self { heating_time, heating_gap, ..*self }
    }

    pub fn same_duty_cycle(&self, other: &Self) -> bool {
        self.heating_time == other.heating_time && self.heating_gap == other.heating_gap
    }
}

impl Default for ControllerParameters {
    fn default() -> Self {
        Self {
            heating_time: 5,
            heating_gap: 35,
            lower_bound: 5.0,
            temperature_desired: 35.0,
            max_heater_temperature: 60.0,
        }
    }
}

/// An immutable parameter set together with when and in which order it was committed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub committed_at: f64,
    pub value: T,
}

/// Append-only log of committed snapshots. Readers always see the latest entry.
#[derive(Debug, Clone)]
pub struct ParameterLog<T> {
    entries: Vec<Versioned<T>>,
}

impl<T: Copy> ParameterLog<T> {
    pub fn new(initial: T, committed_at: f64) -> Self {
        Self {
            entries: vec![Versioned { version: 0, committed_at, value: initial }],
        }
    }

    /// Supersedes the current snapshot. Returns the new version number.
    pub fn commit(&mut self, committed_at: f64, value: T) -> u64 {
        let version = self.latest().version + 1;
        self.entries.push(Versioned { version, committed_at, value });
        version
    }

    pub fn latest(&self) -> &Versioned<T> {
        // never empty: constructed with an initial entry
        &self.entries[self.entries.len() - 1]
    }

    pub fn history(&self) -> &[Versioned<T>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_supersedes_without_mutation() {
        let mut log = ParameterLog::new(PlantParameters::default(), 0.0);
        let first = *log.latest();
        let mut changed = first.value;
        changed.g_box *= 10.0;
        let v = log.commit(1000.0, changed);
        assert_eq!(v, 1);
        assert_eq!(log.latest().value.g_box, changed.g_box);
        assert_eq!(log.history()[0], first);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_physical_check() {
        assert!(PlantParameters::default().is_physical());
        assert!(!PlantParameters::new(1.0, 0.0, 1.0, 1.0).is_physical());
        assert!(!PlantParameters::new(f64::NAN, 1.0, 1.0, 1.0).is_physical());
    }
}
