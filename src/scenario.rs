// src/scenario.rs - Built-in disturbance scenarios for the simulated incubator
use crate::config::{Config, DisturbanceConfig, PlantParameterName};

#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    pub disturbances: Vec<DisturbanceConfig>,
}

impl Scenario {
    /// Replaces the configured disturbance schedule with this scenario's.
    pub fn apply(&self, config: &mut Config) {
        config.disturbances = self.disturbances.clone();
    }
}

pub fn builtin_scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "baseline",
            description: "Matched model, no disturbance",
            disturbances: Vec::new(),
        },
        Scenario {
            name: "g-box-step",
            description: "G_box x10 at t=1000s, restored at t=2000s",
            disturbances: vec![
                DisturbanceConfig { time: 1000.0, parameter: PlantParameterName::GBox, factor: 10.0 },
                DisturbanceConfig { time: 2000.0, parameter: PlantParameterName::GBox, factor: 0.1 },
            ],
        },
    ]
}

pub fn find_scenario(name: &str) -> Option<Scenario> {
    builtin_scenarios().into_iter().find(|s| s.name == name)
}
