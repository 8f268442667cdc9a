// Integration tests for the controller supervisor against the simulated incubator

#[cfg(test)]
mod tests {
    use incubator_twin::config::{OptimizerConfig, SupervisorConfig};
    use incubator_twin::controller::OpenLoopController;
    use incubator_twin::plant::PlantState;
    use incubator_twin::simulator::{PlantInterface, SimulatedIncubator};
    use incubator_twin::supervisor::OptimizationReason;
    use incubator_twin::{
        ControllerOptimizer, ControllerParameters, HistoryPort, InMemoryHistory, NoOpControllerOptimizer,
        OptimizeController, PlantParameters, Supervisor, SupervisorOutcome, SupervisorState,
    };

    const DT: f64 = 3.0;

    fn supervisor_config() -> SupervisorConfig {
        SupervisorConfig {
            wait_til_supervising_timer: 20,
            performance_window: 10,
            trigger_optimization_threshold: 1.0,
            restrict_t_heater: true,
            optimize_on_recalibration: true,
        }
    }

    /// Plant and history starting at (41, 47) under a 1-on/39-off duty cycle,
    /// far too weak to hold 35C.
    fn weak_heating(max_heater_temperature: f64) -> (SimulatedIncubator, InMemoryHistory) {
        let mut plant = SimulatedIncubator::new(
            PlantParameters::default(),
            PlantState { t_box: 41.0, t_heater: 47.0 },
            21.0,
            OpenLoopController::new(1, 40),
        );
        let ctrl = ControllerParameters {
            heating_time: 1,
            heating_gap: 39,
            max_heater_temperature,
            ..ControllerParameters::default()
        };
        let mut history = InMemoryHistory::new(PlantParameters::default(), ctrl);
        history.record_plant_sample(plant.current_sample());
        (plant, history)
    }

    fn advance<O: OptimizeController>(
        supervisor: &mut Supervisor<O>,
        plant: &mut SimulatedIncubator,
        history: &mut InMemoryHistory,
    ) -> (f64, Option<SupervisorOutcome>) {
        let sample = plant.advance(DT);
        history.record_plant_sample(sample);
        let outcome = supervisor.step(sample.time, &sample, history, plant).unwrap();
        (sample.time, outcome)
    }

    #[test]
    fn test_waits_before_monitoring() {
        let (mut plant, mut history) = weak_heating(60.0);
        let mut supervisor = Supervisor::new(&supervisor_config(), DT, NoOpControllerOptimizer);
        assert_eq!(supervisor.state(), SupervisorState::Idle);

        advance(&mut supervisor, &mut plant, &mut history);
        assert_eq!(supervisor.state(), SupervisorState::WaitingToSupervise);

        // waiting started at t=3, so monitoring begins at t=3 + 20*3
        for _ in 0..19 {
            let (time, _) = advance(&mut supervisor, &mut plant, &mut history);
            assert!(time < 63.0);
            assert_eq!(supervisor.state(), SupervisorState::WaitingToSupervise);
        }
        let (time, _) = advance(&mut supervisor, &mut plant, &mut history);
        assert_eq!(time, 63.0);
        assert_eq!(supervisor.state(), SupervisorState::Monitoring);
        assert!(supervisor.mean_tracking_error().is_none());
    }

    #[test]
    fn test_wait_counts_steps_with_fractional_step_size() {
        let dt = 0.1;
        let (mut plant, mut history) = weak_heating(60.0);
        let mut supervisor = Supervisor::new(&supervisor_config(), dt, NoOpControllerOptimizer);
        let mut step = |supervisor: &mut Supervisor<NoOpControllerOptimizer>| {
            let sample = plant.advance(dt);
            history.record_plant_sample(sample);
            supervisor.step(sample.time, &sample, &mut history, &mut plant).unwrap();
            supervisor.state()
        };

        assert_eq!(step(&mut supervisor), SupervisorState::WaitingToSupervise);
        for _ in 2..=20 {
            assert_eq!(step(&mut supervisor), SupervisorState::WaitingToSupervise);
        }
        assert_eq!(step(&mut supervisor), SupervisorState::Monitoring);
    }

    #[test]
    fn test_hot_heater_triggers_once_until_parameters_change() {
        let mut plant = SimulatedIncubator::new(
            PlantParameters::default(),
            PlantState { t_box: 41.0, t_heater: 70.0 },
            21.0,
            OpenLoopController::new(20, 21),
        );
        let ctrl = ControllerParameters {
            heating_time: 20,
            heating_gap: 1,
            max_heater_temperature: 45.0,
            ..ControllerParameters::default()
        };
        let mut history = InMemoryHistory::new(PlantParameters::default(), ctrl);
        history.record_plant_sample(plant.current_sample());
        let config = SupervisorConfig { wait_til_supervising_timer: 0, ..supervisor_config() };
        let mut supervisor = Supervisor::new(&config, DT, NoOpControllerOptimizer);

        let triggers = (0..40)
            .filter_map(|_| advance(&mut supervisor, &mut plant, &mut history).1)
            .filter(|o| matches!(o, SupervisorOutcome::Triggered { .. }))
            .count();
        assert_eq!(triggers, 1);
        assert_eq!(supervisor.optimization_count(), 1);
        assert_eq!(supervisor.state(), SupervisorState::Monitoring);

        // a recalibrated plant model is worth another attempt
        history.store_new_plant_parameters(plant.time(), PlantParameters::default());
        assert_eq!(
            advance(&mut supervisor, &mut plant, &mut history).1,
            Some(SupervisorOutcome::Triggered { reason: OptimizationReason::HeaterOverTemperature })
        );
    }

    #[test]
    fn test_poor_tracking_commits_new_duty_cycle() {
        let (mut plant, mut history) = weak_heating(60.0);
        let optimizer = ControllerOptimizer::new(&OptimizerConfig::default(), DT);
        let mut supervisor = Supervisor::new(&supervisor_config(), DT, optimizer);

        let mut triggered_at = None;
        let mut committed = None;
        for _ in 0..60 {
            let (time, outcome) = advance(&mut supervisor, &mut plant, &mut history);
            match outcome {
                Some(SupervisorOutcome::Triggered { reason }) => {
                    assert_eq!(reason, OptimizationReason::PoorTracking);
                    assert_eq!(supervisor.state(), SupervisorState::TriggeringOptimization);
                    triggered_at = Some(time);
                }
                Some(SupervisorOutcome::Committed { job, version }) => {
                    committed = Some((time, job, version));
                    break;
                }
                Some(other) => panic!("unexpected outcome {:?}", other),
                None => {}
            }
        }

        // monitoring from t=63; the 10-sample window first fills at t=93
        assert_eq!(triggered_at, Some(93.0));
        let (time, job, version) = committed.expect("optimization should commit");
        assert_eq!(time, 96.0);
        assert_eq!(version, 1);
        assert!(job.converged);
        assert!(!job.result.same_duty_cycle(&job.initial_guess));
        assert!(job.result.heating_time > 1);

        let latest = history.get_ctrl_parameters();
        assert_eq!(latest.version, 1);
        assert_eq!(latest.value, job.result);
        assert_eq!(plant.controller().heating_time(), job.result.heating_time);
        assert_eq!(plant.controller().period(), job.result.heating_period());
        assert_eq!(history.optimal_policies().len(), 1);

        assert_eq!(supervisor.state(), SupervisorState::Monitoring);
        assert_eq!(supervisor.optimization_count(), 1);
        assert!(supervisor.mean_tracking_error().is_none());
    }

    #[test]
    fn test_declined_optimization_retains_parameters() {
        let (mut plant, mut history) = weak_heating(60.0);
        let mut supervisor = Supervisor::new(&supervisor_config(), DT, NoOpControllerOptimizer);

        let outcomes: Vec<SupervisorOutcome> = (0..40)
            .filter_map(|_| advance(&mut supervisor, &mut plant, &mut history).1)
            .collect();

        assert!(matches!(outcomes[0], SupervisorOutcome::Triggered { .. }));
        assert!(matches!(outcomes[1], SupervisorOutcome::Retained { .. }));
        assert_eq!(history.get_ctrl_parameters().version, 0);
        assert_eq!(plant.controller().heating_time(), 1);
        assert_eq!(plant.controller().period(), 40);
    }

    #[test]
    fn test_heater_over_temperature_triggers_immediately() {
        let (mut plant, mut history) = weak_heating(45.0);
        let config = SupervisorConfig { wait_til_supervising_timer: 0, ..supervisor_config() };
        let mut supervisor = Supervisor::new(&config, DT, NoOpControllerOptimizer);

        // t=3 starts waiting, t=6 starts monitoring, t=9 sees the 47C heater
        assert_eq!(advance(&mut supervisor, &mut plant, &mut history).1, None);
        assert_eq!(advance(&mut supervisor, &mut plant, &mut history).1, None);
        assert_eq!(
            advance(&mut supervisor, &mut plant, &mut history).1,
            Some(SupervisorOutcome::Triggered { reason: OptimizationReason::HeaterOverTemperature })
        );
    }

    #[test]
    fn test_unrestricted_heater_is_ignored() {
        let (mut plant, mut history) = weak_heating(45.0);
        let config = SupervisorConfig {
            wait_til_supervising_timer: 0,
            restrict_t_heater: false,
            trigger_optimization_threshold: 100.0,
            ..supervisor_config()
        };
        let mut supervisor = Supervisor::new(&config, DT, NoOpControllerOptimizer);
        for _ in 0..30 {
            assert_eq!(advance(&mut supervisor, &mut plant, &mut history).1, None);
        }
        assert_eq!(supervisor.state(), SupervisorState::Monitoring);
        assert!(supervisor.mean_tracking_error().is_some_and(|e| e > 1.0));
    }

    #[test]
    fn test_recalibration_reoptimizes_then_waits() {
        let (mut plant, mut history) = weak_heating(60.0);
        let optimizer = ControllerOptimizer::new(&OptimizerConfig::default(), DT);
        let mut supervisor = Supervisor::new(&supervisor_config(), DT, optimizer);
        advance(&mut supervisor, &mut plant, &mut history);

        let now = plant.time();
        let outcome = supervisor.on_plant_recalibrated(now, &mut history, &mut plant).unwrap();
        assert!(matches!(outcome, Some(SupervisorOutcome::Committed { version: 1, .. })));
        assert_eq!(supervisor.state(), SupervisorState::WaitingToSupervise);
        assert_eq!(supervisor.optimization_count(), 1);
    }

    #[test]
    fn test_recalibration_hook_can_be_disabled() {
        let (mut plant, mut history) = weak_heating(60.0);
        let config = SupervisorConfig { optimize_on_recalibration: false, ..supervisor_config() };
        let mut supervisor = Supervisor::new(&config, DT, NoOpControllerOptimizer);
        let now = plant.time();
        assert_eq!(supervisor.on_plant_recalibrated(now, &mut history, &mut plant).unwrap(), None);
        assert_eq!(supervisor.state(), SupervisorState::Idle);
        assert_eq!(supervisor.optimization_count(), 0);
    }
}
