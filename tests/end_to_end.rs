// End-to-end runs of the simulated twin: disturbance, detection, recalibration

#[cfg(test)]
mod tests {
    use incubator_twin::export::{RunRecorder, StepRecord};
    use incubator_twin::scenario::find_scenario;
    use incubator_twin::simulator::PlantInterface;
    use incubator_twin::{AdaptationState, Config, HistoryPort, PlantParameters, build_simulated_twin};

    fn g_box_step_config() -> Config {
        let mut config = Config::default();
        find_scenario("g-box-step").unwrap().apply(&mut config);
        config
    }

    #[test]
    fn test_matched_model_never_opens_an_episode() {
        let config = Config::default();
        let mut twin = build_simulated_twin(&config).unwrap();
        let mut records: Vec<StepRecord> = Vec::new();
        let summary = twin.run_until(900.0, &mut records).unwrap();

        assert_eq!(summary.steps, 300);
        assert_eq!(records.len(), 300);
        assert_eq!(summary.anomaly_episodes, 0);
        assert_eq!(summary.calibrations, 0);
        assert!(records.iter().all(|r| r.adaptation_state == AdaptationState::Tracking));
        assert!(records.iter().all(|r| r.residual < 0.5), "residual above 0.5 on a matched model");
    }

    #[test]
    fn test_box_conductance_step_is_detected_and_recalibrated() {
        let mut config = g_box_step_config();
        config.optimizer.enabled = false;
        let mut twin = build_simulated_twin(&config).unwrap();
        let mut records: Vec<StepRecord> = Vec::new();
        let summary = twin.run_until(1200.0, &mut records).unwrap();

        let first_anomaly = records
            .iter()
            .find(|r| r.adaptation_state != AdaptationState::Tracking)
            .expect("the disturbance should open an episode");
        assert!(first_anomaly.time > 1000.0 && first_anomaly.time < 1020.0, "opened at {}", first_anomaly.time);

        // ensure 2 steps, gather 40 steps: calibration over [t0, t0 + 126]
        let calibrated = records
            .iter()
            .find(|r| r.plant_version == 1)
            .expect("the episode should end in a committed calibration");
        assert!((calibrated.time - (first_anomaly.time + 126.0)).abs() < 1e-6);
        assert_eq!(calibrated.adaptation_state, AdaptationState::Tracking);
        assert!(calibrated.event.starts_with("recalibrated v1"), "event: {}", calibrated.event);

        assert_eq!(summary.recalibrations, 1);
        assert_eq!(summary.plant_parameters.version, 1);
        let true_g_box = PlantParameters::default().g_box * 10.0;
        let ratio = summary.plant_parameters.value.g_box / true_g_box;
        assert!((ratio - 1.0).abs() < 0.1, "G_box ratio {}", ratio);

        assert_eq!(twin.estimator().parameters(), &summary.plant_parameters.value);
        assert!((twin.plant().parameters().g_box - true_g_box).abs() < 1e-9);
        assert_eq!(summary.controller_commits, 0);
        assert_eq!(twin.history().get_ctrl_parameters().version, 0);
    }

    #[test]
    fn test_controller_follows_committed_parameters() {
        let config = g_box_step_config();
        let mut twin = build_simulated_twin(&config).unwrap();
        let summary = twin.run_until(1200.0, &mut ()).unwrap();

        assert_eq!(summary.calibrations, 1);
        let ctrl = twin.history().get_ctrl_parameters();
        assert_eq!(ctrl.version as usize, summary.controller_commits);
        assert_eq!(twin.plant().controller().heating_time(), ctrl.value.heating_time);
        assert_eq!(twin.plant().controller().period(), ctrl.value.heating_period());
        assert!(summary.optimizations >= summary.controller_commits);
    }

    #[test]
    fn test_noisy_run_is_reproducible() {
        let mut config = Config::default();
        config.simulation.measurement_noise = 0.05;
        config.simulation.seed = 7;
        let run = |config: &Config| {
            let mut twin = build_simulated_twin(config).unwrap();
            let mut records: Vec<StepRecord> = Vec::new();
            twin.run_until(300.0, &mut records).unwrap();
            records
        };
        let a = run(&config);
        let b = run(&config);
        assert_eq!(a, b);
        assert!(a.iter().any(|r| r.t_box != r.t_box_estimate));
    }

    #[test]
    fn test_recorder_writes_one_row_per_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut twin = build_simulated_twin(&Config::default()).unwrap();
        let mut recorder = RunRecorder::create(dir.path(), true).unwrap();
        twin.run_until(300.0, &mut recorder).unwrap();
        assert_eq!(recorder.csv_path(), dir.path().join("steps.csv"));
        assert_eq!(recorder.finish().unwrap(), 100);

        let csv = std::fs::read_to_string(dir.path().join("steps.csv")).unwrap();
        let mut lines = csv.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("step,time,t_box"));
        assert_eq!(lines.count(), 100);

        let jsonl = std::fs::read_to_string(dir.path().join("steps.jsonl")).unwrap();
        let first: serde_json::Value = serde_json::from_str(jsonl.lines().next().unwrap()).unwrap();
        assert_eq!(first["step"], 1);
        assert_eq!(first["adaptation_state"], "Tracking");
        assert_eq!(jsonl.lines().count(), 100);
        assert!(twin.plant().time() >= 299.0);
    }
}
