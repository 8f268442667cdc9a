// Integration tests for loading configuration files from disk

#[cfg(test)]
mod tests {
    use std::io::Write;

    use incubator_twin::config::{PlantParameterName, load_config};
    use incubator_twin::{Config, ConfigError};

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(
            r#"
            [simulation]
            step_size = 3.0
            duration = 1500.0
            measurement_noise = 0.01

            [self_adaptation]
            anomaly_threshold = 2.0
            ensure_anomaly_timer = 3
            gather_data_timer = 20

            [supervisor]
            restrict_T_heater = false

            [[disturbance]]
            time = 1000.0
            parameter = "g_box"
            factor = 10.0

            [[disturbance]]
            time = 1200.0
            parameter = "c_air"
            factor = 0.5
            "#,
        );
        let config = load_config(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.simulation.duration, 1500.0);
        assert_eq!(config.simulation.measurement_noise, 0.01);
        assert_eq!(config.self_adaptation.anomaly_threshold, 2.0);
        assert_eq!(config.self_adaptation.ensure_anomaly_timer, 3);
        assert_eq!(config.self_adaptation.gather_data_timer, 20);
        assert!(!config.supervisor.restrict_t_heater);
        assert_eq!(config.disturbances.len(), 2);
        assert_eq!(config.disturbances[0].parameter, PlantParameterName::GBox);
        assert_eq!(config.disturbances[1].parameter, PlantParameterName::CAir);
        // untouched sections keep their defaults
        assert_eq!(config.estimator.std_dev, 0.001);
        assert_eq!(config.calibration.initial_log_step, 0.3);
    }

    #[test]
    fn test_empty_file_is_default_config() {
        let file = write_config("");
        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.to_toml().unwrap(), Config::default().to_toml().unwrap());
    }

    #[test]
    fn test_dumped_config_loads_back() {
        let mut config = Config::default();
        config.optimizer.enabled = false;
        config.supervisor.performance_window = 7;
        let file = write_config(&config.to_toml().unwrap());
        let loaded = load_config(file.path().to_str().unwrap()).unwrap();
        assert!(!loaded.optimizer.enabled);
        assert_eq!(loaded.supervisor.performance_window, 7);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = load_config(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let file = write_config("[simulation\nstep_size = ");
        let err = load_config(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));

        let file = write_config("[[disturbance]]\ntime = 1.0\nparameter = \"volume\"\nfactor = 2.0\n");
        let err = load_config(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for contents in [
            "[estimator]\nstd_dev = 0.0\n",
            "[simulation]\nstep_size = -3.0\n",
            "[plant]\ng_box = -1.0\n",
            "[controller]\ntemperature_desired = 70.0\n",
            "[supervisor]\nperformance_window = 0\n",
            "[[disturbance]]\ntime = 5.0\nparameter = \"g_box\"\nfactor = 0.0\n",
        ] {
            let file = write_config(contents);
            let err = load_config(file.path().to_str().unwrap()).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "accepted {:?}", contents);
        }
    }
}
