//! Self-adaptation manager.
//!
//! Consumes one estimator residual per control step and escalates
//! `Tracking -> ConfirmingAnomaly -> GatheringData -> Calibrating -> Tracking`.
//! Timers are counted in control steps and stored as absolute deadlines.
//! Calibration runs synchronously inside the step that reaches the gather deadline.

use serde::Serialize;
use thiserror::Error;

use crate::calibration::{Calibrate, CalibrationError, CalibrationJob, TimeWindow};
use crate::config::SelfAdaptationConfig;
use crate::estimator::{EstimatorError, KalmanFilter};
use crate::history::HistoryPort;

#[derive(Debug, Error)]
pub enum AdaptationError {
    #[error("Estimator error: {0}")]
    Estimator(#[from] EstimatorError),
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),
    #[error("Calibration requested while another one is in flight")]
    ReentrantJob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdaptationState {
    Tracking,
    ConfirmingAnomaly,
    GatheringData,
    Calibrating,
}

/// The open anomaly, if any. At most one exists at a time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnomalyEpisode {
    pub first_occurrence_time: f64,
    pub confirm_deadline: f64,
    pub gather_deadline: Option<f64>,
}

/// What happened to a calibration attempt, reported to the driver.
#[derive(Debug)]
pub enum AdaptationOutcome {
    /// Converged; the estimator runs on the new set, committed as `version`.
    Recalibrated { job: CalibrationJob, version: u64 },
    /// Search ended without converging; previous parameters kept.
    CalibrationRejected { job: CalibrationJob },
    /// Not enough recorded data for the episode window.
    Aborted { reason: CalibrationError },
}

pub struct SelfAdaptationManager<C: Calibrate> {
    calibrator: C,
    anomaly_threshold: f64,
    ensure_anomaly_timer: u32,
    gather_data_timer: u32,
    step_size: f64,
    state: AdaptationState,
    episode: Option<AnomalyEpisode>,
    calibration_pending: bool,
    episodes: usize,
    calibrations: usize,
}

impl<C: Calibrate> SelfAdaptationManager<C> {
    pub fn new(config: &SelfAdaptationConfig, step_size: f64, calibrator: C) -> Self {
        Self {
            calibrator,
            anomaly_threshold: config.anomaly_threshold,
            ensure_anomaly_timer: config.ensure_anomaly_timer,
            gather_data_timer: config.gather_data_timer,
            step_size,
            state: AdaptationState::Tracking,
            episode: None,
            calibration_pending: false,
            episodes: 0,
            calibrations: 0,
        }
    }

    pub fn state(&self) -> AdaptationState {
        self.state
    }

    pub fn episode(&self) -> Option<&AnomalyEpisode> {
        self.episode.as_ref()
    }

    /// Episodes opened so far, including false alarms.
    pub fn episode_count(&self) -> usize {
        self.episodes
    }

    pub fn calibration_count(&self) -> usize {
        self.calibrations
    }

    pub fn calibrator(&self) -> &C {
        &self.calibrator
    }

    pub fn step(
        &mut self,
        now: f64,
        residual: f64,
        history: &mut dyn HistoryPort,
        estimator: &mut KalmanFilter,
    ) -> Result<Option<AdaptationOutcome>, AdaptationError> {
        if self.calibration_pending {
            return Err(AdaptationError::ReentrantJob);
        }
        let anomalous = residual >= self.anomaly_threshold;

        match (self.state, self.episode) {
            (AdaptationState::Tracking, _) => {
                if anomalous {
                    let episode = AnomalyEpisode {
                        first_occurrence_time: now,
                        confirm_deadline: now + self.ensure_anomaly_timer as f64 * self.step_size,
                        gather_deadline: None,
                    };
                    tracing::info!(
                        "Residual {:.3} >= {:.3} at {:.1}s, confirming anomaly until {:.1}s",
                        residual, self.anomaly_threshold, now, episode.confirm_deadline
                    );
                    self.episode = Some(episode);
                    self.episodes += 1;
                    self.state = AdaptationState::ConfirmingAnomaly;
                }
                Ok(None)
            }
            (AdaptationState::ConfirmingAnomaly, Some(mut episode)) => {
                if !anomalous {
                    tracing::info!("Residual {:.3} back below threshold at {:.1}s, false alarm", residual, now);
                    self.reset();
                } else if self.reached(now, episode.confirm_deadline) {
                    let gather_deadline = now + self.gather_data_timer as f64 * self.step_size;
                    tracing::info!("Anomaly confirmed at {:.1}s, gathering data until {:.1}s", now, gather_deadline);
                    episode.gather_deadline = Some(gather_deadline);
                    self.episode = Some(episode);
                    self.state = AdaptationState::GatheringData;
                }
                Ok(None)
            }
            (AdaptationState::GatheringData, Some(AnomalyEpisode { first_occurrence_time, gather_deadline: Some(gather_deadline), .. })) => {
                if !self.reached(now, gather_deadline) {
                    return Ok(None);
                }
                self.state = AdaptationState::Calibrating;
                let window = TimeWindow { t_start: first_occurrence_time, t_end: gather_deadline };
                let outcome = self.recalibrate(now, window, history, estimator);
                self.reset();
                outcome.map(Some)
            }
            (state, episode) => {
                // an episode is always open outside Tracking
                tracing::error!("Inconsistent adaptation state {:?} with episode {:?}, resetting", state, episode);
                self.reset();
                Ok(None)
            }
        }
    }

    fn recalibrate(
        &mut self,
        now: f64,
        window: TimeWindow,
        history: &mut dyn HistoryPort,
        estimator: &mut KalmanFilter,
    ) -> Result<AdaptationOutcome, AdaptationError> {
        self.calibration_pending = true;
        let result = self.calibrator.calibrate(window, history);
        self.calibration_pending = false;
        self.calibrations += 1;

        let job = match result {
            Ok(job) => job,
            Err(e) if e.is_missing_data() => {
                tracing::warn!("Calibration aborted: {}", e);
                return Ok(AdaptationOutcome::Aborted { reason: e });
            }
            Err(e) => return Err(e.into()),
        };

        if !job.converged {
            tracing::warn!("Calibration did not converge, keeping parameters v{}", history.get_plant4_parameters().version);
            return Ok(AdaptationOutcome::CalibrationRejected { job });
        }

        estimator.update_parameters(&job.result)?;
        let version = history.store_new_plant_parameters(now, job.result);
        tracing::info!("Committed plant parameters v{} at {:.1}s", version, now);
        Ok(AdaptationOutcome::Recalibrated { job, version })
    }

    /// Deadlines are whole steps ahead; half a step of slack absorbs rounding in the clock.
    fn reached(&self, now: f64, deadline: f64) -> bool {
        now + 0.5 * self.step_size >= deadline
    }

    fn reset(&mut self) {
        self.state = AdaptationState::Tracking;
        self.episode = None;
    }
}
