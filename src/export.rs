// src/export.rs - Per-step run output (CSV and optional JSON Lines)
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::adaptation::{AdaptationOutcome, AdaptationState};
use crate::supervisor::{SupervisorOutcome, SupervisorState};
use crate::twin::StepReport;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One flat output row per control step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub step: u64,
    pub time: f64,
    pub t_box: f64,
    pub t_heater: f64,
    pub heater_on: bool,
    pub room_temperature: f64,
    pub t_box_estimate: f64,
    pub t_heater_estimate: f64,
    pub t_box_prior: f64,
    pub residual: f64,
    pub adaptation_state: AdaptationState,
    pub supervisor_state: SupervisorState,
    pub plant_version: u64,
    pub g_box: f64,
    pub ctrl_version: u64,
    pub heating_time: u32,
    pub heating_gap: u32,
    /// Short description of any calibration/optimization finished this step
    pub event: String,
}

fn describe_adaptation(outcome: &AdaptationOutcome) -> String {
    match outcome {
        AdaptationOutcome::Recalibrated { version, job } => {
            format!("recalibrated v{} after {} iterations", version, job.iterations)
        }
        AdaptationOutcome::CalibrationRejected { job } => {
            format!("calibration not converged after {} iterations", job.iterations)
        }
        AdaptationOutcome::Aborted { reason } => format!("calibration aborted: {}", reason),
    }
}

fn describe_supervision(outcome: &SupervisorOutcome) -> String {
    match outcome {
        SupervisorOutcome::Triggered { reason } => format!("optimization triggered ({:?})", reason),
        SupervisorOutcome::Committed { version, job } => format!(
            "controller v{}: {} on / {} off",
            version, job.result.heating_time, job.result.heating_gap
        ),
        SupervisorOutcome::Retained { .. } => "controller parameters retained".to_string(),
    }
}

impl From<&StepReport> for StepRecord {
    fn from(report: &StepReport) -> Self {
        let mut events: Vec<String> = Vec::new();
        if let Some(outcome) = &report.adaptation {
            events.push(describe_adaptation(outcome));
        }
        events.extend(report.supervision.iter().map(describe_supervision));
        Self {
            step: report.step,
            time: report.sample.time,
            t_box: report.sample.t_box,
            t_heater: report.sample.t_heater,
            heater_on: report.sample.heater_on,
            room_temperature: report.sample.room_temperature,
            t_box_estimate: report.estimate.t_box,
            t_heater_estimate: report.estimate.t_heater,
            t_box_prior: report.estimate.t_box_prior,
            residual: report.residual,
            adaptation_state: report.adaptation_state,
            supervisor_state: report.supervisor_state,
            plant_version: report.plant_parameters.version,
            g_box: report.plant_parameters.value.g_box,
            ctrl_version: report.ctrl_parameters.version,
            heating_time: report.ctrl_parameters.value.heating_time,
            heating_gap: report.ctrl_parameters.value.heating_gap,
            event: events.join("; "),
        }
    }
}

/// Destination for per-step reports.
pub trait StepSink {
    fn record(&mut self, report: &StepReport) -> Result<(), ExportError>;
}

impl StepSink for Vec<StepRecord> {
    fn record(&mut self, report: &StepReport) -> Result<(), ExportError> {
        self.push(StepRecord::from(report));
        Ok(())
    }
}

/// Discards every report.
impl StepSink for () {
    fn record(&mut self, _report: &StepReport) -> Result<(), ExportError> {
        Ok(())
    }
}

/// Writes `steps.csv` (and `steps.jsonl` when enabled) into an output directory.
pub struct RunRecorder {
    csv: csv::Writer<File>,
    jsonl: Option<BufWriter<File>>,
    csv_path: PathBuf,
    rows: usize,
}

impl RunRecorder {
    pub fn create(output_dir: &Path, jsonl: bool) -> Result<Self, ExportError> {
        std::fs::create_dir_all(output_dir)?;
        let csv_path = output_dir.join("steps.csv");
        let csv = csv::Writer::from_path(&csv_path)?;
        let jsonl = if jsonl {
            Some(BufWriter::new(File::create(output_dir.join("steps.jsonl"))?))
        } else {
            None
        };
        tracing::info!("Recording run to {}", csv_path.display());
        Ok(Self { csv, jsonl, csv_path, rows: 0 })
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn finish(mut self) -> Result<usize, ExportError> {
        self.csv.flush()?;
        if let Some(jsonl) = self.jsonl.as_mut() {
            jsonl.flush()?;
        }
        Ok(self.rows)
    }
}

impl StepSink for RunRecorder {
    fn record(&mut self, report: &StepReport) -> Result<(), ExportError> {
        let record = StepRecord::from(report);
        self.csv.serialize(&record)?;
        if let Some(jsonl) = self.jsonl.as_mut() {
            serde_json::to_writer(&mut *jsonl, &record)?;
            writeln!(jsonl)?;
        }
        self.rows += 1;
        Ok(())
    }
}
