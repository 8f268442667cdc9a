//! Derivative-free minimization (Nelder–Mead downhill simplex).
//!
//! Objectives are plain `FnMut(&[f64]) -> f64` closures; a NaN cost is treated as
//! `+inf` so infeasible candidates can simply return `f64::INFINITY`.
//!
//! The search terminates when both the simplex spread (`xatol`, max-norm against
//! the best vertex) and the cost spread (`fatol`) are within tolerance, or when
//! `max_iterations` is reached. Only the former counts as converged.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Relative perturbation of non-zero coordinates in the default initial simplex.
const NONZERO_DELTA: f64 = 0.05;
/// Absolute perturbation of zero coordinates in the default initial simplex.
const ZERO_DELTA: f64 = 0.00025;

#[derive(Debug, Error, PartialEq)]
pub enum OptimizeError {
    #[error("Starting point has no coordinates")]
    EmptyStartingPoint,
    #[error("Initial step has {got} entries, expected {expected}")]
    StepLengthMismatch { expected: usize, got: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NelderMeadOptions {
    pub xatol: f64,
    pub fatol: f64,
    pub max_iterations: usize,
    /// Per-coordinate offsets for the initial simplex (default: 5% of each coordinate)
    pub initial_step: Option<Vec<f64>>,
    /// Extra searches started from the best vertex after a converged run
    pub restarts: usize,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        Self {
            xatol: 1e-4,
            fatol: 1e-4,
            max_iterations: 1000,
            initial_step: None,
            restarts: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub converged: bool,
}

struct Simplex {
    vertices: Vec<Vec<f64>>,
    values: Vec<f64>,
}

impl Simplex {
    fn sort(&mut self) {
        let mut order: Vec<usize> = (0..self.values.len()).collect();
        order.sort_by(|&a, &b| self.values[a].total_cmp(&self.values[b]));
        self.vertices = order.iter().map(|&i| self.vertices[i].clone()).collect();
        self.values = order.iter().map(|&i| self.values[i]).collect();
    }

    fn within_tolerance(&self, xatol: f64, fatol: f64) -> bool {
        // a simplex touching an infeasible region never converges
        if !self.values.iter().all(|f| f.is_finite()) {
            return false;
        }
        let best = &self.vertices[0];
        let x_spread = self.vertices[1..]
            .iter()
            .flat_map(|v| v.iter().zip(best).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        let f_spread = self.values[1..]
            .iter()
            .map(|f| (f - self.values[0]).abs())
            .fold(0.0, f64::max);
        x_spread <= xatol && f_spread <= fatol
    }
}

/// Linear combination `(1 + t) * centroid - t * worst`.
fn along(centroid: &[f64], worst: &[f64], t: f64) -> Vec<f64> {
    centroid
        .iter()
        .zip(worst)
        .map(|(c, w)| (1.0 + t) * c - t * w)
        .collect()
}

/// Minimizes `objective` starting from `x0`, including any configured restarts.
pub fn minimize<F>(mut objective: F, x0: &[f64], options: &NelderMeadOptions) -> Result<Minimum, OptimizeError>
where
    F: FnMut(&[f64]) -> f64,
{
    if x0.is_empty() {
        return Err(OptimizeError::EmptyStartingPoint);
    }
    if let Some(step) = &options.initial_step {
        if step.len() != x0.len() {
            return Err(OptimizeError::StepLengthMismatch { expected: x0.len(), got: step.len() });
        }
    }

    let mut best = run(&mut objective, x0, options);
    for restart in 0..options.restarts {
        if !best.converged {
            break;
        }
        let next = run(&mut objective, &best.x, options);
        tracing::debug!(
            "Nelder-Mead restart {}: cost {:.6e} -> {:.6e} ({} iterations)",
            restart + 1,
            best.value,
            next.value,
            next.iterations
        );
        let improvement = best.value - next.value;
        let iterations = best.iterations + next.iterations;
        let evaluations = best.evaluations + next.evaluations;
        if next.value <= best.value {
            best = Minimum { iterations, evaluations, ..next };
        } else {
            best.iterations = iterations;
            best.evaluations = evaluations;
        }
        if improvement.is_nan() || improvement <= options.fatol {
            break;
        }
    }
    Ok(best)
}

fn run<F>(objective: &mut F, x0: &[f64], options: &NelderMeadOptions) -> Minimum
where
    F: FnMut(&[f64]) -> f64,
{
    let n = x0.len();
    let mut evaluations = 0usize;
    let mut eval = |x: &[f64]| {
        evaluations += 1;
        let f = objective(x);
        if f.is_nan() { f64::INFINITY } else { f }
    };

    let mut vertices = Vec::with_capacity(n + 1);
    vertices.push(x0.to_vec());
    for k in 0..n {
        let mut y = x0.to_vec();
        match &options.initial_step {
            Some(step) => y[k] += step[k],
            None if y[k] != 0.0 => y[k] *= 1.0 + NONZERO_DELTA,
            None => y[k] = ZERO_DELTA,
        }
        vertices.push(y);
    }
    let values = vertices.iter().map(|v| eval(v)).collect();
    let mut simplex = Simplex { vertices, values };
    simplex.sort();

    let mut iterations = 0;
    let mut converged = false;
    while iterations < options.max_iterations {
        if simplex.within_tolerance(options.xatol, options.fatol) {
            converged = true;
            break;
        }

        let mut centroid = vec![0.0; n];
        for v in &simplex.vertices[..n] {
            for (c, x) in centroid.iter_mut().zip(v) {
                *c += x / n as f64;
            }
        }
        let worst = simplex.vertices[n].clone();

        let xr = along(&centroid, &worst, REFLECTION);
        let fxr = eval(&xr);
        let mut shrink = false;

        if fxr < simplex.values[0] {
            let xe = along(&centroid, &worst, REFLECTION * EXPANSION);
            let fxe = eval(&xe);
            if fxe < fxr {
                simplex.vertices[n] = xe;
                simplex.values[n] = fxe;
            } else {
                simplex.vertices[n] = xr;
                simplex.values[n] = fxr;
            }
        } else if fxr < simplex.values[n - 1] {
            simplex.vertices[n] = xr;
            simplex.values[n] = fxr;
        } else if fxr < simplex.values[n] {
            // outside contraction
            let xc = along(&centroid, &worst, CONTRACTION * REFLECTION);
            let fxc = eval(&xc);
            if fxc <= fxr {
                simplex.vertices[n] = xc;
                simplex.values[n] = fxc;
            } else {
                shrink = true;
            }
        } else {
            // inside contraction
            let xcc = along(&centroid, &worst, -CONTRACTION);
            let fxcc = eval(&xcc);
            if fxcc < simplex.values[n] {
                simplex.vertices[n] = xcc;
                simplex.values[n] = fxcc;
            } else {
                shrink = true;
            }
        }

        if shrink {
            let best = simplex.vertices[0].clone();
            for j in 1..=n {
                let shrunk: Vec<f64> = best
                    .iter()
                    .zip(&simplex.vertices[j])
                    .map(|(b, v)| b + SHRINK * (v - b))
                    .collect();
                simplex.values[j] = eval(&shrunk);
                simplex.vertices[j] = shrunk;
            }
        }

        iterations += 1;
        simplex.sort();
    }

    Minimum {
        x: simplex.vertices[0].clone(),
        value: simplex.values[0],
        iterations,
        evaluations,
        converged,
    }
}
