//! Hand-coded gradient of the augmented-Lagrangian merit function.
//!
//! The merit combines the quadratic objective and the augmented-Lagrangian
//! terms for every constraint family (sign bounds included):
//!
//!   L(θ) = J(θ)
//!        + Σ_eq  [ λ_k g_k + (μ/2) g_k² ]
//!        + Σ_ineq (μ/2) max(0, λ_k/μ + g_k)²
//!
//! All derivatives are analytic.  Chain-rule contributions through the
//! compatibility image δd = Aᵀq are collected in a dL/dδd buffer and pushed
//! through the sparse matrix once at the end.

use crate::formulation::ConstraintSet;
use crate::types::{AlState, Formulation, SolverOptions};

// ─────────────────────────────────────────────────────────────
//  Evaluation scratch
// ─────────────────────────────────────────────────────────────

/// Reusable buffers for one merit evaluation.
#[derive(Debug, Default)]
pub struct MeritScratch {
    /// Virtual contact displacements δd (3 per point).
    pub d: Vec<f64>,
    pub g_eq: Vec<f64>,
    pub g_ineq: Vec<f64>,
    /// dL/dδd accumulator.
    dl_dd: Vec<f64>,
}

impl MeritScratch {
    pub fn new() -> Self {
        Self::default()
    }
}

// ─────────────────────────────────────────────────────────────
//  Objective gradient
// ─────────────────────────────────────────────────────────────

/// Accumulate the objective value and its gradient.
fn accumulate_objective(
    cs: &ConstraintSet,
    opts: &SolverOptions,
    theta: &[f64],
    grad: &mut [f64],
) -> f64 {
    let layout = &cs.layout;
    let w = &opts.weights;
    let mut loss = 0.0;

    match cs.kind {
        Formulation::Cra => {
            for i in 0..layout.n_forces() {
                if i % 3 == 0 {
                    loss += theta[i] * theta[i];
                    grad[i] += 2.0 * theta[i];
                }
            }
        }
        Formulation::Rbe | Formulation::CraPenalty => {
            for i in 0..layout.n_forces() {
                let wi = match i % 4 {
                    0 => w.compression,
                    1 => w.tension,
                    _ => continue,
                };
                loss += wi * theta[i] * theta[i];
                grad[i] += 2.0 * wi * theta[i];
            }
        }
    }

    if layout.coupled {
        let w_alpha = match cs.kind {
            Formulation::CraPenalty => w.alpha,
            _ => 1.0,
        };
        for i in layout.alpha_offset()..layout.len() {
            loss += w_alpha * theta[i] * theta[i];
            grad[i] += 2.0 * w_alpha * theta[i];
        }
    }

    loss
}

// ─────────────────────────────────────────────────────────────
//  Merit value + gradient
// ─────────────────────────────────────────────────────────────

/// Evaluate the augmented-Lagrangian merit and its full gradient.
///
/// `grad` must have length `θ.len()`.
pub fn merit_value_and_gradient(
    cs: &ConstraintSet,
    opts: &SolverOptions,
    al: &AlState,
    theta: &[f64],
    grad: &mut [f64],
    scratch: &mut MeritScratch,
) -> f64 {
    grad.iter_mut().for_each(|g| *g = 0.0);
    let layout = &cs.layout;
    let mu = al.mu;

    // ── 1. Objective ──────────────────────────────────────
    let mut loss = accumulate_objective(cs, opts, theta, grad);

    // ── 2. Residuals at θ ─────────────────────────────────
    cs.displacements(theta, &mut scratch.d);
    cs.eq_residuals(theta, &scratch.d, &mut scratch.g_eq);
    cs.ineq_residuals(theta, &scratch.d, &mut scratch.g_ineq);
    scratch.dl_dd.clear();
    scratch.dl_dd.resize(cs.n_d(), 0.0);

    // ── 3. Equality terms ─────────────────────────────────
    // Coefficient of ∂g/∂θ is  λ + μ g  for both AL forms below.
    let mut row = 0;

    let indptr = cs.aeq.indptr();
    for r in 0..cs.aeq.rows() {
        let g = scratch.g_eq[row];
        let c = al.eq_lambdas[row] + mu * g;
        loss += al.eq_lambdas[row] * g + 0.5 * mu * g * g;
        let start = indptr.raw_storage()[r];
        let end_ = indptr.raw_storage()[r + 1];
        for nz in start..end_ {
            grad[cs.aeq.indices()[nz]] += c * cs.aeq.data()[nz];
        }
        row += 1;
    }

    if layout.coupled {
        // fn (δdn + eps) = 0
        for i in 0..layout.vcount {
            let g = scratch.g_eq[row];
            let c = al.eq_lambdas[row] + mu * g;
            loss += al.eq_lambdas[row] * g + 0.5 * mu * g * g;
            let fn_idx = layout.normal_index(i);
            grad[fn_idx] += c * (scratch.d[i * 3] + cs.eps);
            scratch.dl_dd[i * 3] += c * theta[fn_idx];
            row += 1;
        }

        // fn+ fn- = 0
        if cs.kind.split_forces() {
            for i in 0..layout.vcount {
                let g = scratch.g_eq[row];
                let c = al.eq_lambdas[row] + mu * g;
                loss += al.eq_lambdas[row] * g + 0.5 * mu * g * g;
                grad[i * 4] += c * theta[i * 4 + 1];
                grad[i * 4 + 1] += c * theta[i * 4];
                row += 1;
            }
        }

        // f_t + α δd_t = 0
        let alpha0 = layout.alpha_offset();
        for i in 0..layout.vcount {
            let alpha = theta[alpha0 + i];
            for t in 0..2 {
                let g = scratch.g_eq[row];
                let c = al.eq_lambdas[row] + mu * g;
                loss += al.eq_lambdas[row] * g + 0.5 * mu * g * g;
                grad[layout.tangent_index(i, t)] += c;
                grad[alpha0 + i] += c * scratch.d[i * 3 + 1 + t];
                scratch.dl_dd[i * 3 + 1 + t] += c * alpha;
                row += 1;
            }
        }
    }
    debug_assert_eq!(row, scratch.g_eq.len());

    // ── 4. Inequality terms ───────────────────────────────
    // Active when λ + μ g > 0; the loss contribution is a²/(2μ).
    let mut row = 0;
    let ineq_coeff = |g: f64, lambda: f64| -> (f64, f64) {
        let a = lambda + mu * g;
        if a > 0.0 {
            (a * a / (2.0 * mu), a)
        } else {
            (0.0, 0.0)
        }
    };

    let indptr = cs.afr.indptr();
    for r in 0..cs.afr.rows() {
        let (l, c) = ineq_coeff(scratch.g_ineq[row], al.ineq_lambdas[row]);
        loss += l;
        if c != 0.0 {
            let start = indptr.raw_storage()[r];
            let end_ = indptr.raw_storage()[r + 1];
            for nz in start..end_ {
                grad[cs.afr.indices()[nz]] += c * cs.afr.data()[nz];
            }
        }
        row += 1;
    }

    if layout.coupled {
        // -(δdn + eps) <= 0
        for i in 0..layout.vcount {
            let (l, c) = ineq_coeff(scratch.g_ineq[row], al.ineq_lambdas[row]);
            loss += l;
            scratch.dl_dd[i * 3] -= c;
            row += 1;
        }
        // δd - d_bnd <= 0
        for ci in 0..cs.n_d() {
            let (l, c) = ineq_coeff(scratch.g_ineq[row], al.ineq_lambdas[row]);
            loss += l;
            scratch.dl_dd[ci] += c;
            row += 1;
        }
        // -δd - d_bnd <= 0
        for ci in 0..cs.n_d() {
            let (l, c) = ineq_coeff(scratch.g_ineq[row], al.ineq_lambdas[row]);
            loss += l;
            scratch.dl_dd[ci] -= c;
            row += 1;
        }
    }

    // lb - θ <= 0  and  θ - ub <= 0
    for &i in &cs.lb_idx {
        let (l, c) = ineq_coeff(scratch.g_ineq[row], al.ineq_lambdas[row]);
        loss += l;
        grad[i] -= c;
        row += 1;
    }
    for &i in &cs.ub_idx {
        let (l, c) = ineq_coeff(scratch.g_ineq[row], al.ineq_lambdas[row]);
        loss += l;
        grad[i] += c;
        row += 1;
    }
    debug_assert_eq!(row, scratch.g_ineq.len());

    // ── 5. Push dL/dδd through δd = Aᵀq ───────────────────
    if let Some(aeq_d) = &cs.aeq_d {
        let q0 = layout.displacement_offset();
        let indptr = aeq_d.indptr();
        for r in 0..aeq_d.rows() {
            let start = indptr.raw_storage()[r];
            let end_ = indptr.raw_storage()[r + 1];
            let mut acc = 0.0;
            for nz in start..end_ {
                acc += aeq_d.data()[nz] * scratch.dl_dd[aeq_d.indices()[nz]];
            }
            grad[q0 + r] += acc;
        }
    }

    loss
}
