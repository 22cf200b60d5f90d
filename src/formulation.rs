//! Variable layout, initial values, bounds, objectives, and constraint
//! residuals for the three equilibrium formulations.
//!
//! All index arithmetic over the packed variable vector lives here: force
//! components are interleaved per contact point with stride `shift`, then
//! come the virtual block displacements (6 per free block), then the
//! sliding intensities α (one per point).  The corresponding hand-coded
//! derivatives live in `gradients.rs`.

use crate::assembly::Assembly;
use crate::matrices::{friction_matrix, EquilibriumSystem};
use crate::types::{Formulation, ObjectiveWeights, SolverOptions, VoussoirError};
use log::info;
use sprs::CsMat;

// ─────────────────────────────────────────────────────────────
//  Variable layout
// ─────────────────────────────────────────────────────────────

/// Index arithmetic for the packed variable vector
/// θ = [forces | displacements | α].
#[derive(Debug, Clone, Copy)]
pub struct VariableLayout {
    /// Force components per contact point (3 or 4).
    pub shift: usize,
    /// Total contact points.
    pub vcount: usize,
    /// Free (non-support) blocks.
    pub n_free: usize,
    /// Whether displacements and α are part of the vector.
    pub coupled: bool,
}

impl VariableLayout {
    pub fn new(kind: Formulation, vcount: usize, n_free: usize) -> Self {
        Self {
            shift: kind.shift(),
            vcount,
            n_free,
            coupled: kind.coupled(),
        }
    }

    pub fn n_forces(&self) -> usize {
        self.shift * self.vcount
    }

    pub fn n_displacements(&self) -> usize {
        if self.coupled {
            6 * self.n_free
        } else {
            0
        }
    }

    pub fn n_alphas(&self) -> usize {
        if self.coupled {
            self.vcount
        } else {
            0
        }
    }

    pub fn displacement_offset(&self) -> usize {
        self.n_forces()
    }

    pub fn alpha_offset(&self) -> usize {
        self.n_forces() + self.n_displacements()
    }

    pub fn len(&self) -> usize {
        self.n_forces() + self.n_displacements() + self.n_alphas()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of the normal force (fn or fn⁺) of contact point `i`.
    pub fn normal_index(&self, i: usize) -> usize {
        self.shift * i
    }

    /// Index of tangential component `t` (0 = u, 1 = v) of point `i`.
    pub fn tangent_index(&self, i: usize, t: usize) -> usize {
        self.shift * i + (self.shift - 2) + t
    }
}

// ─────────────────────────────────────────────────────────────
//  Initial values
// ─────────────────────────────────────────────────────────────

/// Starting point for the optimiser.  Split forces start at [1, 0, 1, 1]
/// per point (tension zero), plain forces at [1, 1, 1]; displacements and
/// α start at zero.
pub fn initial_values(layout: &VariableLayout) -> Vec<f64> {
    let mut theta = vec![0.0; layout.len()];
    for i in 0..layout.n_forces() {
        theta[i] = if layout.shift == 4 && i % 4 == 1 { 0.0 } else { 1.0 };
    }
    theta
}

// ─────────────────────────────────────────────────────────────
//  Bounds
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

/// Sign bounds on the packed variables: normal forces (fn, or fn⁺ and fn⁻)
/// and sliding intensities are non-negative, tangential forces and
/// displacements are free.  Displacement box bounds are handled as
/// constraints on δd, not here.
pub fn variable_bounds(layout: &VariableLayout) -> Bounds {
    let mut lower = vec![f64::NEG_INFINITY; layout.len()];
    let upper = vec![f64::INFINITY; layout.len()];

    for i in 0..layout.n_forces() {
        let nonneg = if layout.shift == 4 {
            i % 4 == 0 || i % 4 == 1
        } else {
            i % 3 == 0
        };
        if nonneg {
            lower[i] = 0.0;
        }
    }
    for i in layout.alpha_offset()..layout.len() {
        lower[i] = 0.0;
    }
    Bounds { lower, upper }
}

// ─────────────────────────────────────────────────────────────
//  Objectives
// ─────────────────────────────────────────────────────────────

/// Objective value at θ (without the augmented-Lagrangian terms).
///
///   * `rbe`:          Σ W_c (fn⁺)² + W_t (fn⁻)²
///   * `cra`:          Σ fn² + Σ α²
///   * `cra_penalty`:  W_α Σ α² + Σ W_c (fn⁺)² + W_t (fn⁻)²
pub fn objective(
    kind: Formulation,
    weights: &ObjectiveWeights,
    layout: &VariableLayout,
    theta: &[f64],
) -> f64 {
    match kind {
        Formulation::Rbe => split_force_objective(weights, layout, theta),
        Formulation::Cra => {
            let mut sum = 0.0;
            for i in 0..layout.n_forces() {
                if i % 3 == 0 {
                    sum += theta[i] * theta[i];
                }
            }
            sum + alpha_sum(layout, theta)
        }
        Formulation::CraPenalty => {
            weights.alpha * alpha_sum(layout, theta)
                + split_force_objective(weights, layout, theta)
        }
    }
}

fn split_force_objective(weights: &ObjectiveWeights, layout: &VariableLayout, theta: &[f64]) -> f64 {
    let mut sum = 0.0;
    for i in 0..layout.n_forces() {
        if i % 4 == 0 {
            sum += weights.compression * theta[i] * theta[i];
        } else if i % 4 == 1 {
            sum += weights.tension * theta[i] * theta[i];
        }
    }
    sum
}

fn alpha_sum(layout: &VariableLayout, theta: &[f64]) -> f64 {
    theta[layout.alpha_offset()..layout.len()]
        .iter()
        .map(|a| a * a)
        .sum()
}

// ─────────────────────────────────────────────────────────────
//  Constraint set
// ─────────────────────────────────────────────────────────────

/// All constraint data for one formulation, ready for residual and
/// gradient evaluation.
///
/// Equality residual order: equilibrium rows, contact complementarity,
/// fn⁺·fn⁻ exclusivity (split layouts), friction/sliding alignment.
/// Inequality residual order (all `g <= 0`): friction cone rows,
/// no-penetration, displacement box upper, displacement box lower, then
/// the variable sign bounds, which ride the same augmented Lagrangian
/// as every other inequality.
#[derive(Debug, Clone)]
pub struct ConstraintSet {
    pub kind: Formulation,
    pub layout: VariableLayout,
    /// Equilibrium rows over free blocks, CSR, `shift` columns per point.
    pub aeq: CsMat<f64>,
    /// Compatibility matrix for δd = Aᵀq: the 3-column equilibrium matrix
    /// over free blocks.  `None` for force-only formulations.
    pub aeq_d: Option<CsMat<f64>>,
    /// Linearised friction cone, CSR.
    pub afr: CsMat<f64>,
    /// Gravity loads over free blocks.
    pub p: Vec<f64>,
    pub bounds: Bounds,
    /// Variables with a finite lower / upper bound.
    pub lb_idx: Vec<usize>,
    pub ub_idx: Vec<usize>,
    pub eps: f64,
    pub d_bnd: f64,
}

impl ConstraintSet {
    pub fn build(
        assembly: &Assembly,
        kind: Formulation,
        opts: &SolverOptions,
    ) -> Result<Self, VoussoirError> {
        let system = EquilibriumSystem::from_assembly(assembly, kind.shift())?;
        let layout = VariableLayout::new(kind, system.vcount, system.free.len());

        let aeq_d = if kind.coupled() {
            if kind.shift() == 3 {
                Some(system.aeq.clone())
            } else {
                Some(EquilibriumSystem::from_assembly(assembly, 3)?.aeq)
            }
        } else {
            None
        };

        let afr = friction_matrix(system.vcount, opts.cone_faces, opts.mu, kind.shift())?;
        info!("Afr: {} x {}", afr.rows(), afr.cols());

        let p = crate::matrices::gravity_loads(assembly, opts.density);
        if p.len() != system.aeq.rows() {
            return Err(VoussoirError::Shape(format!(
                "load vector has {} rows, equilibrium matrix has {}",
                p.len(),
                system.aeq.rows()
            )));
        }

        let bounds = variable_bounds(&layout);
        let finite = |v: &[f64]| -> Vec<usize> {
            v.iter()
                .enumerate()
                .filter(|(_, &x)| x.is_finite())
                .map(|(i, _)| i)
                .collect()
        };
        let lb_idx = finite(&bounds.lower);
        let ub_idx = finite(&bounds.upper);

        Ok(Self {
            kind,
            layout,
            aeq: system.aeq,
            aeq_d,
            afr,
            p,
            bounds,
            lb_idx,
            ub_idx,
            eps: opts.eps,
            d_bnd: opts.d_bnd,
        })
    }

    /// Number of virtual contact displacement components (3 per point).
    pub fn n_d(&self) -> usize {
        if self.layout.coupled {
            3 * self.layout.vcount
        } else {
            0
        }
    }

    pub fn n_eq(&self) -> usize {
        let mut n = self.aeq.rows();
        if self.layout.coupled {
            n += self.layout.vcount; // contact complementarity
            if self.kind.split_forces() {
                n += self.layout.vcount; // fn+ fn- exclusivity
            }
            n += 2 * self.layout.vcount; // friction / sliding alignment
        }
        n
    }

    pub fn n_ineq(&self) -> usize {
        let mut n = self.afr.rows();
        if self.layout.coupled {
            n += self.layout.vcount; // no penetration
            n += 2 * self.n_d(); // displacement box
        }
        n + self.lb_idx.len() + self.ub_idx.len()
    }

    /// Evaluate the compatibility image δd = Aᵀq into `d` (3 per point).
    pub fn displacements(&self, theta: &[f64], d: &mut Vec<f64>) {
        d.clear();
        d.resize(self.n_d(), 0.0);
        let Some(aeq_d) = &self.aeq_d else {
            return;
        };
        let q = &theta[self.layout.displacement_offset()..self.layout.alpha_offset()];
        let indptr = aeq_d.indptr();
        for row in 0..aeq_d.rows() {
            let qr = q[row];
            if qr == 0.0 {
                continue;
            }
            let start = indptr.raw_storage()[row];
            let end_ = indptr.raw_storage()[row + 1];
            for nz in start..end_ {
                d[aeq_d.indices()[nz]] += aeq_d.data()[nz] * qr;
            }
        }
    }

    /// Equality residuals g(θ) = 0 into `out`, in the documented order.
    /// `d` must be the output of [`Self::displacements`] at the same θ.
    pub fn eq_residuals(&self, theta: &[f64], d: &[f64], out: &mut Vec<f64>) {
        out.clear();
        out.reserve(self.n_eq());
        let layout = &self.layout;

        // Aeq f + p = 0
        let indptr = self.aeq.indptr();
        for row in 0..self.aeq.rows() {
            let start = indptr.raw_storage()[row];
            let end_ = indptr.raw_storage()[row + 1];
            let mut g = self.p[row];
            for nz in start..end_ {
                g += self.aeq.data()[nz] * theta[self.aeq.indices()[nz]];
            }
            out.push(g);
        }

        if !layout.coupled {
            return;
        }

        // fn (δdn + eps) = 0
        for i in 0..layout.vcount {
            let fn_i = theta[layout.normal_index(i)];
            out.push(fn_i * (d[i * 3] + self.eps));
        }

        // fn+ fn- = 0
        if self.kind.split_forces() {
            for i in 0..layout.vcount {
                out.push(theta[i * 4] * theta[i * 4 + 1]);
            }
        }

        // f_t + α δd_t = 0
        let alpha0 = layout.alpha_offset();
        for i in 0..layout.vcount {
            let alpha = theta[alpha0 + i];
            for t in 0..2 {
                let f_t = theta[layout.tangent_index(i, t)];
                out.push(f_t + alpha * d[i * 3 + 1 + t]);
            }
        }
    }

    /// Inequality residuals g(θ) <= 0 into `out`, in the documented order.
    pub fn ineq_residuals(&self, theta: &[f64], d: &[f64], out: &mut Vec<f64>) {
        out.clear();
        out.reserve(self.n_ineq());
        let layout = &self.layout;

        // Afr f <= 0
        let indptr = self.afr.indptr();
        for row in 0..self.afr.rows() {
            let start = indptr.raw_storage()[row];
            let end_ = indptr.raw_storage()[row + 1];
            let mut g = 0.0;
            for nz in start..end_ {
                g += self.afr.data()[nz] * theta[self.afr.indices()[nz]];
            }
            out.push(g);
        }

        if layout.coupled {
            // -(δdn + eps) <= 0
            for i in 0..layout.vcount {
                out.push(-(d[i * 3] + self.eps));
            }

            // |δd| <= d_bnd
            for &dc in d {
                out.push(dc - self.d_bnd);
            }
            for &dc in d {
                out.push(-dc - self.d_bnd);
            }
        }

        // Variable sign bounds: lb - θ <= 0, θ - ub <= 0.
        for &i in &self.lb_idx {
            out.push(self.bounds.lower[i] - theta[i]);
        }
        for &i in &self.ub_idx {
            out.push(theta[i] - self.bounds.upper[i]);
        }
    }
}
