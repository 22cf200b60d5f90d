//! Augmented-Lagrangian optimisation driver via the `argmin` crate.
//!
//! Wraps the merit function into argmin's `CostFunction` + `Gradient`
//! traits, runs L-BFGS (More–Thuente line search) as the inner solver, and
//! drives the constraint multipliers in an outer loop:
//!
//!   λ_k ← λ_k + μ g_k              (equalities)
//!   λ_k ← max(0, λ_k + μ g_k)      (inequalities)
//!   μ   ← min(μ_max, factor · μ)
//!
//! Uses `Vec<f64>` as the argmin parameter type to avoid ndarray version
//! conflicts between our ndarray and argmin-math's bundled ndarray.

use crate::assembly::Assembly;
use crate::formulation::{initial_values, objective, ConstraintSet};
use crate::gradients::{merit_value_and_gradient, MeritScratch};
use crate::types::{AlState, Formulation, SolverOptions, SolverResult, VoussoirError};
use argmin::core::{CostFunction, Executor, Gradient, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use log::{debug, warn};
use std::cell::RefCell;

// ─────────────────────────────────────────────────────────────
//  argmin problem wrapper
// ─────────────────────────────────────────────────────────────

/// Binds the constraint set, options, and one augmented-Lagrangian
/// multiplier state so argmin can evaluate cost and gradient.
///
/// `RefCell` is used for the scratch buffers because argmin's traits take
/// `&self` while the merit evaluation mutates them; the solve is
/// single-threaded, so the borrow never conflicts.
///
/// **Evaluation cache**: argmin calls `cost(θ)` and `gradient(θ)`
/// separately at the same θ each iteration.  We cache the last
/// `(θ, loss, grad)` so the merit runs only once per unique θ.
struct EquilibriumProblem<'a> {
    cs: &'a ConstraintSet,
    opts: &'a SolverOptions,
    al: AlState,
    scratch: RefCell<MeritScratch>,
    last_eval: RefCell<Option<(Vec<f64>, f64, Vec<f64>)>>,
}

impl<'a> EquilibriumProblem<'a> {
    /// Ensure the cache contains results for `theta`.
    fn ensure_evaluated(&self, theta: &[f64]) -> Result<(), argmin::core::Error> {
        {
            let cached = self.last_eval.borrow();
            if let Some((ref t, _, _)) = *cached {
                if t == theta {
                    return Ok(());
                }
            }
        }
        let mut scratch = self.scratch.borrow_mut();
        let mut grad = vec![0.0; theta.len()];
        let val = merit_value_and_gradient(self.cs, self.opts, &self.al, theta, &mut grad, &mut scratch);
        if !val.is_finite() {
            return Err(argmin::core::Error::msg(format!(
                "merit function returned non-finite value {val}"
            )));
        }
        *self.last_eval.borrow_mut() = Some((theta.to_vec(), val, grad));
        Ok(())
    }
}

impl<'a> CostFunction for EquilibriumProblem<'a> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        self.ensure_evaluated(theta)?;
        let cached = self.last_eval.borrow();
        Ok(cached.as_ref().unwrap().1)
    }
}

impl<'a> Gradient for EquilibriumProblem<'a> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, theta: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        self.ensure_evaluated(theta)?;
        let cached = self.last_eval.borrow();
        Ok(cached.as_ref().unwrap().2.clone())
    }
}

// ─────────────────────────────────────────────────────────────
//  Inner L-BFGS solve
// ─────────────────────────────────────────────────────────────

/// Run one inner L-BFGS solve against a fixed multiplier state.
/// Returns the best parameter vector and the iteration count.
fn inner_lbfgs(
    cs: &ConstraintSet,
    opts: &SolverOptions,
    al: AlState,
    init_param: Vec<f64>,
) -> Result<(Vec<f64>, u64), VoussoirError> {
    let problem = EquilibriumProblem {
        cs,
        opts,
        al,
        scratch: RefCell::new(MeritScratch::new()),
        last_eval: RefCell::new(None),
    };

    let linesearch = MoreThuenteLineSearch::new();
    let solver = LBFGS::new(linesearch, 10);

    let executor = Executor::new(problem, solver).configure(|config| {
        config
            .param(init_param)
            .max_iters(opts.max_iterations as u64)
            .target_cost(f64::NEG_INFINITY)
    });

    let result = executor.run()?;
    let iters = result.state().get_iter();
    let best = result
        .state()
        .get_best_param()
        .cloned()
        .ok_or_else(|| VoussoirError::Solver("L-BFGS returned no best parameters".into()))?;
    Ok((best, iters))
}

// ─────────────────────────────────────────────────────────────
//  Violation helpers
// ─────────────────────────────────────────────────────────────

fn max_abs(v: &[f64]) -> f64 {
    v.iter().fold(0.0_f64, |m, &g| m.max(g.abs()))
}

fn max_pos(v: &[f64]) -> f64 {
    v.iter().fold(0.0_f64, |m, &g| m.max(g))
}

// ─────────────────────────────────────────────────────────────
//  Top-level solve
// ─────────────────────────────────────────────────────────────

/// Build the chosen formulation for `assembly`, run the augmented
/// Lagrangian, and write contact forces (and, for coupled formulations,
/// virtual block displacements) back onto the assembly.
pub fn solve(
    assembly: &mut Assembly,
    kind: Formulation,
    opts: &SolverOptions,
) -> Result<SolverResult, VoussoirError> {
    let cs = ConstraintSet::build(assembly, kind, opts)?;
    let layout = cs.layout;

    if layout.is_empty() {
        // No contact points and no free displacements: the system is
        // trivially solved (no free blocks) or trivially infeasible
        // (free blocks with nothing to hold them).
        let viol = max_abs(&cs.p);
        return Ok(SolverResult {
            theta: Vec::new(),
            objective: 0.0,
            max_eq_violation: viol,
            max_ineq_violation: 0.0,
            outer_iterations: 0,
            inner_iterations: 0,
            converged: viol < opts.al.constraint_tol,
        });
    }

    let mut al = AlState::new(cs.n_eq(), cs.n_ineq(), &opts.al);
    let mut best = initial_values(&layout);
    let mut inner_iterations = 0usize;
    let mut outer_iterations = 0usize;

    let mut d = Vec::new();
    let mut g_eq = Vec::new();
    let mut g_ineq = Vec::new();

    for outer in 0..opts.al.max_outer_iters {
        match inner_lbfgs(&cs, opts, al.clone(), best.clone()) {
            Ok((theta, iters)) => {
                best = theta;
                inner_iterations += iters as usize;
            }
            Err(e) => {
                if outer == 0 {
                    return Err(e);
                }
                // Late line-search death near a stationary point: keep the
                // last iterate and report its residuals.
                warn!("inner solve failed at outer iteration {}: {e}", outer + 1);
                break;
            }
        }
        outer_iterations = outer + 1;

        cs.displacements(&best, &mut d);
        cs.eq_residuals(&best, &d, &mut g_eq);
        cs.ineq_residuals(&best, &d, &mut g_ineq);
        let eq_viol = max_abs(&g_eq);
        let ineq_viol = max_pos(&g_ineq);

        debug!(
            "AL outer {}: mu={:.2e}, eq_violation={:.4e}, ineq_violation={:.4e}",
            outer + 1,
            al.mu,
            eq_viol,
            ineq_viol
        );

        if eq_viol.max(ineq_viol) < opts.al.constraint_tol {
            break;
        }

        for (k, &g) in g_eq.iter().enumerate() {
            al.eq_lambdas[k] += al.mu * g;
        }
        for (k, &g) in g_ineq.iter().enumerate() {
            al.ineq_lambdas[k] = (al.ineq_lambdas[k] + al.mu * g).max(0.0);
        }
        al.mu = (al.mu * opts.al.mu_factor).min(opts.al.mu_max);
    }

    cs.displacements(&best, &mut d);
    cs.eq_residuals(&best, &d, &mut g_eq);
    cs.ineq_residuals(&best, &d, &mut g_ineq);
    let max_eq_violation = max_abs(&g_eq);
    let max_ineq_violation = max_pos(&g_ineq);
    let converged = max_eq_violation.max(max_ineq_violation) < opts.al.constraint_tol;

    assembly.store_forces(&best[..layout.n_forces()], layout.shift)?;
    if layout.coupled {
        assembly.store_displacements(&best[layout.displacement_offset()..layout.alpha_offset()])?;
    }

    Ok(SolverResult {
        objective: objective(kind, &opts.weights, &layout, &best),
        theta: best,
        max_eq_violation,
        max_ineq_violation,
        outer_iterations,
        inner_iterations,
        converged,
    })
}

// ─────────────────────────────────────────────────────────────
//  Entry points per formulation
// ─────────────────────────────────────────────────────────────

/// Rigid-block equilibrium with split normal forces (convex QP).
pub fn solve_rbe(assembly: &mut Assembly, opts: &SolverOptions) -> Result<SolverResult, VoussoirError> {
    solve(assembly, Formulation::Rbe, opts)
}

/// Coupled rigid-block analysis: forces, virtual displacements, and
/// sliding intensities with the full contact constraint set.
pub fn solve_cra(assembly: &mut Assembly, opts: &SolverOptions) -> Result<SolverResult, VoussoirError> {
    solve(assembly, Formulation::Cra, opts)
}

/// Coupled analysis on split forces with the tension-penalty objective.
pub fn solve_cra_penalty(
    assembly: &mut Assembly,
    opts: &SolverOptions,
) -> Result<SolverResult, VoussoirError> {
    solve(assembly, Formulation::CraPenalty, opts)
}
