use std::fmt;

// ─────────────────────────────────────────────────────────────
//  Error type
// ─────────────────────────────────────────────────────────────

/// Unified error type for all fallible operations in the crate.
///
/// Every function in the public API returns `Result<T, VoussoirError>`
/// instead of panicking.
#[derive(Debug)]
pub enum VoussoirError {
    /// Inconsistent assembly input (bad block index, degenerate frame,
    /// malformed contact point set).
    Model(String),
    /// Dimension mismatch between matrices, variable vectors, or buffers.
    Shape(String),
    /// L-BFGS / line-search failure inside the optimisation driver.
    Solver(String),
}

impl fmt::Display for VoussoirError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model(msg) => write!(f, "model error: {msg}"),
            Self::Shape(msg) => write!(f, "shape error: {msg}"),
            Self::Solver(msg) => write!(f, "solver error: {msg}"),
        }
    }
}

impl std::error::Error for VoussoirError {}

impl From<argmin::core::Error> for VoussoirError {
    fn from(e: argmin::core::Error) -> Self {
        Self::Solver(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────
//  Formulation selection
// ─────────────────────────────────────────────────────────────

/// Which equilibrium formulation to build and solve.
///
/// * `Rbe`: force-only equilibrium with split normal forces
///   f̃ = (fn⁺, fn⁻, fu, fv) and a tension-penalising objective.
/// * `Cra`: coupled forces f = (fn, fu, fv), virtual block displacements,
///   and sliding intensities α, with contact complementarity and
///   friction/sliding alignment constraints.
/// * `CraPenalty`: the coupled constraint set applied to the split force
///   variables, plus the fn⁺·fn⁻ exclusivity condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Formulation {
    Rbe,
    Cra,
    CraPenalty,
}

impl Formulation {
    /// Force components per contact point: 3 for (fn, fu, fv), 4 for the
    /// split layout (fn⁺, fn⁻, fu, fv).
    pub fn shift(self) -> usize {
        match self {
            Self::Cra => 3,
            Self::Rbe | Self::CraPenalty => 4,
        }
    }

    /// Whether the formulation carries virtual displacements and sliding
    /// intensities alongside the contact forces.
    pub fn coupled(self) -> bool {
        !matches!(self, Self::Rbe)
    }

    /// Whether normal forces are split into compression/tension parts.
    pub fn split_forces(self) -> bool {
        self.shift() == 4
    }
}

// ─────────────────────────────────────────────────────────────
//  Objective weights
// ─────────────────────────────────────────────────────────────

/// Weighting factors (W_α, W_compression, W_tension) for the quadratic
/// objectives.  Tension is penalised heavily so it only appears where the
/// assembly cannot stand without it.
#[derive(Debug, Clone, Copy)]
pub struct ObjectiveWeights {
    pub alpha: f64,
    pub compression: f64,
    pub tension: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            alpha: 1e0,
            compression: 1e0,
            tension: 1e6,
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Solver / physics options
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// Coulomb friction coefficient.
    pub mu: f64,
    /// Material density used for the gravity load `p[2] = -volume * density`.
    pub density: f64,
    /// Overlap parameter: contact admits penetration up to `eps`.
    pub eps: f64,
    /// Box bound on virtual contact displacements, `|δd| <= d_bnd`.
    pub d_bnd: f64,
    /// Number of half-planes in the linearised friction cone (4 or 8).
    pub cone_faces: usize,
    pub weights: ObjectiveWeights,
    /// Inner L-BFGS iteration cap.
    pub max_iterations: usize,
    pub al: AlSettings,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            mu: 0.84,
            density: 1.0,
            eps: 1e-4,
            d_bnd: 1e-3,
            cone_faces: 8,
            weights: ObjectiveWeights::default(),
            max_iterations: 500,
            al: AlSettings::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Augmented Lagrangian settings / state
// ─────────────────────────────────────────────────────────────

/// Settings for the augmented Lagrangian outer loop.
#[derive(Debug, Clone)]
pub struct AlSettings {
    /// Initial penalty parameter μ.
    pub mu_init: f64,
    /// Multiplicative growth factor for μ each outer iteration.
    pub mu_factor: f64,
    /// Maximum value of μ (prevents ill-conditioning).
    pub mu_max: f64,
    /// Maximum number of outer AL iterations.
    pub max_outer_iters: usize,
    /// Feasibility tolerance: stop when the worst violation drops below it.
    pub constraint_tol: f64,
}

impl Default for AlSettings {
    fn default() -> Self {
        Self {
            mu_init: 10.0,
            mu_factor: 5.0,
            mu_max: 1e8,
            max_outer_iters: 25,
            constraint_tol: 1e-4,
        }
    }
}

/// Mutable multiplier state for the augmented Lagrangian.
///
/// Equality multipliers are free-signed; inequality multipliers are kept
/// non-negative by the `max(0, λ + μ g)` update.
#[derive(Debug, Clone)]
pub struct AlState {
    pub eq_lambdas: Vec<f64>,
    pub ineq_lambdas: Vec<f64>,
    pub mu: f64,
}

impl AlState {
    pub fn new(n_eq: usize, n_ineq: usize, settings: &AlSettings) -> Self {
        Self {
            eq_lambdas: vec![0.0; n_eq],
            ineq_lambdas: vec![0.0; n_ineq],
            mu: settings.mu_init,
        }
    }
}

// ─────────────────────────────────────────────────────────────
//  Solver result
// ─────────────────────────────────────────────────────────────

/// Outcome of a full augmented-Lagrangian solve.  The per-interface forces
/// and per-block displacements are written back onto the [`Assembly`]
/// separately; this struct reports the raw solution and diagnostics.
///
/// [`Assembly`]: crate::assembly::Assembly
#[derive(Debug, Clone)]
pub struct SolverResult {
    /// Packed solution vector (forces, then displacements, then α).
    pub theta: Vec<f64>,
    /// Objective value at the solution (without the AL terms).
    pub objective: f64,
    /// Worst equality-constraint violation, max |g_k|.
    pub max_eq_violation: f64,
    /// Worst inequality-constraint violation, max(0, g_k).
    pub max_ineq_violation: f64,
    pub outer_iterations: usize,
    pub inner_iterations: usize,
    pub converged: bool,
}
