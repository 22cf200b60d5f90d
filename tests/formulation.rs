//! Checks for the formula table: variable layout arithmetic, initial
//! values, sign bounds, objective weighting, and constraint residuals.

use ndarray::Array2;
use voussoir::assembly::{Assembly, ContactFrame};
use voussoir::formulation::{
    initial_values, objective, variable_bounds, ConstraintSet, VariableLayout,
};
use voussoir::types::{Formulation, ObjectiveWeights, SolverOptions};

// ─────────────────────────────────────────────────────────────
//  Helpers
// ─────────────────────────────────────────────────────────────

fn standard_frame() -> ContactFrame {
    ContactFrame::new([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]).unwrap()
}

fn cube_on_support() -> Assembly {
    let mut assembly = Assembly::new();
    let support = assembly.add_support([0.0, 0.0, -0.5], 1.0);
    let block = assembly.add_block([0.0, 0.0, 0.5], 1.0);
    let points = Array2::from_shape_vec(
        (4, 3),
        vec![
            0.5, 0.5, 0.0,
            -0.5, 0.5, 0.0,
            -0.5, -0.5, 0.0,
            0.5, -0.5, 0.0,
        ],
    )
    .unwrap();
    assembly
        .add_interface(block, support, standard_frame(), points)
        .unwrap();
    assembly
}

// ─────────────────────────────────────────────────────────────
//  Layout arithmetic
// ─────────────────────────────────────────────────────────────

#[test]
fn layout_offsets() {
    let layout = VariableLayout::new(Formulation::Cra, 4, 2);
    assert_eq!(layout.n_forces(), 12);
    assert_eq!(layout.n_displacements(), 12);
    assert_eq!(layout.n_alphas(), 4);
    assert_eq!(layout.len(), 28);
    assert_eq!(layout.displacement_offset(), 12);
    assert_eq!(layout.alpha_offset(), 24);
    assert_eq!(layout.normal_index(2), 6);
    assert_eq!(layout.tangent_index(2, 0), 7);
    assert_eq!(layout.tangent_index(2, 1), 8);

    let layout = VariableLayout::new(Formulation::Rbe, 3, 2);
    assert_eq!(layout.n_forces(), 12);
    assert_eq!(layout.n_displacements(), 0);
    assert_eq!(layout.n_alphas(), 0);
    assert_eq!(layout.len(), 12);
    assert_eq!(layout.normal_index(1), 4);
    assert_eq!(layout.tangent_index(1, 0), 6);
    assert_eq!(layout.tangent_index(1, 1), 7);
}

// ─────────────────────────────────────────────────────────────
//  Initial values
// ─────────────────────────────────────────────────────────────

/// Split forces start at [1, 0, 1, 1] per point: the tension component
/// starts at zero.
#[test]
fn split_forces_start_with_zero_tension() {
    let layout = VariableLayout::new(Formulation::Rbe, 2, 1);
    let theta = initial_values(&layout);
    assert_eq!(theta, vec![1.0, 0.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0]);
}

#[test]
fn coupled_variables_start_at_zero() {
    let layout = VariableLayout::new(Formulation::Cra, 2, 1);
    let theta = initial_values(&layout);
    assert_eq!(&theta[..6], &[1.0; 6], "forces start at one");
    assert_eq!(&theta[6..], &[0.0; 8][..], "displacements and alpha at zero");
}

// ─────────────────────────────────────────────────────────────
//  Bounds
// ─────────────────────────────────────────────────────────────

#[test]
fn split_force_bounds() {
    let layout = VariableLayout::new(Formulation::Rbe, 2, 1);
    let bounds = variable_bounds(&layout);
    for i in 0..layout.len() {
        if i % 4 == 0 || i % 4 == 1 {
            assert_eq!(bounds.lower[i], 0.0, "fn+ / fn- must be non-negative");
        } else {
            assert_eq!(bounds.lower[i], f64::NEG_INFINITY, "tangentials are free");
        }
        assert_eq!(bounds.upper[i], f64::INFINITY);
    }
}

#[test]
fn coupled_bounds() {
    let layout = VariableLayout::new(Formulation::Cra, 2, 1);
    let bounds = variable_bounds(&layout);
    for i in 0..layout.n_forces() {
        if i % 3 == 0 {
            assert_eq!(bounds.lower[i], 0.0, "fn must be non-negative");
        } else {
            assert_eq!(bounds.lower[i], f64::NEG_INFINITY);
        }
    }
    for i in layout.displacement_offset()..layout.alpha_offset() {
        assert_eq!(bounds.lower[i], f64::NEG_INFINITY, "displacements are free");
    }
    for i in layout.alpha_offset()..layout.len() {
        assert_eq!(bounds.lower[i], 0.0, "alpha must be non-negative");
    }
}

// ─────────────────────────────────────────────────────────────
//  Objectives
// ─────────────────────────────────────────────────────────────

#[test]
fn rbe_objective_weights_compression_and_tension() {
    let layout = VariableLayout::new(Formulation::Rbe, 2, 1);
    let weights = ObjectiveWeights {
        alpha: 2.0,
        compression: 3.0,
        tension: 5.0,
    };
    let theta = vec![1.0, 2.0, 3.0, 4.0, 5.0, 0.0, 1.0, 1.0];
    // compression: 3 * (1 + 25), tension: 5 * (4 + 0)
    let expected = 3.0 * 26.0 + 5.0 * 4.0;
    let value = objective(Formulation::Rbe, &weights, &layout, &theta);
    assert!((value - expected).abs() < 1e-12, "got {value}, want {expected}");
}

#[test]
fn cra_objective_sums_normals_and_alpha() {
    let layout = VariableLayout::new(Formulation::Cra, 2, 1);
    let weights = ObjectiveWeights::default();
    let mut theta = vec![0.0; layout.len()];
    theta[0] = 1.0; // fn of point 0
    theta[3] = 4.0; // fn of point 1
    theta[1] = 9.0; // fu, must not contribute
    theta[layout.alpha_offset()] = 2.0;
    theta[layout.alpha_offset() + 1] = 3.0;
    let value = objective(Formulation::Cra, &weights, &layout, &theta);
    assert!((value - (1.0 + 16.0 + 4.0 + 9.0)).abs() < 1e-12);
}

#[test]
fn cra_penalty_objective_weights_alpha() {
    let layout = VariableLayout::new(Formulation::CraPenalty, 1, 1);
    let weights = ObjectiveWeights {
        alpha: 10.0,
        compression: 1.0,
        tension: 100.0,
    };
    let mut theta = vec![0.0; layout.len()];
    theta[0] = 2.0; // fn+
    theta[1] = 3.0; // fn-
    theta[layout.alpha_offset()] = 0.5;
    let value = objective(Formulation::CraPenalty, &weights, &layout, &theta);
    let expected = 10.0 * 0.25 + 1.0 * 4.0 + 100.0 * 9.0;
    assert!((value - expected).abs() < 1e-12, "got {value}, want {expected}");
}

/// Default weights penalise tension six orders of magnitude harder than
/// compression.
#[test]
fn default_weights() {
    let w = ObjectiveWeights::default();
    assert_eq!(w.alpha, 1e0);
    assert_eq!(w.compression, 1e0);
    assert_eq!(w.tension, 1e6);
}

// ─────────────────────────────────────────────────────────────
//  Constraint counts
// ─────────────────────────────────────────────────────────────

#[test]
fn constraint_counts_per_formulation() {
    let assembly = cube_on_support();
    let opts = SolverOptions::default();

    // vcount = 4, n_free = 1, 8 cone faces.
    let cs = ConstraintSet::build(&assembly, Formulation::Rbe, &opts).unwrap();
    assert_eq!(cs.n_eq(), 6, "equilibrium rows only");
    assert_eq!(cs.n_ineq(), 32 + 8, "8 cone faces x 4 points + fn sign bounds");
    assert!(cs.aeq_d.is_none());
    assert_eq!(cs.lb_idx.len(), 8, "fn+ and fn- per point");
    assert!(cs.ub_idx.is_empty());

    let cs = ConstraintSet::build(&assembly, Formulation::Cra, &opts).unwrap();
    assert_eq!(cs.n_eq(), 6 + 4 + 8, "equilibrium + contact + alignment");
    assert_eq!(
        cs.n_ineq(),
        32 + 4 + 24 + 8,
        "cone + no-penetration + d box + fn/alpha sign bounds"
    );
    assert_eq!(cs.layout.len(), 12 + 6 + 4);

    let cs = ConstraintSet::build(&assembly, Formulation::CraPenalty, &opts).unwrap();
    assert_eq!(cs.n_eq(), 6 + 4 + 4 + 8, "adds fn+ fn- exclusivity");
    assert_eq!(cs.n_ineq(), 60 + 12);
    assert_eq!(cs.layout.len(), 16 + 6 + 4);
}

// ─────────────────────────────────────────────────────────────
//  Residuals
// ─────────────────────────────────────────────────────────────

/// At f = 0 the equilibrium residual is the raw load vector; a uniform
/// normal field carrying the block weight zeroes it.
#[test]
fn equilibrium_residuals() {
    let assembly = cube_on_support();
    let opts = SolverOptions::default();
    let cs = ConstraintSet::build(&assembly, Formulation::Rbe, &opts).unwrap();

    let zero = vec![0.0; cs.layout.len()];
    let mut d = Vec::new();
    let mut g = Vec::new();
    cs.displacements(&zero, &mut d);
    cs.eq_residuals(&zero, &d, &mut g);
    assert_eq!(g.len(), 6);
    assert_eq!(g, cs.p, "residual at f = 0 is the load vector");
    assert_eq!(g[2], -1.0, "unit cube at unit density");

    let mut balanced = vec![0.0; cs.layout.len()];
    for i in 0..4 {
        balanced[4 * i] = 0.25; // fn+ shares the weight
    }
    cs.eq_residuals(&balanced, &d, &mut g);
    for (row, &r) in g.iter().enumerate() {
        assert!(r.abs() < 1e-12, "row {row} should balance, got {r}");
    }
}

/// δd is the compatibility image Aᵀq: a unit rotation about z produces
/// pure tangential sliding at the contact points.
#[test]
fn displacements_from_block_rotation() {
    let assembly = cube_on_support();
    let opts = SolverOptions::default();
    let cs = ConstraintSet::build(&assembly, Formulation::Cra, &opts).unwrap();

    let mut theta = vec![0.0; cs.layout.len()];
    theta[cs.layout.displacement_offset() + 5] = 1.0; // rz of the free block

    let mut d = Vec::new();
    cs.displacements(&theta, &mut d);
    assert_eq!(d.len(), 12);
    // First point (0.5, 0.5, 0), lever from the centroid (0.5, 0.5, -0.5):
    // velocity = omega x r = (-0.5, 0.5, 0).
    assert!(d[0].abs() < 1e-12, "no normal motion from rz");
    assert!((d[1] - (-0.5)).abs() < 1e-12, "du");
    assert!((d[2] - 0.5).abs() < 1e-12, "dv");

    // A pure vertical translation moves every point along the normal.
    let mut theta = vec![0.0; cs.layout.len()];
    theta[cs.layout.displacement_offset() + 2] = -1.0; // tz
    cs.displacements(&theta, &mut d);
    for i in 0..4 {
        assert!((d[3 * i] - (-1.0)).abs() < 1e-12, "dn of point {i}");
        assert!(d[3 * i + 1].abs() < 1e-12);
        assert!(d[3 * i + 2].abs() < 1e-12);
    }
}

#[test]
fn coupled_residuals() {
    let assembly = cube_on_support();
    let opts = SolverOptions::default();
    let cs = ConstraintSet::build(&assembly, Formulation::Cra, &opts).unwrap();
    let layout = cs.layout;

    let mut theta = vec![0.0; layout.len()];
    theta[layout.normal_index(0)] = 2.0;
    theta[layout.tangent_index(0, 0)] = 0.7;
    theta[layout.alpha_offset()] = 3.0;
    theta[layout.displacement_offset() + 5] = 1.0; // rz

    let mut d = Vec::new();
    let mut g_eq = Vec::new();
    let mut g_ineq = Vec::new();
    cs.displacements(&theta, &mut d);
    cs.eq_residuals(&theta, &d, &mut g_eq);
    cs.ineq_residuals(&theta, &d, &mut g_ineq);
    assert_eq!(g_eq.len(), cs.n_eq());
    assert_eq!(g_ineq.len(), cs.n_ineq());

    // Contact complementarity of point 0: fn (dn + eps) with dn = 0.
    let contact = g_eq[6];
    assert!((contact - 2.0 * opts.eps).abs() < 1e-15, "got {contact}");

    // Sliding alignment of point 0, u direction: fu + alpha du,
    // du = -0.5 from the rotation.
    let ft_dt = g_eq[6 + 4];
    assert!((ft_dt - (0.7 + 3.0 * (-0.5))).abs() < 1e-12, "got {ft_dt}");

    // No-penetration of point 0: -(dn + eps).
    let no_pen = g_ineq[32];
    assert!((no_pen - (-opts.eps)).abs() < 1e-15, "got {no_pen}");

    // Displacement box of the du component of point 0 (|du| = 0.5 far
    // above the bound).
    let box_upper = g_ineq[32 + 4 + 1];
    assert!((box_upper - (-0.5 - opts.d_bnd)).abs() < 1e-12, "got {box_upper}");
    let box_lower = g_ineq[32 + 4 + 12 + 1];
    assert!((box_lower - (0.5 - opts.d_bnd)).abs() < 1e-12, "got {box_lower}");

    // Sign bound rows come last; the first is fn of point 0 (g = -fn).
    let fn_bound = g_ineq[32 + 4 + 24];
    assert!((fn_bound - (-2.0)).abs() < 1e-12, "got {fn_bound}");
}

#[test]
fn exclusivity_residual() {
    let assembly = cube_on_support();
    let opts = SolverOptions::default();
    let cs = ConstraintSet::build(&assembly, Formulation::CraPenalty, &opts).unwrap();

    let mut theta = vec![0.0; cs.layout.len()];
    theta[0] = 2.0; // fn+ of point 0
    theta[1] = 3.0; // fn- of point 0

    let mut d = Vec::new();
    let mut g_eq = Vec::new();
    cs.displacements(&theta, &mut d);
    cs.eq_residuals(&theta, &d, &mut g_eq);

    // Order: 6 equilibrium, 4 contact, then exclusivity.
    let fn_np = g_eq[6 + 4];
    assert!((fn_np - 6.0).abs() < 1e-12, "fn+ fn- product, got {fn_np}");
}

// ─────────────────────────────────────────────────────────────
//  Model validation
// ─────────────────────────────────────────────────────────────

#[test]
fn frames_must_be_orthonormal() {
    assert!(ContactFrame::new([2.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]).is_err());
    assert!(ContactFrame::new(
        [1.0, 0.0, 0.0],
        [0.6, 0.8, 0.0],
        [0.0, 0.0, 1.0],
    )
    .is_err());
    assert!(ContactFrame::from_normal([0.0, 0.0, 0.0]).is_err());

    let frame = ContactFrame::from_normal([0.0, 0.0, 2.0]).unwrap();
    assert!((frame.normal[2] - 1.0).abs() < 1e-12, "normal is normalised");
    let dot_un: f64 = (0..3).map(|i| frame.u[i] * frame.normal[i]).sum();
    assert!(dot_un.abs() < 1e-12);
    let dot_uv: f64 = (0..3).map(|i| frame.u[i] * frame.v[i]).sum();
    assert!(dot_uv.abs() < 1e-12);
}

#[test]
fn interfaces_must_reference_valid_blocks() {
    let mut assembly = Assembly::new();
    let a = assembly.add_block([0.0, 0.0, 0.0], 1.0);
    let points = Array2::from_shape_vec((1, 3), vec![0.0, 0.0, 0.0]).unwrap();

    assert!(assembly
        .add_interface(a, 7, standard_frame(), points.clone())
        .is_err());
    assert!(assembly
        .add_interface(a, a, standard_frame(), points.clone())
        .is_err());

    let empty = Array2::from_shape_vec((0, 3), Vec::new()).unwrap();
    let b = assembly.add_support([0.0, 0.0, -1.0], 1.0);
    assert!(assembly.add_interface(a, b, standard_frame(), empty).is_err());
    assert!(assembly.add_interface(a, b, standard_frame(), points).is_ok());
}
