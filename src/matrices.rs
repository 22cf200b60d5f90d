//! Sparse equilibrium and friction matrix assembly.
//!
//! The equilibrium matrix maps per-point contact force components to net
//! force/moment residuals per block (six rows each, moments about the block
//! centroid).  The friction matrix stacks the half-planes of a linearised
//! Coulomb cone, `cone_faces` rows per contact point.  Both are built as
//! triplets and compressed to CSR.

use crate::assembly::{cross, Assembly};
use crate::types::VoussoirError;
use log::info;
use sprs::{CsMat, TriMat};

// ─────────────────────────────────────────────────────────────
//  Equilibrium matrix
// ─────────────────────────────────────────────────────────────

/// Assemble the full equilibrium matrix, 6 rows per block (including
/// supports), `shift` columns per contact point.
///
/// Column layout per point:
///   * `shift == 3`:  fn along `n`, fu along `u`, fv along `v`
///   * `shift == 4`:  fn⁺ along `+n`, fn⁻ along `−n`, fu, fv
///
/// Force rows hold the world axis components; moment rows hold the lever
/// cross product `(x − centroid) × axis`.
pub fn equilibrium_matrix(assembly: &Assembly, shift: usize) -> Result<CsMat<f64>, VoussoirError> {
    if shift != 3 && shift != 4 {
        return Err(VoussoirError::Shape(format!(
            "force layout must have 3 or 4 components per point, got {shift}"
        )));
    }

    let n_rows = 6 * assembly.blocks.len();
    let n_cols = shift * assembly.contact_point_count();
    let mut tri = TriMat::new((n_rows, n_cols));

    let mut point_idx = 0;
    for interface in &assembly.interfaces {
        let frame = &interface.frame;
        // (axis, column offset within the point's column group)
        let axes: Vec<([f64; 3], usize)> = if shift == 3 {
            vec![(frame.normal, 0), (frame.u, 1), (frame.v, 2)]
        } else {
            let neg_n = [-frame.normal[0], -frame.normal[1], -frame.normal[2]];
            vec![(frame.normal, 0), (neg_n, 1), (frame.u, 2), (frame.v, 3)]
        };

        for i in 0..interface.points.nrows() {
            let x = [
                interface.points[[i, 0]],
                interface.points[[i, 1]],
                interface.points[[i, 2]],
            ];
            let col0 = shift * (point_idx + i);
            for &(axis, offset) in &axes {
                let col = col0 + offset;
                for (block, sign) in [(interface.block_a, 1.0), (interface.block_b, -1.0)] {
                    let c = assembly.blocks[block].centroid;
                    let lever = [x[0] - c[0], x[1] - c[1], x[2] - c[2]];
                    let moment = cross(lever, axis);
                    let row0 = 6 * block;
                    for d in 0..3 {
                        if axis[d] != 0.0 {
                            tri.add_triplet(row0 + d, col, sign * axis[d]);
                        }
                        if moment[d] != 0.0 {
                            tri.add_triplet(row0 + 3 + d, col, sign * moment[d]);
                        }
                    }
                }
            }
        }
        point_idx += interface.points.nrows();
    }

    Ok(tri.to_csr())
}

/// Extract a row subset of a sparse matrix, preserving row order.
pub fn select_rows(mat: &CsMat<f64>, rows: &[usize]) -> CsMat<f64> {
    let mat_csr = mat.to_csr();
    let mut tri = TriMat::new((rows.len(), mat.cols()));
    for (new_row, &old_row) in rows.iter().enumerate() {
        let start = mat_csr.indptr().raw_storage()[old_row];
        let end_ = mat_csr.indptr().raw_storage()[old_row + 1];
        for nz in start..end_ {
            tri.add_triplet(new_row, mat_csr.indices()[nz], mat_csr.data()[nz]);
        }
    }
    tri.to_csr()
}

// ─────────────────────────────────────────────────────────────
//  Equilibrium system (free rows only)
// ─────────────────────────────────────────────────────────────

/// The equilibrium matrix restricted to free blocks, plus the bookkeeping
/// the formulation needs: contact point count and the free-block list.
#[derive(Debug, Clone)]
pub struct EquilibriumSystem {
    /// `6 * n_free` × `shift * vcount`, CSR.
    pub aeq: CsMat<f64>,
    pub vcount: usize,
    pub free: Vec<usize>,
    pub shift: usize,
}

impl EquilibriumSystem {
    pub fn from_assembly(assembly: &Assembly, shift: usize) -> Result<Self, VoussoirError> {
        let full = equilibrium_matrix(assembly, shift)?;
        let free = assembly.free_blocks();
        let rows: Vec<usize> = free
            .iter()
            .flat_map(|&index| (0..6).map(move |i| index * 6 + i))
            .collect();
        let aeq = select_rows(&full, &rows);
        info!("Aeq: {} x {}", aeq.rows(), aeq.cols());
        Ok(Self {
            aeq,
            vcount: assembly.contact_point_count(),
            free,
            shift,
        })
    }
}

// ─────────────────────────────────────────────────────────────
//  Friction cone matrix
// ─────────────────────────────────────────────────────────────

/// Assemble the linearised Coulomb cone matrix, `cone_faces` rows per
/// contact point (`Afr f <= 0`).
///
/// With 4 faces the cone is the axis-aligned pyramid `±fu <= μ fn`,
/// `±fv <= μ fn`; 8 faces add the four diagonal half-planes with
/// coefficient √2⁄2.  For the split layout (`shift == 4`) the capacity
/// column is fn⁺ only; tension carries no friction.
pub fn friction_matrix(
    vcount: usize,
    cone_faces: usize,
    mu: f64,
    shift: usize,
) -> Result<CsMat<f64>, VoussoirError> {
    if cone_faces != 4 && cone_faces != 8 {
        return Err(VoussoirError::Shape(format!(
            "friction cone must have 4 or 8 faces, got {cone_faces}"
        )));
    }
    if shift != 3 && shift != 4 {
        return Err(VoussoirError::Shape(format!(
            "force layout must have 3 or 4 components per point, got {shift}"
        )));
    }

    let diag = std::f64::consts::FRAC_1_SQRT_2;
    let mut tri = TriMat::new((cone_faces * vcount, shift * vcount));

    for p in 0..vcount {
        let row0 = cone_faces * p;
        let jn = shift * p;
        let ju = jn + shift - 2;
        let jv = jn + shift - 1;

        let faces: [(f64, f64); 8] = [
            (1.0, 0.0),
            (-1.0, 0.0),
            (0.0, 1.0),
            (0.0, -1.0),
            (diag, diag),
            (diag, -diag),
            (-diag, diag),
            (-diag, -diag),
        ];
        for (k, &(cu, cv)) in faces.iter().take(cone_faces).enumerate() {
            tri.add_triplet(row0 + k, jn, -mu);
            if cu != 0.0 {
                tri.add_triplet(row0 + k, ju, cu);
            }
            if cv != 0.0 {
                tri.add_triplet(row0 + k, jv, cv);
            }
        }
    }

    Ok(tri.to_csr())
}

// ─────────────────────────────────────────────────────────────
//  Gravity loads
// ─────────────────────────────────────────────────────────────

/// External load vector over free blocks: one 6-row group per free block
/// with `p[2] = -volume * density`.  Moments about the centroid are zero.
pub fn gravity_loads(assembly: &Assembly, density: f64) -> Vec<f64> {
    let free = assembly.free_blocks();
    let mut p = vec![0.0; 6 * free.len()];
    for (i, &block) in free.iter().enumerate() {
        p[i * 6 + 2] = -assembly.blocks[block].volume * density;
    }
    p
}
