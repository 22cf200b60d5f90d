//! Rigid-block assembly model: blocks, contact interfaces, and the
//! free/support partition consumed by the matrix builders.
//!
//! The assembly is a flat structure: blocks and interfaces live in vectors
//! and reference each other by index.  A contact force acts positively on
//! an interface's first block and negatively on its second.

use crate::types::VoussoirError;
use ndarray::Array2;

const FRAME_TOL: f64 = 1e-8;

// ─────────────────────────────────────────────────────────────
//  Contact frame
// ─────────────────────────────────────────────────────────────

/// Orthonormal right-handed contact frame.  `normal` points from the
/// interface's second block toward its first; `u` and `v` span the contact
/// plane.
#[derive(Debug, Clone, Copy)]
pub struct ContactFrame {
    pub u: [f64; 3],
    pub v: [f64; 3],
    pub normal: [f64; 3],
}

impl ContactFrame {
    /// Build a frame from explicit axes, validating orthonormality.
    pub fn new(u: [f64; 3], v: [f64; 3], normal: [f64; 3]) -> Result<Self, VoussoirError> {
        let frame = Self { u, v, normal };
        for (name, axis) in [("u", u), ("v", v), ("normal", normal)] {
            if (norm(axis) - 1.0).abs() > FRAME_TOL {
                return Err(VoussoirError::Model(format!(
                    "contact frame axis {name} is not a unit vector"
                )));
            }
        }
        for (pair, d) in [("u.v", dot(u, v)), ("u.n", dot(u, normal)), ("v.n", dot(v, normal))] {
            if d.abs() > FRAME_TOL {
                return Err(VoussoirError::Model(format!(
                    "contact frame axes {pair} are not orthogonal (dot = {d:.2e})"
                )));
            }
        }
        Ok(frame)
    }

    /// Build a frame from the normal alone, completing the tangent pair
    /// against the coordinate axis least aligned with it.
    pub fn from_normal(normal: [f64; 3]) -> Result<Self, VoussoirError> {
        let n_len = norm(normal);
        if !n_len.is_finite() || n_len < FRAME_TOL {
            return Err(VoussoirError::Model(
                "contact normal must be finite with non-zero length".into(),
            ));
        }
        let n = scale(normal, 1.0 / n_len);

        let mut seed = [0.0; 3];
        let least = (0..3)
            .min_by(|&a, &b| n[a].abs().partial_cmp(&n[b].abs()).unwrap())
            .unwrap();
        seed[least] = 1.0;

        let u_raw = cross(seed, n);
        let u = scale(u_raw, 1.0 / norm(u_raw));
        let v = cross(n, u);
        Ok(Self { u, v, normal: n })
    }
}

// ─────────────────────────────────────────────────────────────
//  Blocks and interfaces
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Block {
    /// Centre of mass; moment rows of the equilibrium matrix are taken
    /// about this point.
    pub centroid: [f64; 3],
    pub volume: f64,
    pub is_support: bool,
    /// Virtual displacement (tx, ty, tz, rx, ry, rz) written back after a
    /// coupled solve.  `None` for supports and before any solve.
    pub displacement: Option<[f64; 6]>,
}

/// Solved contact force at one interface point: compression and tension
/// parts of the normal force plus the two tangential components.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContactForce {
    pub c_np: f64,
    pub c_nn: f64,
    pub c_u: f64,
    pub c_v: f64,
}

#[derive(Debug, Clone)]
pub struct Interface {
    /// The contact force acts positively on `block_a`, negatively on
    /// `block_b`.
    pub block_a: usize,
    pub block_b: usize,
    pub frame: ContactFrame,
    /// Contact points, one row per point (n × 3, world coordinates).
    pub points: Array2<f64>,
    /// Per-point forces, filled by the solver write-back.
    pub forces: Vec<ContactForce>,
}

// ─────────────────────────────────────────────────────────────
//  Assembly
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Assembly {
    pub blocks: Vec<Block>,
    pub interfaces: Vec<Interface>,
}

impl Assembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a free block; returns its index.
    pub fn add_block(&mut self, centroid: [f64; 3], volume: f64) -> usize {
        self.blocks.push(Block {
            centroid,
            volume,
            is_support: false,
            displacement: None,
        });
        self.blocks.len() - 1
    }

    /// Add a support block (fixed, excluded from the equilibrium rows).
    pub fn add_support(&mut self, centroid: [f64; 3], volume: f64) -> usize {
        self.blocks.push(Block {
            centroid,
            volume,
            is_support: true,
            displacement: None,
        });
        self.blocks.len() - 1
    }

    /// Add a contact interface between two blocks.  `points` is an n × 3
    /// matrix of world coordinates with n >= 1.
    pub fn add_interface(
        &mut self,
        block_a: usize,
        block_b: usize,
        frame: ContactFrame,
        points: Array2<f64>,
    ) -> Result<usize, VoussoirError> {
        let nb = self.blocks.len();
        if block_a >= nb || block_b >= nb {
            return Err(VoussoirError::Model(format!(
                "interface references block {} but assembly has {nb} blocks",
                block_a.max(block_b)
            )));
        }
        if block_a == block_b {
            return Err(VoussoirError::Model(format!(
                "interface connects block {block_a} to itself"
            )));
        }
        if points.ncols() != 3 || points.nrows() == 0 {
            return Err(VoussoirError::Model(format!(
                "interface point set must be n x 3 with n >= 1, got {} x {}",
                points.nrows(),
                points.ncols()
            )));
        }
        self.interfaces.push(Interface {
            block_a,
            block_b,
            frame,
            points,
            forces: Vec::new(),
        });
        Ok(self.interfaces.len() - 1)
    }

    /// Indices of non-support blocks, in block order.
    pub fn free_blocks(&self) -> Vec<usize> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.is_support)
            .map(|(i, _)| i)
            .collect()
    }

    /// Block index → free index (`None` for supports).
    pub fn free_index_map(&self) -> Vec<Option<usize>> {
        let mut map = vec![None; self.blocks.len()];
        for (free_idx, block_idx) in self.free_blocks().into_iter().enumerate() {
            map[block_idx] = Some(free_idx);
        }
        map
    }

    /// Total number of contact points across all interfaces.
    pub fn contact_point_count(&self) -> usize {
        self.interfaces.iter().map(|i| i.points.nrows()).sum()
    }

    // ─────────────────────────────────────────────────────────
    //  Result write-back
    // ─────────────────────────────────────────────────────────

    /// Copy solved force components onto each interface.
    ///
    /// `shift` is the per-point force stride of the solution vector: 3 for
    /// (fn, fu, fv), 4 for (fn⁺, fn⁻, fu, fv).  With `shift == 3` the
    /// tension component `c_nn` is zero.
    pub fn store_forces(&mut self, theta: &[f64], shift: usize) -> Result<(), VoussoirError> {
        let needed = shift * self.contact_point_count();
        if theta.len() < needed {
            return Err(VoussoirError::Shape(format!(
                "force vector has {} components, layout needs {needed}",
                theta.len()
            )));
        }

        let tangent = if shift == 4 { 1 } else { 0 };
        let mut offset = 0;
        for interface in &mut self.interfaces {
            let n = interface.points.nrows();
            interface.forces.clear();
            for i in 0..n {
                interface.forces.push(ContactForce {
                    c_np: theta[offset + shift * i],
                    c_nn: if shift == 4 { theta[offset + shift * i + 1] } else { 0.0 },
                    c_u: theta[offset + shift * i + 1 + tangent],
                    c_v: theta[offset + shift * i + 2 + tangent],
                });
            }
            offset += shift * n;
        }
        Ok(())
    }

    /// Copy virtual displacements (6 components per free block, in free
    /// order) onto the blocks.  Supports are skipped.
    pub fn store_displacements(&mut self, q: &[f64]) -> Result<(), VoussoirError> {
        let n_free = self.free_blocks().len();
        if q.len() != 6 * n_free {
            return Err(VoussoirError::Shape(format!(
                "displacement vector has {} components, expected {}",
                q.len(),
                6 * n_free
            )));
        }
        let mut offset = 0;
        for block in &mut self.blocks {
            if block.is_support {
                continue;
            }
            let mut d = [0.0; 6];
            d.copy_from_slice(&q[offset..offset + 6]);
            block.displacement = Some(d);
            offset += 6;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  Small vector helpers
// ─────────────────────────────────────────────────────────────

pub(crate) fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub(crate) fn norm(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

pub(crate) fn scale(a: [f64; 3], s: f64) -> [f64; 3] {
    [a[0] * s, a[1] * s, a[2] * s]
}

pub(crate) fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}
