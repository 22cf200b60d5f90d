//! **Voussoir** — rigid-block contact equilibrium via constrained
//! optimisation.
//!
//! Given an assembly of rigid blocks connected through frictional contact
//! interfaces, the crate builds and solves a mathematical program whose
//! solution yields contact forces (and optionally virtual block
//! displacements) consistent with static equilibrium and Coulomb-friction
//! admissibility:
//!
//! 1. **Assembly** (`assembly`): blocks, contact interfaces, and the
//!    free/support partition.
//! 2. **Matrices** (`matrices`): sparse equilibrium matrix and linearised
//!    friction cone.
//! 3. **Formulation** (`formulation`): variable layout, initial values,
//!    bounds, objectives, and constraint residuals for the RBE / CRA /
//!    CRA-penalty formulations.
//! 4. **Gradients** (`gradients`): hand-coded merit gradients, no AD.
//! 5. **Solver** (`solver`): augmented-Lagrangian L-BFGS via `argmin`,
//!    plus result write-back onto the assembly.

pub mod assembly;
pub mod formulation;
pub mod gradients;
pub mod matrices;
pub mod solver;
pub mod types;
