//! Constrained elliptic solves on triangle meshes.
//!
//! This crate computes minimal surfaces (harmonic interpolation of fixed
//! vertices) and "flation", a normal-directed displacement with Laplacian
//! smoothing, by assembling sparse systems from mesh geometry and solving
//! them with a pluggable solver/preconditioner framework.
//!
//! How it works (high level):
//! - Build the cotangent Laplacian `L` of the mesh.
//! - Split unknowns into free and fixed vertices with row/column masks.
//! - Hand the free system to a `SolverManager`, which picks a direct or
//!   Krylov solver (CG, BiCG, BiCGSTAB) and a preconditioner, or uses the
//!   ones named in the `SolverConfig`.
//!
//! Calling it:
//! - Build a `TriMesh` from positions and triangles (validated).
//! - Describe the problem with `MinimalSurface` or `Flation`.
//! - Call `solve` with a `SolverManager` and a `SolverConfig`, or `spawn`
//!   to run it on a worker thread and poll the returned `SolveJob`.
//!
//! Numerical failures (a singular factorization, a breakdown) do not raise:
//! they are captured in `SolveResult::error` and the geometry is left alone.
//! Invalid inputs and configurations are reported as `Error` up front.
//!
//! Example:
//! ```rust,no_run
//! use soapfilm::{MinimalSurface, SolverConfig, SolverKind, SolverManager, TriMesh};
//!
//! let mesh = TriMesh::new(
//!     vec![[0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [2.0, 2.0, 0.0], [0.0, 2.0, 0.0], [1.0, 1.0, 1.0]],
//!     vec![[0, 1, 4], [1, 2, 4], [2, 3, 4], [3, 0, 4]],
//! )
//! .unwrap();
//! let config = SolverConfig::builder()
//!     .solver(SolverKind::ConjugateGradient)
//!     .tolerance(1e-10)
//!     .build()
//!     .unwrap();
//! let solution = MinimalSurface::with_boundary_fixed(mesh)
//!     .solve(&SolverManager::new(), &config)
//!     .unwrap();
//! assert!(solution.converged());
//! assert!(solution.positions[4][2].abs() < 1e-8);
//! ```

mod config;
mod error;
mod job;
mod laplacian;
mod manager;
mod mesh;
mod precond;
mod problem;
mod report;
mod solvers;
mod sparse;

pub use config::{
    ConfigError, Device, PreconditionerKind, SolverConfig, SolverConfigBuilder, SolverKind,
};
pub use error::Error;
pub use job::{JobState, SolveJob};
pub use laplacian::{cotangent_laplacian, COTANGENT_EPS};
pub use manager::{
    diagonal_spread, is_symmetric, SolverManager, SolverPlan, DEFAULT_PROBE_ITERS, JACOBI_SPREAD,
    SYMMETRY_TOL,
};
pub use mesh::{FixedVertices, ShapeError, TriMesh, VertexField};
pub use precond::{
    AnyPreconditioner, ApproximateInverse, BlockJacobi, Identity, Jacobi, LeftScaling,
    Preconditioner, Richardson, SymmetricScaling, MIN_PIVOT,
};
pub use problem::{Flation, MeshSolution, MinimalSurface};
pub use report::{IterationReport, Reporter, StdoutReporter};
pub use solvers::{
    BiCgStab, BiConjugateGradient, ConjugateGradient, DirectFactorization, DirectSolver,
    IterationOptions, SolveFailure, SolveResult, SystemSolver, BREAKDOWN_GUARD,
};
pub use sparse::{CooMatrix, PatternError, SparseMatrix};
