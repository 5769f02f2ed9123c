use std::io;

use log::{debug, warn};

use crate::config::SolverConfig;
use crate::error::Error;
use crate::job::SolveJob;
use crate::laplacian::cotangent_laplacian;
use crate::manager::SolverManager;
use crate::mesh::{FixedVertices, ShapeError, TriMesh, VertexField};
use crate::solvers::{SolveFailure, SolveResult};
use crate::sparse::{CooMatrix, SparseMatrix};

/// New geometry produced by a mesh problem.
#[derive(Debug, Clone)]
pub struct MeshSolution {
    pub positions: Vec<[f64; 3]>,
    /// `positions` minus the input positions.
    pub displacement: Vec<[f64; 3]>,
    /// One entry per linear solve, empty when nothing was free to move.
    pub results: Vec<SolveResult>,
}

impl MeshSolution {
    fn unchanged(mesh: &TriMesh) -> Self {
        Self {
            positions: mesh.positions().to_vec(),
            displacement: vec![[0.0; 3]; mesh.vertex_count()],
            results: Vec::new(),
        }
    }

    fn from_positions(mesh: &TriMesh, positions: Vec<[f64; 3]>, results: Vec<SolveResult>) -> Self {
        let displacement = positions
            .iter()
            .zip(mesh.positions())
            .map(|(p, q)| [p[0] - q[0], p[1] - q[1], p[2] - q[2]])
            .collect();
        Self {
            positions,
            displacement,
            results,
        }
    }

    /// Every solve met its tolerance.
    pub fn converged(&self) -> bool {
        self.results.iter().all(|r| r.converged)
    }

    /// First captured numerical failure, if any.
    pub fn error(&self) -> Option<&SolveFailure> {
        self.results.iter().find_map(|r| r.error.as_ref())
    }

    /// Largest final residual over all solves.
    pub fn residual(&self) -> f64 {
        self.results.iter().map(|r| r.residual).fold(0.0, f64::max)
    }
}

/// Harmonic interpolation of fixed vertex positions.
///
/// Solves `L_ff x = -L_fb x_b` once per axis, with `L` the cotangent
/// Laplacian split into free (`f`) and fixed (`b`) vertices.
#[derive(Debug, Clone)]
pub struct MinimalSurface {
    mesh: TriMesh,
    fixed: Vec<usize>,
    targets: Option<Vec<[f64; 3]>>,
}

impl MinimalSurface {
    /// Fixed vertices keep their current positions unless targets are given.
    pub fn new(mesh: TriMesh, fixed: Vec<usize>) -> Self {
        Self {
            mesh,
            fixed,
            targets: None,
        }
    }

    /// Fixes the boundary loop(s) of the mesh.
    pub fn with_boundary_fixed(mesh: TriMesh) -> Self {
        let fixed = mesh.boundary_vertices();
        Self::new(mesh, fixed)
    }

    /// Explicit positions for the fixed vertices, in the order of the fixed indices.
    pub fn with_targets(mut self, targets: Vec<[f64; 3]>) -> Self {
        self.targets = Some(targets);
        self
    }

    pub fn mesh(&self) -> &TriMesh {
        &self.mesh
    }

    pub fn solve(
        &self,
        manager: &SolverManager,
        config: &SolverConfig,
    ) -> Result<MeshSolution, Error> {
        let n = self.mesh.vertex_count();
        let fixed = FixedVertices::from_indices(n, &self.fixed)?;
        let mut target = self.mesh.positions().to_vec();
        if let Some(targets) = &self.targets {
            if targets.len() != self.fixed.len() {
                return Err(ShapeError::TargetCount {
                    expected: self.fixed.len(),
                    actual: targets.len(),
                }
                .into());
            }
            for (k, (&vertex, position)) in self.fixed.iter().zip(targets).enumerate() {
                if !position.iter().all(|c| c.is_finite()) {
                    return Err(ShapeError::NonFiniteField {
                        field: "targets",
                        index: k,
                    }
                    .into());
                }
                target[vertex] = *position;
            }
        }

        if fixed.free_count() == 0 {
            debug!("minimal surface: no free vertices");
            return Ok(MeshSolution::unchanged(&self.mesh));
        }

        let l = cotangent_laplacian(&self.mesh);
        let free_mask = fixed.free_mask();
        // -L is positive semidefinite, so the free block is SPD for a connected mesh
        let a = l.mask(&free_mask, &free_mask)?.scale(-1.0);
        let coupling = l.mask(&free_mask, fixed.fixed_mask())?;
        let fixed_idx = fixed.fixed_indices();
        let rhs: Vec<Vec<f64>> = (0..3)
            .map(|axis| {
                let boundary: Vec<f64> = fixed_idx.iter().map(|&v| target[v][axis]).collect();
                coupling.mul_vec(&boundary)
            })
            .collect();
        debug!(
            "minimal surface: {} free of {} vertices, {} nonzeros",
            a.nrows(),
            n,
            a.nnz()
        );

        let results = manager.solve_many(&a, &rhs, config)?;
        if let Some(failure) = results.iter().find_map(|r| r.error.as_ref()) {
            warn!("minimal surface: leaving geometry untouched ({failure})");
            return Ok(MeshSolution {
                results,
                ..MeshSolution::unchanged(&self.mesh)
            });
        }

        let free_idx = fixed.free_indices();
        let mut positions = target;
        for (axis, result) in results.iter().enumerate() {
            for (&vertex, &value) in free_idx.iter().zip(&result.solution) {
                positions[vertex][axis] = value;
            }
        }
        Ok(MeshSolution::from_positions(&self.mesh, positions, results))
    }

    /// Runs [`MinimalSurface::solve`] on a worker thread.
    pub fn spawn(
        self,
        manager: SolverManager,
        config: SolverConfig,
    ) -> io::Result<SolveJob<Result<MeshSolution, Error>>> {
        SolveJob::spawn("minimal-surface", move || self.solve(&manager, &config))
    }
}

/// Normal-directed displacement with Laplacian smoothing.
///
/// Minimizes, per free vertex `i` with normal `n_i` and displacement `d_i`,
/// the smoothness energy of `L d` weighted by `lambda_laplacian`, plus
/// `alpha_tangent` times the tangential part of `d_i` and `beta_normal`
/// times the deviation of its normal part from `target_offset`. Fixed
/// vertices do not move. The x/y/z components are solved as one system.
#[derive(Debug, Clone)]
pub struct Flation {
    mesh: TriMesh,
    fixed: Vec<usize>,
    target_offset: VertexField,
    lambda_laplacian: VertexField,
    alpha_tangent: VertexField,
    beta_normal: VertexField,
}

impl Flation {
    /// Defaults: `target_offset = 0`, `lambda_laplacian = 1`,
    /// `alpha_tangent = 0`, `beta_normal = 1`.
    pub fn new(mesh: TriMesh, fixed: Vec<usize>) -> Self {
        Self {
            mesh,
            fixed,
            target_offset: VertexField::Constant(0.0),
            lambda_laplacian: VertexField::Constant(1.0),
            alpha_tangent: VertexField::Constant(0.0),
            beta_normal: VertexField::Constant(1.0),
        }
    }

    pub fn target_offset(mut self, field: impl Into<VertexField>) -> Self {
        self.target_offset = field.into();
        self
    }

    pub fn lambda_laplacian(mut self, field: impl Into<VertexField>) -> Self {
        self.lambda_laplacian = field.into();
        self
    }

    pub fn alpha_tangent(mut self, field: impl Into<VertexField>) -> Self {
        self.alpha_tangent = field.into();
        self
    }

    pub fn beta_normal(mut self, field: impl Into<VertexField>) -> Self {
        self.beta_normal = field.into();
        self
    }

    pub fn mesh(&self) -> &TriMesh {
        &self.mesh
    }

    /// Full `3n × 3n` system before the fixed vertices are masked out.
    ///
    /// Unknowns are interleaved per vertex (`x0, y0, z0, x1, ...`).
    pub fn assemble(&self) -> Result<(SparseMatrix, Vec<f64>), Error> {
        let n = self.mesh.vertex_count();
        let offset = self.target_offset.resolve("target_offset", n)?;
        let lambda = self.lambda_laplacian.resolve("lambda_laplacian", n)?;
        let alpha = self.alpha_tangent.resolve("alpha_tangent", n)?;
        let beta = self.beta_normal.resolve("beta_normal", n)?;
        let normals = self.mesh.normals_or_computed();

        let l = cotangent_laplacian(&self.mesh);
        let smoothing = l
            .transpose()
            .matmul(&l)
            .kron(&SparseMatrix::identity(3))
            .map_entries(|row, col, value| (lambda[row / 3] + lambda[col / 3]) * value);

        let mut anisotropy = CooMatrix::with_capacity(3 * n, 3 * n, 9 * n);
        for (i, normal) in normals.iter().enumerate() {
            for r in 0..3 {
                for c in 0..3 {
                    let projection = normal[r] * normal[c];
                    let identity = if r == c { 1.0 } else { 0.0 };
                    let value = alpha[i] * (identity - projection) + beta[i] * projection;
                    anisotropy.push(3 * i + r, 3 * i + c, value);
                }
            }
        }

        let a = smoothing.add(&anisotropy.to_csr());
        let b = (0..3 * n)
            .map(|k| beta[k / 3] * offset[k / 3] * normals[k / 3][k % 3])
            .collect();
        Ok((a, b))
    }

    pub fn solve(
        &self,
        manager: &SolverManager,
        config: &SolverConfig,
    ) -> Result<MeshSolution, Error> {
        let n = self.mesh.vertex_count();
        let fixed = FixedVertices::from_indices(n, &self.fixed)?;
        let (a, b) = self.assemble()?;
        if fixed.free_count() == 0 {
            debug!("flation: no free vertices");
            return Ok(MeshSolution::unchanged(&self.mesh));
        }

        let dof_mask = fixed.free_dof_mask(3);
        let a_free = a.mask(&dof_mask, &dof_mask)?;
        let b_free: Vec<f64> = b
            .iter()
            .zip(&dof_mask)
            .filter(|(_, &keep)| keep)
            .map(|(&value, _)| value)
            .collect();
        debug!(
            "flation: {} free dofs of {}, {} nonzeros",
            a_free.nrows(),
            3 * n,
            a_free.nnz()
        );

        let result = manager.solve(&a_free, &b_free, config)?;
        if let Some(failure) = &result.error {
            warn!("flation: leaving geometry untouched ({failure})");
            return Ok(MeshSolution {
                results: vec![result],
                ..MeshSolution::unchanged(&self.mesh)
            });
        }

        let mut positions = self.mesh.positions().to_vec();
        for (&vertex, d) in fixed.free_indices().iter().zip(result.solution.chunks_exact(3)) {
            for axis in 0..3 {
                positions[vertex][axis] += d[axis];
            }
        }
        Ok(MeshSolution::from_positions(&self.mesh, positions, vec![result]))
    }

    /// Runs [`Flation::solve`] on a worker thread.
    pub fn spawn(
        self,
        manager: SolverManager,
        config: SolverConfig,
    ) -> io::Result<SolveJob<Result<MeshSolution, Error>>> {
        SolveJob::spawn("flation", move || self.solve(&manager, &config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fan() -> TriMesh {
        // square with a center vertex
        TriMesh::new(
            vec![
                [0.0, 0.0, 0.0],
                [2.0, 0.0, 0.0],
                [2.0, 2.0, 0.0],
                [0.0, 2.0, 0.0],
                [1.0, 1.0, 1.0],
            ],
            vec![[0, 1, 4], [1, 2, 4], [2, 3, 4], [3, 0, 4]],
        )
        .unwrap()
    }

    #[test]
    fn minimal_surface_flattens_the_center() {
        let problem = MinimalSurface::with_boundary_fixed(fan());
        let solution = problem
            .solve(&SolverManager::new(), &SolverConfig::default())
            .unwrap();
        assert!(solution.converged());
        assert_eq!(solution.results.len(), 3);
        let center = solution.positions[4];
        assert!((center[0] - 1.0).abs() < 1e-6);
        assert!((center[1] - 1.0).abs() < 1e-6);
        assert!(center[2].abs() < 1e-6);
        assert!((solution.displacement[4][2] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn all_fixed_is_a_no_op() {
        let mesh = fan();
        let solution = MinimalSurface::new(mesh.clone(), (0..5).collect())
            .solve(&SolverManager::new(), &SolverConfig::default())
            .unwrap();
        assert_eq!(solution.positions, mesh.positions());
        assert!(solution.results.is_empty());
    }

    #[test]
    fn target_count_must_match_fixed_count() {
        let err = MinimalSurface::new(fan(), vec![0, 1])
            .with_targets(vec![[0.0; 3]])
            .solve(&SolverManager::new(), &SolverConfig::default())
            .unwrap_err();
        assert_eq!(
            err,
            Error::Shape(ShapeError::TargetCount {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn flation_system_is_symmetric() {
        let (a, b) = Flation::new(fan(), vec![0, 1, 2, 3])
            .target_offset(0.5)
            .alpha_tangent(0.25)
            .assemble()
            .unwrap();
        assert_eq!(a.shape(), (15, 15));
        assert_eq!(b.len(), 15);
        assert!(a.is_symmetric(1e-10));
    }

    #[test]
    fn flation_rejects_short_fields() {
        let err = Flation::new(fan(), vec![0])
            .beta_normal(vec![1.0, 1.0])
            .solve(&SolverManager::new(), &SolverConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Shape(ShapeError::FieldLength {
                field: "beta_normal",
                ..
            })
        ));
    }
}
