//! Preconditioners for the iterative solvers.
//!
//! Every preconditioner is set up exactly once per solve and then applied any
//! number of times. `setup` may fold a scaling into the system itself (left and
//! symmetric scaling) and `recover` undoes the matching change of variables
//! on the final iterate.

use faer::linalg::solvers::Solve;
use faer::Mat;

use crate::config::PreconditionerKind;
use crate::solvers::SolveFailure;
use crate::sparse::SparseMatrix;

/// Diagonal magnitudes below this are treated as zero pivots.
pub const MIN_PIVOT: f64 = 1e-12;

/// Approximate inverse of a system operator.
pub trait Preconditioner {
    /// One-time transform of the system, returning the system the solver iterates on.
    fn setup(
        &mut self,
        a: SparseMatrix,
        b: Vec<f64>,
    ) -> Result<(SparseMatrix, Vec<f64>), SolveFailure>;

    /// `z = M⁻¹ r` for the (possibly transformed) operator `a`.
    fn apply(&self, a: &SparseMatrix, r: &[f64], z: &mut [f64]);

    /// `z = M⁻ᵀ r`; used for the shadow system of BiCG.
    fn apply_transpose(&self, a: &SparseMatrix, r: &[f64], z: &mut [f64]) {
        self.apply(a, r, z);
    }

    /// Maps a solution of the transformed system back to the original unknowns.
    fn recover(&self, _x: &mut [f64]) {}
}

/// No-op preconditioner.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Preconditioner for Identity {
    fn setup(
        &mut self,
        a: SparseMatrix,
        b: Vec<f64>,
    ) -> Result<(SparseMatrix, Vec<f64>), SolveFailure> {
        Ok((a, b))
    }

    fn apply(&self, _a: &SparseMatrix, r: &[f64], z: &mut [f64]) {
        z.copy_from_slice(r);
    }
}

/// `z = diag(A)⁻¹ r`.
#[derive(Debug, Clone, Default)]
pub struct Jacobi {
    inv_diag: Vec<f64>,
}

impl Preconditioner for Jacobi {
    fn setup(
        &mut self,
        a: SparseMatrix,
        b: Vec<f64>,
    ) -> Result<(SparseMatrix, Vec<f64>), SolveFailure> {
        self.inv_diag = checked_diagonal(&a)?.into_iter().map(|d| 1.0 / d).collect();
        Ok((a, b))
    }

    fn apply(&self, _a: &SparseMatrix, r: &[f64], z: &mut [f64]) {
        for ((z, &r), &d) in z.iter_mut().zip(r).zip(&self.inv_diag) {
            *z = r * d;
        }
    }
}

/// Inverts consecutive `block_size × block_size` diagonal blocks.
///
/// The last block is shorter when the order is not a multiple of the block size.
#[derive(Debug, Clone)]
pub struct BlockJacobi {
    block_size: usize,
    // row-major dense inverses
    blocks: Vec<Vec<f64>>,
}

impl BlockJacobi {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            blocks: Vec::new(),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn apply_blocks(&self, r: &[f64], z: &mut [f64], transpose: bool) {
        for (index, inv) in self.blocks.iter().enumerate() {
            let start = index * self.block_size;
            let k = (r.len() - start).min(self.block_size);
            for i in 0..k {
                let mut sum = 0.0;
                for j in 0..k {
                    let entry = if transpose { inv[j * k + i] } else { inv[i * k + j] };
                    sum += entry * r[start + j];
                }
                z[start + i] = sum;
            }
        }
    }
}

impl Preconditioner for BlockJacobi {
    fn setup(
        &mut self,
        a: SparseMatrix,
        b: Vec<f64>,
    ) -> Result<(SparseMatrix, Vec<f64>), SolveFailure> {
        let n = a.nrows();
        self.blocks.clear();
        for (index, start) in (0..n).step_by(self.block_size).enumerate() {
            let end = (start + self.block_size).min(n);
            let k = end - start;
            let mut block = Mat::<f64>::zeros(k, k);
            for row in start..end {
                let (cols, vals) = a.row(row);
                for (&col, &value) in cols.iter().zip(vals) {
                    if (start..end).contains(&col) {
                        block[(row - start, col - start)] = value;
                    }
                }
            }
            let lu = block.partial_piv_lu();
            let inv = lu.solve(Mat::<f64>::identity(k, k));
            let mut dense = Vec::with_capacity(k * k);
            for i in 0..k {
                for j in 0..k {
                    dense.push(inv[(i, j)]);
                }
            }
            if !dense.iter().all(|v| v.is_finite()) {
                return Err(SolveFailure::SingularBlock { block: index });
            }
            self.blocks.push(dense);
        }
        Ok((a, b))
    }

    fn apply(&self, _a: &SparseMatrix, r: &[f64], z: &mut [f64]) {
        self.apply_blocks(r, z, false);
    }

    fn apply_transpose(&self, _a: &SparseMatrix, r: &[f64], z: &mut [f64]) {
        self.apply_blocks(r, z, true);
    }
}

/// Solves `D⁻¹A x = D⁻¹b` instead of `A x = b`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeftScaling;

impl Preconditioner for LeftScaling {
    fn setup(
        &mut self,
        a: SparseMatrix,
        b: Vec<f64>,
    ) -> Result<(SparseMatrix, Vec<f64>), SolveFailure> {
        let d = checked_diagonal(&a)?;
        let scaled = a.map_entries(|row, _, value| value / d[row]);
        let rhs = b.iter().zip(&d).map(|(b, d)| b / d).collect();
        Ok((scaled, rhs))
    }

    fn apply(&self, _a: &SparseMatrix, r: &[f64], z: &mut [f64]) {
        z.copy_from_slice(r);
    }
}

/// Solves `(S A S) y = S b` with `S = |D|^-1/2`, then `x = S y`.
///
/// Keeps a symmetric system symmetric.
#[derive(Debug, Clone, Default)]
pub struct SymmetricScaling {
    inv_sqrt: Vec<f64>,
}

impl Preconditioner for SymmetricScaling {
    fn setup(
        &mut self,
        a: SparseMatrix,
        b: Vec<f64>,
    ) -> Result<(SparseMatrix, Vec<f64>), SolveFailure> {
        let d = checked_diagonal(&a)?;
        self.inv_sqrt = d.iter().map(|d| 1.0 / d.abs().sqrt()).collect();
        let s = &self.inv_sqrt;
        let scaled = a.map_entries(|row, col, value| s[row] * value * s[col]);
        let rhs = b.iter().zip(s).map(|(b, s)| b * s).collect();
        Ok((scaled, rhs))
    }

    fn apply(&self, _a: &SparseMatrix, r: &[f64], z: &mut [f64]) {
        z.copy_from_slice(r);
    }

    fn recover(&self, x: &mut [f64]) {
        for (x, s) in x.iter_mut().zip(&self.inv_sqrt) {
            *x *= s;
        }
    }
}

/// Sparse approximate inverse from Newton–Schulz refinement of `diag(A)⁻¹`.
///
/// Each step computes `M ← M (2I − A M)`. Fill grows with every step, so the
/// step count stays small.
#[derive(Debug, Clone)]
pub struct ApproximateInverse {
    steps: usize,
    m: SparseMatrix,
}

impl ApproximateInverse {
    pub const DEFAULT_STEPS: usize = 2;

    pub fn new(steps: usize) -> Self {
        Self {
            steps,
            m: SparseMatrix::zeros(0, 0),
        }
    }

    /// The current approximate inverse.
    pub fn matrix(&self) -> &SparseMatrix {
        &self.m
    }
}

impl Default for ApproximateInverse {
    fn default() -> Self {
        Self::new(Self::DEFAULT_STEPS)
    }
}

impl Preconditioner for ApproximateInverse {
    fn setup(
        &mut self,
        a: SparseMatrix,
        b: Vec<f64>,
    ) -> Result<(SparseMatrix, Vec<f64>), SolveFailure> {
        let d = checked_diagonal(&a)?;
        let inv: Vec<f64> = d.iter().map(|d| 1.0 / d).collect();
        let two_i = SparseMatrix::identity(a.nrows()).scale(2.0);
        let mut m = SparseMatrix::from_diagonal(&inv);
        for _ in 0..self.steps {
            let correction = two_i.add(&a.matmul(&m).scale(-1.0));
            m = m.matmul(&correction);
        }
        self.m = m;
        Ok((a, b))
    }

    fn apply(&self, _a: &SparseMatrix, r: &[f64], z: &mut [f64]) {
        self.m.matvec(r, z);
    }

    fn apply_transpose(&self, _a: &SparseMatrix, r: &[f64], z: &mut [f64]) {
        self.m.matvec_transpose(r, z);
    }
}

/// A fixed number of inner Jacobi (Richardson) sweeps on `A z = r` from `z = 0`.
#[derive(Debug, Clone)]
pub struct Richardson {
    sweeps: usize,
    inv_diag: Vec<f64>,
}

impl Richardson {
    pub const DEFAULT_SWEEPS: usize = 3;

    pub fn new(sweeps: usize) -> Self {
        Self {
            sweeps,
            inv_diag: Vec::new(),
        }
    }

    fn sweep(&self, a: &SparseMatrix, r: &[f64], z: &mut [f64], transpose: bool) {
        z.fill(0.0);
        let mut az = vec![0.0; r.len()];
        for _ in 0..self.sweeps {
            if transpose {
                a.matvec_transpose(z, &mut az);
            } else {
                a.matvec(z, &mut az);
            }
            for i in 0..z.len() {
                z[i] += (r[i] - az[i]) * self.inv_diag[i];
            }
        }
    }
}

impl Default for Richardson {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SWEEPS)
    }
}

impl Preconditioner for Richardson {
    fn setup(
        &mut self,
        a: SparseMatrix,
        b: Vec<f64>,
    ) -> Result<(SparseMatrix, Vec<f64>), SolveFailure> {
        self.inv_diag = checked_diagonal(&a)?.into_iter().map(|d| 1.0 / d).collect();
        Ok((a, b))
    }

    fn apply(&self, a: &SparseMatrix, r: &[f64], z: &mut [f64]) {
        self.sweep(a, r, z, false);
    }

    fn apply_transpose(&self, a: &SparseMatrix, r: &[f64], z: &mut [f64]) {
        self.sweep(a, r, z, true);
    }
}

/// Closed set of the built-in preconditioners, selected by [`PreconditionerKind`].
#[derive(Debug, Clone)]
pub enum AnyPreconditioner {
    Identity(Identity),
    Jacobi(Jacobi),
    BlockJacobi(BlockJacobi),
    LeftScaling(LeftScaling),
    SymmetricScaling(SymmetricScaling),
    ApproximateInverse(ApproximateInverse),
    Iterative(Richardson),
}

impl AnyPreconditioner {
    /// Instantiates a concrete preconditioner.
    ///
    /// `Auto` is resolved by the solver manager; passed here directly it means
    /// the identity.
    pub fn from_kind(kind: PreconditionerKind, block_size: usize) -> Self {
        match kind {
            PreconditionerKind::Auto | PreconditionerKind::None => Self::Identity(Identity),
            PreconditionerKind::Jacobi => Self::Jacobi(Jacobi::default()),
            PreconditionerKind::BlockJacobi => Self::BlockJacobi(BlockJacobi::new(block_size)),
            PreconditionerKind::LeftScaling => Self::LeftScaling(LeftScaling),
            PreconditionerKind::SymmetricScaling => {
                Self::SymmetricScaling(SymmetricScaling::default())
            }
            PreconditionerKind::ApproximateInverse => {
                Self::ApproximateInverse(ApproximateInverse::default())
            }
            PreconditionerKind::Iterative => Self::Iterative(Richardson::default()),
        }
    }

    pub fn kind(&self) -> PreconditionerKind {
        match self {
            Self::Identity(_) => PreconditionerKind::None,
            Self::Jacobi(_) => PreconditionerKind::Jacobi,
            Self::BlockJacobi(_) => PreconditionerKind::BlockJacobi,
            Self::LeftScaling(_) => PreconditionerKind::LeftScaling,
            Self::SymmetricScaling(_) => PreconditionerKind::SymmetricScaling,
            Self::ApproximateInverse(_) => PreconditionerKind::ApproximateInverse,
            Self::Iterative(_) => PreconditionerKind::Iterative,
        }
    }

    fn as_dyn(&self) -> &dyn Preconditioner {
        match self {
            Self::Identity(p) => p,
            Self::Jacobi(p) => p,
            Self::BlockJacobi(p) => p,
            Self::LeftScaling(p) => p,
            Self::SymmetricScaling(p) => p,
            Self::ApproximateInverse(p) => p,
            Self::Iterative(p) => p,
        }
    }

    fn as_dyn_mut(&mut self) -> &mut dyn Preconditioner {
        match self {
            Self::Identity(p) => p,
            Self::Jacobi(p) => p,
            Self::BlockJacobi(p) => p,
            Self::LeftScaling(p) => p,
            Self::SymmetricScaling(p) => p,
            Self::ApproximateInverse(p) => p,
            Self::Iterative(p) => p,
        }
    }
}

impl Preconditioner for AnyPreconditioner {
    fn setup(
        &mut self,
        a: SparseMatrix,
        b: Vec<f64>,
    ) -> Result<(SparseMatrix, Vec<f64>), SolveFailure> {
        self.as_dyn_mut().setup(a, b)
    }

    fn apply(&self, a: &SparseMatrix, r: &[f64], z: &mut [f64]) {
        self.as_dyn().apply(a, r, z);
    }

    fn apply_transpose(&self, a: &SparseMatrix, r: &[f64], z: &mut [f64]) {
        self.as_dyn().apply_transpose(a, r, z);
    }

    fn recover(&self, x: &mut [f64]) {
        self.as_dyn().recover(x);
    }
}

fn checked_diagonal(a: &SparseMatrix) -> Result<Vec<f64>, SolveFailure> {
    let d = a.diagonal();
    match d.iter().position(|d| d.abs() < MIN_PIVOT) {
        Some(row) => Err(SolveFailure::ZeroDiagonal { row }),
        None => Ok(d),
    }
}
