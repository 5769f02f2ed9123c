use log::{debug, warn};

use crate::config::{ConfigError, Device, PreconditionerKind, SolverConfig, SolverKind};
use crate::error::Error;
use crate::precond::{AnyPreconditioner, MIN_PIVOT};
use crate::report::Reporter;
use crate::solvers::{
    check_system, BiCgStab, BiConjugateGradient, ConjugateGradient, DirectFactorization,
    DirectSolver, IterationOptions, SolveResult, SystemSolver,
};
use crate::sparse::{dot, l2_norm, SparseMatrix};

/// Relative tolerance of the symmetry probe.
pub const SYMMETRY_TOL: f64 = 1e-10;

/// Diagonal magnitude spread above which `Auto` picks Jacobi.
pub const JACOBI_SPREAD: f64 = 1e3;

/// Power iterations spent estimating the smallest eigenvalue.
pub const DEFAULT_PROBE_ITERS: usize = 64;

/// Relative margin the eigenvalue estimate must clear to count as positive.
const SPD_MARGIN: f64 = 1e-8;

/// Resolved solver/preconditioner pair for one system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolverPlan {
    pub solver: SolverKind,
    pub preconditioner: PreconditionerKind,
    /// Tried when the primary solver fails or does not converge.
    pub fallback: Option<SolverKind>,
}

/// Picks and runs a concrete solver for `A x = b`.
///
/// Stateless: construct one wherever it is needed and pass it by value.
#[derive(Debug, Clone, Copy)]
pub struct SolverManager {
    probe_iters: usize,
}

impl Default for SolverManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SolverManager {
    pub fn new() -> Self {
        Self {
            probe_iters: DEFAULT_PROBE_ITERS,
        }
    }

    /// Overrides the power-iteration budget of the positive-definiteness probe.
    pub fn with_probe_iters(probe_iters: usize) -> Self {
        Self {
            probe_iters: probe_iters.max(1),
        }
    }

    pub fn probe_iters(&self) -> usize {
        self.probe_iters
    }

    /// Resolves `Auto` entries of `config` against the matrix.
    pub fn plan(&self, a: &SparseMatrix, config: &SolverConfig) -> Result<SolverPlan, Error> {
        if let Device::Cuda(_) = config.device() {
            return Err(ConfigError::DeviceUnavailable(config.device()).into());
        }

        let (solver, fallback) = match config.solver() {
            SolverKind::Auto => {
                let symmetric = is_symmetric(a);
                let spd = symmetric && self.is_positive_definite(a);
                debug!("auto solver probe: symmetric={symmetric} spd={spd}");
                if spd {
                    (SolverKind::ConjugateGradient, Some(SolverKind::BiCgStab))
                } else {
                    (SolverKind::BiCgStab, None)
                }
            }
            kind => (kind, None),
        };

        let preconditioner = match config.preconditioner() {
            PreconditionerKind::Auto if !solver.is_iterative() => PreconditionerKind::None,
            PreconditionerKind::Auto if a.diagonal().iter().any(|d| d.abs() < MIN_PIVOT) => {
                debug!("auto preconditioner probe: zero diagonal, using identity");
                PreconditionerKind::None
            }
            PreconditionerKind::Auto => {
                let spread = diagonal_spread(a);
                debug!("auto preconditioner probe: diagonal spread {spread:.3e}");
                if spread > JACOBI_SPREAD {
                    PreconditionerKind::Jacobi
                } else {
                    PreconditionerKind::None
                }
            }
            PreconditionerKind::LeftScaling if solver == SolverKind::ConjugateGradient => {
                warn!("left scaling breaks the symmetry CG relies on, using symmetric scaling");
                PreconditionerKind::SymmetricScaling
            }
            kind => kind,
        };

        let plan = SolverPlan {
            solver,
            preconditioner,
            fallback,
        };
        debug!(
            "solver plan: {} with {} preconditioner (n = {})",
            plan.solver,
            plan.preconditioner,
            a.nrows()
        );
        Ok(plan)
    }

    pub fn solve(
        &self,
        a: &SparseMatrix,
        b: &[f64],
        config: &SolverConfig,
    ) -> Result<SolveResult, Error> {
        self.solve_with_reporter(a, b, config, None)
    }

    /// Like [`SolverManager::solve`], streaming iterations to `reporter`.
    pub fn solve_with_reporter(
        &self,
        a: &SparseMatrix,
        b: &[f64],
        config: &SolverConfig,
        mut reporter: Option<&mut dyn Reporter>,
    ) -> Result<SolveResult, Error> {
        check_system(a, b)?;
        let plan = self.plan(a, config)?;

        let primary = reporter.as_mut().map(|r| &mut **r as &mut dyn Reporter);
        let result = run(plan.solver, plan.preconditioner, a, b, config, primary)?;
        let result = match plan.fallback {
            Some(fallback) if !result.is_success() => {
                warn!(
                    "{} did not succeed (residual {:.3e}), falling back to {}",
                    result.solver, result.residual, fallback
                );
                run(fallback, plan.preconditioner, a, b, config, reporter)?
            }
            _ => result,
        };
        log_outcome(&result);
        Ok(result)
    }

    /// Solves `A x = b` for every right-hand side with one plan.
    ///
    /// The direct solver factors `A` once and reuses the factorization.
    pub fn solve_many(
        &self,
        a: &SparseMatrix,
        rhs: &[Vec<f64>],
        config: &SolverConfig,
    ) -> Result<Vec<SolveResult>, Error> {
        for b in rhs {
            check_system(a, b)?;
        }
        if rhs.is_empty() {
            return Ok(Vec::new());
        }
        let plan = self.plan(a, config)?;

        if plan.solver == SolverKind::Direct {
            let results: Vec<SolveResult> = match DirectFactorization::new(a) {
                Ok(factorization) => rhs
                    .iter()
                    .map(|b| factorization.solve_result(a, b))
                    .collect(),
                Err(failure) => rhs
                    .iter()
                    .map(|b| SolveResult::failed(SolverKind::Direct, b.len(), failure.clone()))
                    .collect(),
            };
            results.iter().for_each(log_outcome);
            return Ok(results);
        }

        let mut results = Vec::with_capacity(rhs.len());
        for b in rhs {
            let mut result = run(plan.solver, plan.preconditioner, a, b, config, None)?;
            if let Some(fallback) = plan.fallback.filter(|_| !result.is_success()) {
                warn!(
                    "{} did not succeed (residual {:.3e}), falling back to {}",
                    result.solver, result.residual, fallback
                );
                result = run(fallback, plan.preconditioner, a, b, config, None)?;
            }
            log_outcome(&result);
            results.push(result);
        }
        Ok(results)
    }

    /// Best-effort check that a symmetric matrix is positive definite.
    ///
    /// A positive, strictly diagonally dominant diagonal is conclusive.
    /// Otherwise the smallest eigenvalue is estimated by power iteration on
    /// `σI − A`, with `σ` the Gershgorin upper bound, which can misclassify
    /// nearly singular matrices.
    pub fn is_positive_definite(&self, a: &SparseMatrix) -> bool {
        let n = a.nrows();
        if n == 0 || !a.is_square() {
            return false;
        }

        let mut off_sums = vec![0.0; n];
        for (row, col, value) in a.triplets() {
            if row != col {
                off_sums[row] += value.abs();
            }
        }
        let diag = a.diagonal();
        if !diag.iter().all(|&d| d > 0.0) {
            return false;
        }
        if diag.iter().zip(&off_sums).all(|(d, off)| d > off) {
            return true;
        }

        let sigma = diag
            .iter()
            .zip(&off_sums)
            .map(|(d, off)| d + off)
            .fold(0.0, f64::max);

        // power iteration on B = σI − A, deterministic start
        let mut v: Vec<f64> = (0..n).map(|i| 1.0 + 0.1 * (i % 7) as f64).collect();
        normalize(&mut v);
        let mut av = vec![0.0; n];
        let mut mu = 0.0;
        for _ in 0..self.probe_iters {
            a.matvec(&v, &mut av);
            let mut bv: Vec<f64> = v.iter().zip(&av).map(|(v, av)| sigma * v - av).collect();
            mu = dot(&v, &bv);
            if normalize(&mut bv) == 0.0 {
                break;
            }
            v = bv;
        }

        let lambda_min = sigma - mu;
        debug!("positive-definite probe: sigma {sigma:.3e}, lambda_min estimate {lambda_min:.3e}");
        lambda_min > sigma * SPD_MARGIN
    }
}

/// Structural and numerical symmetry within [`SYMMETRY_TOL`].
pub fn is_symmetric(a: &SparseMatrix) -> bool {
    a.is_symmetric(SYMMETRY_TOL)
}

/// Ratio of the largest to the smallest diagonal magnitude.
///
/// Infinite when some diagonal entry is zero; `1.0` for an empty matrix.
pub fn diagonal_spread(a: &SparseMatrix) -> f64 {
    let diag = a.diagonal();
    if diag.is_empty() {
        return 1.0;
    }
    let (min, max) = diag
        .iter()
        .map(|d| d.abs())
        .fold((f64::INFINITY, 0.0f64), |(min, max), d| (min.min(d), max.max(d)));
    if min == 0.0 {
        f64::INFINITY
    } else {
        max / min
    }
}

fn run(
    solver: SolverKind,
    preconditioner: PreconditionerKind,
    a: &SparseMatrix,
    b: &[f64],
    config: &SolverConfig,
    reporter: Option<&mut dyn Reporter>,
) -> Result<SolveResult, Error> {
    let options = IterationOptions::from(config);
    let precond = AnyPreconditioner::from_kind(preconditioner, config.block_size());
    let (a, b) = (a.clone(), b.to_vec());
    let result = match solver {
        SolverKind::Direct => DirectSolver::new(a, b)?.solve(reporter),
        SolverKind::ConjugateGradient => {
            ConjugateGradient::new(a, b, precond, options)?.solve(reporter)
        }
        SolverKind::BiConjugateGradient => {
            BiConjugateGradient::new(a, b, precond, options)?.solve(reporter)
        }
        // plans never carry Auto
        SolverKind::BiCgStab | SolverKind::Auto => {
            BiCgStab::new(a, b, precond, options)?.solve(reporter)
        }
    };
    Ok(result)
}

fn log_outcome(result: &SolveResult) {
    match &result.error {
        Some(failure) => warn!("{} failed: {failure}", result.solver),
        None if !result.converged => warn!(
            "{} did not converge after {} iterations (residual {:.3e})",
            result.solver, result.iterations, result.residual
        ),
        None => debug!(
            "{} converged in {} iterations (residual {:.3e})",
            result.solver, result.iterations, result.residual
        ),
    }
}

fn normalize(v: &mut [f64]) -> f64 {
    let norm = l2_norm(v);
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    norm
}
