use core::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use faer::linalg::solvers::Solve;
use faer::sparse::linalg::solvers::Lu;
use faer::Mat;

use crate::config::{SolverConfig, SolverKind};
use crate::mesh::ShapeError;
use crate::precond::Preconditioner;
use crate::report::{emit_line, IterationReport, Reporter, StdoutReporter};
use crate::sparse::{dot, l2_norm, SparseMatrix};

/// Substituted for an exactly zero BiCG/BiCGSTAB denominator.
pub const BREAKDOWN_GUARD: f64 = 1e-20;

/// Numerical failure captured into a [`SolveResult`] instead of being raised.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveFailure {
    /// The direct factorization failed or produced a non-finite solution.
    Singular(String),
    /// A diagonal-based preconditioner met a (near) zero pivot.
    ZeroDiagonal { row: usize },
    /// A block-Jacobi diagonal block is not invertible.
    SingularBlock { block: usize },
    /// A recurrence denominator vanished.
    Breakdown {
        iteration: usize,
        quantity: &'static str,
    },
    /// BiCGSTAB's stabilization weight dropped to zero.
    Stagnation { iteration: usize },
    /// The residual became NaN or infinite.
    NonFinite { iteration: usize },
}

impl fmt::Display for SolveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Singular(detail) => write!(f, "singular system: {detail}"),
            Self::ZeroDiagonal { row } => write!(f, "zero diagonal entry in row {row}"),
            Self::SingularBlock { block } => write!(f, "diagonal block {block} is singular"),
            Self::Breakdown {
                iteration,
                quantity,
            } => write!(f, "breakdown at iteration {iteration}: {quantity} vanished"),
            Self::Stagnation { iteration } => {
                write!(f, "stagnation at iteration {iteration}: omega is zero")
            }
            Self::NonFinite { iteration } => {
                write!(f, "residual became non-finite at iteration {iteration}")
            }
        }
    }
}

impl std::error::Error for SolveFailure {}

/// Outcome of one solve.
///
/// Non-convergence is not an error: `converged` is false, `error` is `None`
/// and `solution` holds the last iterate.
#[derive(Debug, Clone)]
pub struct SolveResult {
    pub solution: Vec<f64>,
    pub converged: bool,
    /// Residual 2-norm of the system the solver iterated on.
    pub residual: f64,
    pub iterations: usize,
    /// Solver that produced this result.
    pub solver: SolverKind,
    pub error: Option<SolveFailure>,
}

impl SolveResult {
    /// Zero vector, `converged = false`, infinite residual.
    pub fn failed(solver: SolverKind, n: usize, failure: SolveFailure) -> Self {
        Self {
            solution: vec![0.0; n],
            converged: false,
            residual: f64::INFINITY,
            iterations: 0,
            solver,
            error: Some(failure),
        }
    }

    /// Converged with no error.
    pub fn is_success(&self) -> bool {
        self.converged && self.error.is_none()
    }
}

/// Iteration controls shared by the Krylov solvers.
#[derive(Debug, Clone, Copy)]
pub struct IterationOptions {
    pub max_iters: usize,
    /// Stop once the residual 2-norm is below this value.
    pub tolerance: f64,
    /// Print a per-iteration table when no reporter is supplied.
    pub verbose: bool,
}

impl Default for IterationOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            tolerance: 1e-8,
            verbose: false,
        }
    }
}

impl From<&SolverConfig> for IterationOptions {
    fn from(config: &SolverConfig) -> Self {
        Self {
            max_iters: config.max_iters(),
            tolerance: config.tolerance(),
            verbose: config.verbose(),
        }
    }
}

/// A solver for `A x = b`, consumed by a single call to `solve`.
pub trait SystemSolver {
    fn kind(&self) -> SolverKind;

    /// Runs the solve. Numerical failures are captured in the result.
    fn solve(self, reporter: Option<&mut dyn Reporter>) -> SolveResult;
}

pub(crate) fn check_system(a: &SparseMatrix, b: &[f64]) -> Result<(), ShapeError> {
    if !a.is_square() {
        return Err(ShapeError::NotSquare {
            nrows: a.nrows(),
            ncols: a.ncols(),
        });
    }
    if b.len() != a.nrows() {
        return Err(ShapeError::RhsLength {
            expected: a.nrows(),
            actual: b.len(),
        });
    }
    Ok(())
}

/// Sparse LU factorization, reusable across right-hand sides.
pub struct DirectFactorization {
    n: usize,
    lu: Option<Lu<usize, f64>>,
}

impl DirectFactorization {
    pub fn new(a: &SparseMatrix) -> Result<Self, SolveFailure> {
        let n = a.nrows();
        if n == 0 {
            return Ok(Self { n, lu: None });
        }

        if !a.values().iter().all(|v| v.is_finite()) {
            return Err(SolveFailure::Singular(
                "sparse LU input contains NaN/Inf".into(),
            ));
        }
        let csc = a
            .to_faer()
            .map_err(|e| SolveFailure::Singular(format!("sparse matrix build failed: {e:?}")))?;
        // faer panics on a numerically zero pivot and only errors on structural singularity
        let lu = panic::catch_unwind(AssertUnwindSafe(|| csc.sp_lu()))
            .map_err(|_| SolveFailure::Singular("zero pivot in sparse LU".into()))?
            .map_err(|e| SolveFailure::Singular(format!("sparse LU factorization failed: {e:?}")))?;
        Ok(Self { n, lu: Some(lu) })
    }

    /// Solves for one right-hand side of length `n`.
    pub fn solve(&self, b: &[f64]) -> Result<Vec<f64>, SolveFailure> {
        let Some(lu) = &self.lu else {
            return Ok(Vec::new());
        };
        let rhs = Mat::<f64>::from_fn(self.n, 1, |i, _| b[i]);
        let x = panic::catch_unwind(AssertUnwindSafe(|| lu.solve(rhs)))
            .map_err(|_| SolveFailure::Singular("sparse LU solve panicked".into()))?;
        let out: Vec<f64> = (0..self.n).map(|i| x[(i, 0)]).collect();
        if !out.iter().all(|v| v.is_finite()) {
            return Err(SolveFailure::Singular(
                "sparse LU produced NaN/Inf solution".into(),
            ));
        }
        Ok(out)
    }

    /// Full solve result for `b`, with the residual `‖A x − b‖` for diagnostics.
    pub fn solve_result(&self, a: &SparseMatrix, b: &[f64]) -> SolveResult {
        match self.solve(b) {
            Ok(x) => {
                let mut ax = a.mul_vec(&x);
                for (ax, b) in ax.iter_mut().zip(b) {
                    *ax -= b;
                }
                SolveResult {
                    residual: l2_norm(&ax),
                    solution: x,
                    converged: true,
                    iterations: 1,
                    solver: SolverKind::Direct,
                    error: None,
                }
            }
            Err(failure) => SolveResult::failed(SolverKind::Direct, b.len(), failure),
        }
    }
}

/// Sparse LU direct solve.
pub struct DirectSolver {
    a: SparseMatrix,
    b: Vec<f64>,
}

impl DirectSolver {
    pub fn new(a: SparseMatrix, b: Vec<f64>) -> Result<Self, ShapeError> {
        check_system(&a, &b)?;
        Ok(Self { a, b })
    }
}

impl SystemSolver for DirectSolver {
    fn kind(&self) -> SolverKind {
        SolverKind::Direct
    }

    fn solve(self, _reporter: Option<&mut dyn Reporter>) -> SolveResult {
        match DirectFactorization::new(&self.a) {
            Ok(factorization) => factorization.solve_result(&self.a, &self.b),
            Err(failure) => SolveResult::failed(SolverKind::Direct, self.b.len(), failure),
        }
    }
}

/// Preconditioned conjugate gradient for symmetric definite systems.
pub struct ConjugateGradient<P> {
    a: SparseMatrix,
    b: Vec<f64>,
    precond: P,
    options: IterationOptions,
}

impl<P: Preconditioner> ConjugateGradient<P> {
    pub fn new(
        a: SparseMatrix,
        b: Vec<f64>,
        precond: P,
        options: IterationOptions,
    ) -> Result<Self, ShapeError> {
        check_system(&a, &b)?;
        Ok(Self {
            a,
            b,
            precond,
            options,
        })
    }
}

impl<P: Preconditioner> SystemSolver for ConjugateGradient<P> {
    fn kind(&self) -> SolverKind {
        SolverKind::ConjugateGradient
    }

    fn solve(self, reporter: Option<&mut dyn Reporter>) -> SolveResult {
        const KIND: SolverKind = SolverKind::ConjugateGradient;
        let Self {
            a,
            b,
            mut precond,
            options,
        } = self;
        let n = b.len();
        let mut run = Run::new(KIND, options, reporter);
        let (a, b) = match precond.setup(a, b) {
            Ok(system) => system,
            Err(failure) => return run.finish(SolveResult::failed(KIND, n, failure)),
        };

        let tol_sq = options.tolerance * options.tolerance;
        let mut x = vec![0.0; n];
        let mut r = b;
        let mut rr = dot(&r, &r);
        if meets_squared(rr, tol_sq) {
            return run.outcome(&precond, x, rr.sqrt(), 0, true, None);
        }

        let mut z = vec![0.0; n];
        precond.apply(&a, &r, &mut z);
        let mut p = z.clone();
        let mut rz = dot(&r, &z);
        let mut ap = vec![0.0; n];

        for iter in 0..options.max_iters {
            a.matvec(&p, &mut ap);
            let pap = dot(&p, &ap);
            if pap == 0.0 || !pap.is_finite() {
                let failure = SolveFailure::Breakdown {
                    iteration: iter,
                    quantity: "p·Ap",
                };
                return run.outcome(&precond, x, rr.sqrt(), iter, false, Some(failure));
            }
            let alpha = rz / pap;
            axpy(alpha, &p, &mut x);
            axpy(-alpha, &ap, &mut r);
            rr = dot(&r, &r);
            let residual = rr.sqrt();
            if !residual.is_finite() {
                let failure = SolveFailure::NonFinite { iteration: iter };
                return run.outcome(&precond, x, residual, iter + 1, false, Some(failure));
            }
            if meets_squared(rr, tol_sq) {
                run.report(iter, residual, alpha, 0.0);
                return run.outcome(&precond, x, residual, iter + 1, true, None);
            }

            precond.apply(&a, &r, &mut z);
            let rz_new = dot(&r, &z);
            if rz == 0.0 {
                let failure = SolveFailure::Breakdown {
                    iteration: iter,
                    quantity: "r·z",
                };
                return run.outcome(&precond, x, residual, iter + 1, false, Some(failure));
            }
            let beta = rz_new / rz;
            run.report(iter, residual, alpha, beta);
            for (p, z) in p.iter_mut().zip(&z) {
                *p = z + beta * *p;
            }
            rz = rz_new;
        }

        let residual = rr.sqrt();
        run.outcome(&precond, x, residual, options.max_iters, false, None)
    }
}

/// Preconditioned biconjugate gradient for general square systems.
pub struct BiConjugateGradient<P> {
    a: SparseMatrix,
    b: Vec<f64>,
    precond: P,
    options: IterationOptions,
}

impl<P: Preconditioner> BiConjugateGradient<P> {
    pub fn new(
        a: SparseMatrix,
        b: Vec<f64>,
        precond: P,
        options: IterationOptions,
    ) -> Result<Self, ShapeError> {
        check_system(&a, &b)?;
        Ok(Self {
            a,
            b,
            precond,
            options,
        })
    }
}

impl<P: Preconditioner> SystemSolver for BiConjugateGradient<P> {
    fn kind(&self) -> SolverKind {
        SolverKind::BiConjugateGradient
    }

    fn solve(self, reporter: Option<&mut dyn Reporter>) -> SolveResult {
        const KIND: SolverKind = SolverKind::BiConjugateGradient;
        let Self {
            a,
            b,
            mut precond,
            options,
        } = self;
        let n = b.len();
        let mut run = Run::new(KIND, options, reporter);
        let (a, b) = match precond.setup(a, b) {
            Ok(system) => system,
            Err(failure) => return run.finish(SolveResult::failed(KIND, n, failure)),
        };

        let mut x = vec![0.0; n];
        let mut r = b;
        let mut residual = l2_norm(&r);
        if meets(residual, options.tolerance) {
            return run.outcome(&precond, x, residual, 0, true, None);
        }

        // Shadow residual starts equal to r.
        let mut r_hat = r.clone();
        let mut z = vec![0.0; n];
        let mut z_hat = vec![0.0; n];
        precond.apply(&a, &r, &mut z);
        precond.apply_transpose(&a, &r_hat, &mut z_hat);
        let mut p = z.clone();
        let mut p_hat = z_hat.clone();
        let mut rho = dot(&z, &r_hat);
        let mut q = vec![0.0; n];
        let mut q_hat = vec![0.0; n];

        for iter in 0..options.max_iters {
            a.matvec(&p, &mut q);
            a.matvec_transpose(&p_hat, &mut q_hat);
            let alpha = rho / guard(dot(&p_hat, &q));
            axpy(alpha, &p, &mut x);
            axpy(-alpha, &q, &mut r);
            axpy(-alpha, &q_hat, &mut r_hat);

            residual = l2_norm(&r);
            if !residual.is_finite() {
                let failure = SolveFailure::NonFinite { iteration: iter };
                return run.outcome(&precond, x, residual, iter + 1, false, Some(failure));
            }
            if meets(residual, options.tolerance) {
                run.report(iter, residual, alpha, 0.0);
                return run.outcome(&precond, x, residual, iter + 1, true, None);
            }

            precond.apply(&a, &r, &mut z);
            precond.apply_transpose(&a, &r_hat, &mut z_hat);
            let rho_new = dot(&z, &r_hat);
            let beta = rho_new / guard(rho);
            run.report(iter, residual, alpha, beta);
            for i in 0..n {
                p[i] = z[i] + beta * p[i];
                p_hat[i] = z_hat[i] + beta * p_hat[i];
            }
            rho = rho_new;
        }

        run.outcome(&precond, x, residual, options.max_iters, false, None)
    }
}

/// Right-preconditioned BiCGSTAB for general square systems.
pub struct BiCgStab<P> {
    a: SparseMatrix,
    b: Vec<f64>,
    precond: P,
    options: IterationOptions,
}

impl<P: Preconditioner> BiCgStab<P> {
    pub fn new(
        a: SparseMatrix,
        b: Vec<f64>,
        precond: P,
        options: IterationOptions,
    ) -> Result<Self, ShapeError> {
        check_system(&a, &b)?;
        Ok(Self {
            a,
            b,
            precond,
            options,
        })
    }
}

impl<P: Preconditioner> SystemSolver for BiCgStab<P> {
    fn kind(&self) -> SolverKind {
        SolverKind::BiCgStab
    }

    fn solve(self, reporter: Option<&mut dyn Reporter>) -> SolveResult {
        const KIND: SolverKind = SolverKind::BiCgStab;
        let Self {
            a,
            b,
            mut precond,
            options,
        } = self;
        let n = b.len();
        let mut run = Run::new(KIND, options, reporter);
        let (a, b) = match precond.setup(a, b) {
            Ok(system) => system,
            Err(failure) => return run.finish(SolveResult::failed(KIND, n, failure)),
        };

        let mut x = vec![0.0; n];
        let mut r = b;
        let mut residual = l2_norm(&r);
        if meets(residual, options.tolerance) {
            return run.outcome(&precond, x, residual, 0, true, None);
        }

        let r_hat = r.clone();
        let mut rho_old = 1.0;
        let mut alpha = 1.0;
        let mut omega = 1.0;
        let mut v = vec![0.0; n];
        let mut p = vec![0.0; n];
        let mut p_hat = vec![0.0; n];
        let mut s = vec![0.0; n];
        let mut s_hat = vec![0.0; n];
        let mut t = vec![0.0; n];

        for iter in 0..options.max_iters {
            let rho = dot(&r_hat, &r);
            if rho == 0.0 {
                let failure = SolveFailure::Breakdown {
                    iteration: iter,
                    quantity: "r̂·r",
                };
                return run.outcome(&precond, x, residual, iter, false, Some(failure));
            }
            let beta = (rho / rho_old) * (alpha / omega);
            for i in 0..n {
                p[i] = r[i] + beta * (p[i] - omega * v[i]);
            }

            precond.apply(&a, &p, &mut p_hat);
            a.matvec(&p_hat, &mut v);
            alpha = rho / guard(dot(&r_hat, &v));

            for i in 0..n {
                s[i] = r[i] - alpha * v[i];
            }
            let s_norm = l2_norm(&s);
            if meets(s_norm, options.tolerance) {
                axpy(alpha, &p_hat, &mut x);
                run.report(iter, s_norm, alpha, 0.0);
                return run.outcome(&precond, x, s_norm, iter + 1, true, None);
            }

            precond.apply(&a, &s, &mut s_hat);
            a.matvec(&s_hat, &mut t);
            let tt = dot(&t, &t);
            if tt == 0.0 || !tt.is_finite() {
                let failure = SolveFailure::Breakdown {
                    iteration: iter,
                    quantity: "t·t",
                };
                return run.outcome(&precond, x, s_norm, iter + 1, false, Some(failure));
            }
            omega = dot(&t, &s) / tt;

            axpy(alpha, &p_hat, &mut x);
            axpy(omega, &s_hat, &mut x);
            for i in 0..n {
                r[i] = s[i] - omega * t[i];
            }
            residual = l2_norm(&r);
            run.report(iter, residual, alpha, omega);

            if !residual.is_finite() {
                let failure = SolveFailure::NonFinite { iteration: iter };
                return run.outcome(&precond, x, residual, iter + 1, false, Some(failure));
            }
            if meets(residual, options.tolerance) {
                return run.outcome(&precond, x, residual, iter + 1, true, None);
            }
            if omega == 0.0 {
                let failure = SolveFailure::Stagnation { iteration: iter };
                return run.outcome(&precond, x, residual, iter + 1, false, Some(failure));
            }
            rho_old = rho;
        }

        run.outcome(&precond, x, residual, options.max_iters, false, None)
    }
}

enum ReporterSlot<'a> {
    External(&'a mut dyn Reporter),
    Local(StdoutReporter),
    None,
}

impl<'a> ReporterSlot<'a> {
    fn new(reporter: Option<&'a mut dyn Reporter>, verbose: bool) -> Self {
        match reporter {
            Some(r) => Self::External(r),
            None if verbose => Self::Local(StdoutReporter::new()),
            None => Self::None,
        }
    }

    fn as_mut(&mut self) -> Option<&mut dyn Reporter> {
        match self {
            Self::External(r) => Some(*r),
            Self::Local(r) => Some(r),
            Self::None => None,
        }
    }
}

/// Bookkeeping shared by one iterative solve: reporting, timing, result assembly.
struct Run<'a> {
    kind: SolverKind,
    reporter: ReporterSlot<'a>,
    start_time: Option<Instant>,
}

impl<'a> Run<'a> {
    fn new(
        kind: SolverKind,
        options: IterationOptions,
        reporter: Option<&'a mut dyn Reporter>,
    ) -> Self {
        Self {
            kind,
            reporter: ReporterSlot::new(reporter, options.verbose),
            start_time: options.verbose.then(Instant::now),
        }
    }

    fn report(&mut self, iteration: usize, residual: f64, alpha: f64, beta: f64) {
        if let Some(reporter) = self.reporter.as_mut() {
            reporter.on_iteration(&IterationReport {
                solver: self.kind,
                iteration,
                residual,
                alpha,
                beta,
            });
        }
    }

    fn outcome(
        &mut self,
        precond: &impl Preconditioner,
        mut x: Vec<f64>,
        residual: f64,
        iterations: usize,
        converged: bool,
        error: Option<SolveFailure>,
    ) -> SolveResult {
        precond.recover(&mut x);
        self.finish(SolveResult {
            solution: x,
            converged,
            residual,
            iterations,
            solver: self.kind,
            error,
        })
    }

    fn finish(&mut self, result: SolveResult) -> SolveResult {
        if let Some(reporter) = self.reporter.as_mut() {
            reporter.on_finish();
        }
        if let Some(start) = self.start_time {
            let elapsed = format_duration(start.elapsed());
            emit_line(&format!("time: {elapsed}"));
        }
        result
    }
}

fn meets(residual: f64, tolerance: f64) -> bool {
    residual < tolerance || residual == 0.0
}

fn meets_squared(rr: f64, tol_sq: f64) -> bool {
    rr < tol_sq || rr == 0.0
}

fn guard(denom: f64) -> f64 {
    if denom == 0.0 {
        BREAKDOWN_GUARD
    } else {
        denom
    }
}

fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    for (y, x) in y.iter_mut().zip(x) {
        *y += alpha * x;
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 1.0 {
        format!("{:.3} s", secs)
    } else if secs >= 1e-3 {
        format!("{:.3} ms", secs * 1e3)
    } else if secs >= 1e-6 {
        format!("{:.3} us", secs * 1e6)
    } else {
        format!("{:.0} ns", secs * 1e9)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precond::Identity;

    fn spd() -> (SparseMatrix, Vec<f64>) {
        let a = SparseMatrix::from_triplets(
            2,
            2,
            &[(0, 0, 4.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)],
        );
        (a, vec![1.0, 2.0])
    }

    #[test]
    fn cg_solves_two_by_two_in_two_steps() {
        let (a, b) = spd();
        let options = IterationOptions {
            tolerance: 1e-12,
            ..IterationOptions::default()
        };
        let result = ConjugateGradient::new(a, b, Identity, options).unwrap().solve(None);
        assert!(result.converged);
        assert!(result.iterations <= 2);
        assert!((result.solution[0] - 1.0 / 11.0).abs() < 1e-10);
        assert!((result.solution[1] - 7.0 / 11.0).abs() < 1e-10);
    }

    #[test]
    fn zero_rhs_converges_without_iterating() {
        let (a, _) = spd();
        let result = BiCgStab::new(a, vec![0.0; 2], Identity, IterationOptions::default())
            .unwrap()
            .solve(None);
        assert!(result.converged);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.solution, vec![0.0, 0.0]);
    }

    #[test]
    fn direct_reports_singular_matrix() {
        let a = SparseMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (1, 0, 1.0)]);
        let result = DirectSolver::new(a, vec![1.0, 1.0]).unwrap().solve(None);
        assert!(!result.converged);
        assert!(matches!(result.error, Some(SolveFailure::Singular(_))));
        assert_eq!(result.solution, vec![0.0, 0.0]);
    }

    #[test]
    fn rejects_mismatched_rhs() {
        let (a, _) = spd();
        let err = DirectSolver::new(a, vec![1.0]).err().unwrap();
        assert_eq!(err, ShapeError::RhsLength { expected: 2, actual: 1 });
    }
}
