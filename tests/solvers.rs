use soapfilm::{
    cotangent_laplacian, AnyPreconditioner, BiCgStab, ConjugateGradient, DirectFactorization,
    DirectSolver, Error, FixedVertices, Identity, IterationOptions, IterationReport,
    PreconditionerKind, Reporter, SolveFailure, SolverConfig, SolverKind, SolverManager,
    SparseMatrix, SystemSolver, TriMesh,
};

fn tridiagonal(n: usize, diag: f64) -> SparseMatrix {
    tridiagonal_with(&vec![diag; n])
}

/// Symmetric tridiagonal matrix with `-1` off the diagonal.
fn tridiagonal_with(diag: &[f64]) -> SparseMatrix {
    let n = diag.len();
    let mut triplets = Vec::new();
    for (i, &d) in diag.iter().enumerate() {
        triplets.push((i, i, d));
        if i + 1 < n {
            triplets.push((i, i + 1, -1.0));
            triplets.push((i + 1, i, -1.0));
        }
    }
    SparseMatrix::from_triplets(n, n, &triplets)
}

/// Tetrahedron with one face split at a raised centroid, vertices 0 and 4 fixed.
fn tetra_free_block() -> SparseMatrix {
    let mesh = TriMesh::new(
        vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.45, 0.45, 0.45],
        ],
        vec![
            [0, 2, 1],
            [0, 1, 3],
            [0, 3, 2],
            [1, 2, 4],
            [2, 3, 4],
            [3, 1, 4],
        ],
    )
    .unwrap();
    let l = cotangent_laplacian(&mesh);
    let fixed = FixedVertices::from_indices(5, &[0, 4]).unwrap();
    let free = fixed.free_mask();
    l.mask(&free, &free).unwrap().scale(-1.0)
}

fn config(solver: SolverKind, preconditioner: PreconditionerKind) -> SolverConfig {
    SolverConfig::builder()
        .solver(solver)
        .preconditioner(preconditioner)
        .max_iters(500)
        .tolerance(1e-12)
        .build()
        .unwrap()
}

fn assert_close(a: &[f64], b: &[f64], tol: f64) {
    assert_eq!(a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        assert!((x - y).abs() <= tol, "entry {i}: {x} vs {y}");
    }
}

#[test]
fn cg_agrees_with_direct_on_tetrahedron_laplacian() {
    let a = tetra_free_block();
    assert_eq!(a.shape(), (3, 3));
    assert!(a.is_symmetric(1e-12));
    let b = vec![1.0, -2.0, 0.5];

    let direct = DirectSolver::new(a.clone(), b.clone()).unwrap().solve(None);
    assert!(direct.is_success());
    assert!(direct.residual < 1e-10);

    let options = IterationOptions {
        max_iters: 50,
        tolerance: 1e-12,
        verbose: false,
    };
    let cg = ConjugateGradient::new(a, b, Identity, options)
        .unwrap()
        .solve(None);
    assert!(cg.converged, "cg residual {}", cg.residual);
    assert!(cg.iterations <= 4);
    assert_close(&cg.solution, &direct.solution, 1e-8);
}

#[test]
fn every_pairing_agrees_with_direct() {
    // uneven diagonal so the diagonal-based preconditioners are not multiples of I
    let a = tridiagonal_with(&[3.0, 12.0, 102.0, 5.0, 52.0, 9.0, 40.0, 4.0]);
    assert!(a.is_symmetric(1e-12));
    let b: Vec<f64> = (0..8).map(|i| (i as f64 * 0.7).sin()).collect();
    let manager = SolverManager::new();
    let expected = manager
        .solve(&a, &b, &config(SolverKind::Direct, PreconditionerKind::None))
        .unwrap();
    assert!(expected.converged);

    let preconditioners = [
        PreconditionerKind::None,
        PreconditionerKind::Jacobi,
        PreconditionerKind::BlockJacobi,
        PreconditionerKind::LeftScaling,
        PreconditionerKind::SymmetricScaling,
        PreconditionerKind::ApproximateInverse,
        PreconditionerKind::Iterative,
    ];
    let solvers = [
        SolverKind::ConjugateGradient,
        SolverKind::BiConjugateGradient,
        SolverKind::BiCgStab,
    ];
    for solver in solvers {
        for preconditioner in preconditioners {
            let result = manager
                .solve(&a, &b, &config(solver, preconditioner))
                .unwrap();
            assert!(
                result.converged && result.error.is_none(),
                "{solver} + {preconditioner}: {:?}",
                result.error
            );
            assert_eq!(result.solver, solver);
            assert_close(&result.solution, &expected.solution, 1e-8);
        }
    }
}

#[test]
fn bicgstab_solves_nonsymmetric_system() {
    let a = SparseMatrix::from_triplets(
        4,
        4,
        &[
            (0, 0, 5.0),
            (0, 1, 1.0),
            (1, 1, 4.0),
            (1, 2, 2.0),
            (2, 0, -1.0),
            (2, 2, 6.0),
            (3, 1, 1.5),
            (3, 3, 3.0),
        ],
    );
    let b = vec![1.0, 2.0, 3.0, 4.0];
    let direct = DirectFactorization::new(&a).unwrap().solve(&b).unwrap();
    let options = IterationOptions {
        tolerance: 1e-12,
        ..IterationOptions::default()
    };
    for precond in [
        AnyPreconditioner::from_kind(PreconditionerKind::None, 3),
        AnyPreconditioner::from_kind(PreconditionerKind::Jacobi, 3),
        AnyPreconditioner::from_kind(PreconditionerKind::BlockJacobi, 2),
    ] {
        let kind = precond.kind();
        let result = BiCgStab::new(a.clone(), b.clone(), precond, options)
            .unwrap()
            .solve(None);
        assert!(result.converged, "{kind}: residual {}", result.residual);
        assert_close(&result.solution, &direct, 1e-9);
    }
}

#[test]
fn iteration_cap_reports_non_convergence() {
    let a = tridiagonal(20, 2.0);
    let b = vec![1.0; 20];
    let config = SolverConfig::builder()
        .solver(SolverKind::ConjugateGradient)
        .preconditioner(PreconditionerKind::None)
        .max_iters(1)
        .tolerance(1e-10)
        .build()
        .unwrap();
    let result = SolverManager::new().solve(&a, &b, &config).unwrap();
    assert!(!result.converged);
    assert!(result.error.is_none());
    assert_eq!(result.iterations, 1);
    assert!(result.residual > 1e-10);
    assert!(result.solution.iter().all(|x| x.is_finite()));
    // one CG step from zero is alpha * b
    let first = result.solution[0];
    assert!(first > 0.0);
    assert!(result.solution.iter().all(|x| (x - first).abs() < 1e-12));
}

#[test]
fn auto_routes_spd_to_cg_and_asymmetric_to_bicgstab() {
    let spd = SparseMatrix::from_triplets(
        4,
        4,
        &[
            (0, 0, 4.0),
            (0, 1, 1.0),
            (1, 0, 1.0),
            (1, 1, 3.0),
            (1, 2, 1.0),
            (2, 1, 1.0),
            (2, 2, 2.0),
            (2, 3, 0.5),
            (3, 2, 0.5),
            (3, 3, 1.0),
        ],
    );
    let asymmetric = SparseMatrix::from_triplets(
        4,
        4,
        &[
            (0, 0, 4.0),
            (0, 1, 1.0),
            (1, 1, 3.0),
            (1, 2, 1.0),
            (2, 1, 2.0),
            (2, 2, 2.0),
            (3, 0, 1.0),
            (3, 3, 1.0),
        ],
    );
    let manager = SolverManager::new();
    let auto = SolverConfig::default();

    let plan = manager.plan(&spd, &auto).unwrap();
    assert_eq!(plan.solver, SolverKind::ConjugateGradient);
    assert_eq!(plan.fallback, Some(SolverKind::BiCgStab));
    let result = manager.solve(&spd, &[1.0; 4], &auto).unwrap();
    assert_eq!(result.solver, SolverKind::ConjugateGradient);
    assert!(result.converged);

    let plan = manager.plan(&asymmetric, &auto).unwrap();
    assert_eq!(plan.solver, SolverKind::BiCgStab);
    assert_eq!(plan.fallback, None);
    let result = manager.solve(&asymmetric, &[1.0; 4], &auto).unwrap();
    assert_eq!(result.solver, SolverKind::BiCgStab);
    assert!(result.converged);
}

#[test]
fn symmetric_indefinite_matrix_is_not_routed_to_cg() {
    let a = SparseMatrix::from_triplets(
        3,
        3,
        &[(0, 0, 1.0), (0, 1, 2.0), (1, 0, 2.0), (1, 1, 1.0), (2, 2, 1.0)],
    );
    let plan = SolverManager::new()
        .plan(&a, &SolverConfig::default())
        .unwrap();
    assert_eq!(plan.solver, SolverKind::BiCgStab);
}

#[test]
fn zero_rhs_converges_immediately() {
    let a = tridiagonal(5, 3.0);
    for solver in [
        SolverKind::ConjugateGradient,
        SolverKind::BiConjugateGradient,
        SolverKind::BiCgStab,
    ] {
        let result = SolverManager::new()
            .solve(&a, &[0.0; 5], &config(solver, PreconditionerKind::Jacobi))
            .unwrap();
        assert!(result.converged);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.solution, vec![0.0; 5]);
    }
}

#[test]
fn numerical_failures_are_captured() {
    let zero_diag = SparseMatrix::from_triplets(
        2,
        2,
        &[(0, 1, 1.0), (1, 0, 1.0), (1, 1, 1.0)],
    );
    let result = SolverManager::new()
        .solve(
            &zero_diag,
            &[1.0, 1.0],
            &config(SolverKind::BiCgStab, PreconditionerKind::Jacobi),
        )
        .unwrap();
    assert!(!result.converged);
    assert_eq!(result.error, Some(SolveFailure::ZeroDiagonal { row: 0 }));

    let singular = SparseMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (1, 0, 1.0)]);
    let result = SolverManager::new()
        .solve(
            &singular,
            &[1.0, 2.0],
            &config(SolverKind::Direct, PreconditionerKind::Auto),
        )
        .unwrap();
    assert!(!result.converged);
    assert!(matches!(result.error, Some(SolveFailure::Singular(_))));
    assert_eq!(result.solution, vec![0.0, 0.0]);
    assert!(result.residual.is_infinite());
}

#[test]
fn numerically_singular_direct_solve_is_captured() {
    // full pattern, so the factorization only fails on a zero pivot
    let a = SparseMatrix::from_triplets(
        3,
        3,
        &[
            (0, 0, 1.0),
            (0, 1, 2.0),
            (0, 2, 1.0),
            (1, 0, 2.0),
            (1, 1, 4.0),
            (1, 2, 2.0),
            (2, 0, 1.0),
            (2, 1, 2.0),
            (2, 2, 1.0),
        ],
    );
    let result = DirectSolver::new(a.clone(), vec![1.0, 2.0, 3.0])
        .unwrap()
        .solve(None);
    assert!(!result.converged);
    assert!(matches!(result.error, Some(SolveFailure::Singular(_))));
    assert_eq!(result.solution, vec![0.0; 3]);

    let results = SolverManager::new()
        .solve_many(
            &a,
            &[vec![1.0; 3], vec![0.0, 1.0, 0.0]],
            &config(SolverKind::Direct, PreconditionerKind::None),
        )
        .unwrap();
    assert!(results
        .iter()
        .all(|r| matches!(r.error, Some(SolveFailure::Singular(_)))));
}

#[test]
fn auto_with_zero_diagonal_solves_without_jacobi() {
    let a = SparseMatrix::from_triplets(2, 2, &[(0, 1, 1.0), (1, 0, 2.0), (1, 1, 1.0)]);
    let result = SolverManager::new()
        .solve(&a, &[1.0, 3.0], &SolverConfig::default())
        .unwrap();
    assert!(result.is_success(), "{:?}", result.error);
    assert_close(&result.solution, &[1.0, 1.0], 1e-8);
}

#[test]
fn structural_errors_are_raised() {
    let manager = SolverManager::new();
    let rect = SparseMatrix::zeros(2, 3);
    let err = manager
        .solve(&rect, &[0.0, 0.0], &SolverConfig::default())
        .unwrap_err();
    assert!(matches!(err, Error::Shape(_)));

    let err = manager
        .solve(&tridiagonal(3, 2.0), &[1.0], &SolverConfig::default())
        .unwrap_err();
    assert!(matches!(err, Error::Shape(_)));

    let err = SolverConfig::from_names("Cholesky", "NONE").unwrap_err();
    assert_eq!(err.to_string(), "'Cholesky' is not a valid solver name");
}

struct Collect(Vec<IterationReport>, bool);

impl Reporter for Collect {
    fn on_iteration(&mut self, report: &IterationReport) {
        self.0.push(report.clone());
    }

    fn on_finish(&mut self) {
        self.1 = true;
    }
}

#[test]
fn reporter_sees_every_iteration() {
    let a = tridiagonal(10, 2.5);
    let b = vec![1.0; 10];
    let mut reporter = Collect(Vec::new(), false);
    let result = SolverManager::new()
        .solve_with_reporter(
            &a,
            &b,
            &config(SolverKind::BiCgStab, PreconditionerKind::None),
            Some(&mut reporter),
        )
        .unwrap();
    assert!(result.converged);
    assert!(reporter.1);
    assert_eq!(reporter.0.len(), result.iterations);
    assert!(reporter.0.iter().all(|r| r.solver == SolverKind::BiCgStab));
    let last = reporter.0.last().unwrap();
    assert!((last.residual - result.residual).abs() <= 1e-15);
}

#[test]
fn reporter_follows_the_fallback_solver() {
    let a = tridiagonal(20, 2.5);
    let config = SolverConfig::builder().max_iters(2).tolerance(1e-14).build().unwrap();
    let mut reporter = Collect(Vec::new(), false);
    let result = SolverManager::new()
        .solve_with_reporter(&a, &[1.0; 20], &config, Some(&mut reporter))
        .unwrap();
    assert!(!result.converged);
    assert_eq!(result.solver, SolverKind::BiCgStab);
    assert!(reporter.1);
    assert_eq!(reporter.0.first().map(|r| r.solver), Some(SolverKind::ConjugateGradient));
    assert_eq!(reporter.0.last().map(|r| r.solver), Some(SolverKind::BiCgStab));
    assert_eq!(reporter.0.len(), 4);
}

#[test]
fn verbose_solve_prints_without_a_reporter() {
    let config = SolverConfig::builder()
        .solver(SolverKind::ConjugateGradient)
        .verbose(true)
        .build()
        .unwrap();
    let result = SolverManager::new()
        .solve(&tridiagonal(6, 3.0), &[1.0; 6], &config)
        .unwrap();
    assert!(result.converged);
}

#[test]
fn factorization_is_reused_across_right_hand_sides() {
    let a = tridiagonal(6, 2.0);
    let factorization = DirectFactorization::new(&a).unwrap();
    for k in 0..3 {
        let b: Vec<f64> = (0..6).map(|i| (i + k) as f64).collect();
        let x = factorization.solve(&b).unwrap();
        assert_close(&a.mul_vec(&x), &b, 1e-10);
    }
}
