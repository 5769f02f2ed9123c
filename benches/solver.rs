use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;
use soapfilm::{
    Flation, MinimalSurface, PreconditionerKind, SolverConfig, SolverKind, SolverManager, TriMesh,
};

fn grid(k: usize) -> TriMesh {
    let mut positions = Vec::with_capacity(k * k);
    for j in 0..k {
        for i in 0..k {
            let (x, y) = (i as f64, j as f64);
            positions.push([x, y, 0.3 * (0.5 * x).sin() * (0.4 * y).cos()]);
        }
    }
    let mut triangles = Vec::with_capacity(2 * (k - 1) * (k - 1));
    for j in 0..k - 1 {
        for i in 0..k - 1 {
            let v00 = j * k + i;
            let v01 = v00 + k;
            triangles.push([v00, v00 + 1, v01 + 1]);
            triangles.push([v00, v01 + 1, v01]);
        }
    }
    TriMesh::new(positions, triangles).unwrap()
}

fn config(solver: SolverKind, preconditioner: PreconditionerKind) -> SolverConfig {
    SolverConfig::builder()
        .solver(solver)
        .preconditioner(preconditioner)
        .max_iters(2000)
        .tolerance(1e-8)
        .build()
        .unwrap()
}

fn bench_minimal_surface(c: &mut Criterion) {
    let manager = SolverManager::new();
    let problem = MinimalSurface::with_boundary_fixed(grid(24));
    let cases = [
        ("minimal_surface_direct", SolverKind::Direct, PreconditionerKind::None),
        ("minimal_surface_cg", SolverKind::ConjugateGradient, PreconditionerKind::None),
        ("minimal_surface_cg_jacobi", SolverKind::ConjugateGradient, PreconditionerKind::Jacobi),
        ("minimal_surface_bicg", SolverKind::BiConjugateGradient, PreconditionerKind::None),
        ("minimal_surface_bicgstab", SolverKind::BiCgStab, PreconditionerKind::None),
        ("minimal_surface_auto", SolverKind::Auto, PreconditionerKind::Auto),
    ];
    for (name, solver, preconditioner) in cases {
        let config = config(solver, preconditioner);
        c.bench_function(name, |b| {
            b.iter(|| {
                let solution = problem.solve(&manager, &config).unwrap();
                black_box(&solution.positions);
            });
        });
    }
}

fn bench_flation(c: &mut Criterion) {
    let manager = SolverManager::new();
    let mesh = grid(16);
    let fixed = mesh.boundary_vertices();
    let problem = Flation::new(mesh, fixed)
        .target_offset(0.5)
        .alpha_tangent(0.1);
    let cases = [
        ("flation_direct", SolverKind::Direct, PreconditionerKind::None),
        ("flation_cg_block_jacobi", SolverKind::ConjugateGradient, PreconditionerKind::BlockJacobi),
        ("flation_auto", SolverKind::Auto, PreconditionerKind::Auto),
    ];
    for (name, solver, preconditioner) in cases {
        let config = config(solver, preconditioner);
        c.bench_function(name, |b| {
            b.iter(|| {
                let solution = problem.solve(&manager, &config).unwrap();
                black_box(&solution.displacement);
            });
        });
    }
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .sample_size(10)
        .warm_up_time(Duration::from_millis(500))
        .measurement_time(Duration::from_millis(1000));
    targets =
        bench_minimal_surface,
        bench_flation
}
criterion_main!(benches);
