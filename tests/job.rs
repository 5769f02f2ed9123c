use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use soapfilm::{
    Flation, JobState, MinimalSurface, SolveFailure, SolveJob, SolverConfig, SolverKind,
    SolverManager, TriMesh,
};

fn fan() -> TriMesh {
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
fn minimal_surface_runs_in_the_background() {
    let mut job = MinimalSurface::with_boundary_fixed(fan())
        .spawn(SolverManager::new(), SolverConfig::default())
        .unwrap();
    assert_eq!(job.name(), "minimal-surface");
    let solution = loop {
        match job.state() {
            JobState::Running => thread::sleep(Duration::from_millis(1)),
            JobState::Finished => break job.try_take().unwrap(),
            JobState::Lost => panic!("worker lost"),
        }
    }
    .unwrap();
    assert!(solution.converged());
    assert!(solution.positions[4][2].abs() < 1e-6);
}

#[test]
fn flation_job_can_be_waited_on() {
    let job = Flation::new(fan(), vec![0, 1, 2, 3])
        .target_offset(0.25)
        .spawn(SolverManager::new(), SolverConfig::default())
        .unwrap();
    let solution = job.wait().unwrap().unwrap();
    assert!(solution.converged());
    assert!(solution.displacement[4][2] > 0.0);
}

#[test]
fn input_errors_travel_through_the_job() {
    let job = MinimalSurface::new(fan(), vec![7])
        .spawn(SolverManager::new(), SolverConfig::default())
        .unwrap();
    assert!(job.wait().unwrap().is_err());
}

#[test]
fn singular_direct_solve_finishes_the_job() {
    // vertex 5 belongs to no triangle and is left free
    let mut positions = fan().positions().to_vec();
    positions.push([3.0, 3.0, 3.0]);
    let mesh = TriMesh::new(positions, fan().triangles().to_vec()).unwrap();
    let config = SolverConfig::builder()
        .solver(SolverKind::Direct)
        .build()
        .unwrap();
    let job = MinimalSurface::new(mesh.clone(), vec![0, 1, 2, 3])
        .spawn(SolverManager::new(), config)
        .unwrap();
    let solution = job.wait().expect("worker lost").unwrap();
    assert!(matches!(solution.error(), Some(SolveFailure::Singular(_))));
    assert_eq!(solution.positions, mesh.positions());
}

#[test]
fn dropping_the_handle_discards_the_result() {
    // The worker cannot be interrupted; it finishes and its send fails quietly.
    let (done_tx, done_rx) = mpsc::channel();
    let (go, gate) = mpsc::channel::<()>();
    let job = SolveJob::spawn("dropped", move || {
        gate.recv().ok();
        let solution = MinimalSurface::with_boundary_fixed(fan())
            .solve(&SolverManager::new(), &SolverConfig::default());
        done_tx.send(solution.is_ok()).ok();
        solution
    })
    .unwrap();
    drop(job);
    go.send(()).unwrap();
    assert_eq!(done_rx.recv_timeout(Duration::from_secs(10)), Ok(true));
}

#[test]
fn panicking_worker_is_reported_lost() {
    let mut job: SolveJob<()> = SolveJob::spawn("panics", || panic!("boom")).unwrap();
    let state = loop {
        match job.state() {
            JobState::Running => thread::sleep(Duration::from_millis(1)),
            state => break state,
        }
    };
    assert_eq!(state, JobState::Lost);
    assert!(job.wait().is_none());
}
