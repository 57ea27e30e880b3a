//! End-to-end engine scenarios on the toy solvers.

use cpl_coupling::{
    AndersonConfig, AndersonCoupler, Binding, CouplerCore, Exchanger, FixedPointConfig,
    FixedPointCoupler, JfnkConfig, JfnkCoupler, ResidualBalanceConfig, ResidualBalanceCoupler,
};
use cpl_core::Real;
use cpl_solver::{AffineToy, CheckpointMethod, MatrixToy, ResidualToy, Solver, SolverError};
use cpl_state::{DenseField, SharedState};
use nalgebra::DMatrix;

/// Two affine components cross-wired through one shared state:
/// `y1 = 1 + 0.5·x1`, `y2 = 3 − x2`, with `x1 = y2` and `x2 = y1`.
/// The joint fixed point is `y1 = 5/3`, `y2 = 4/3`.
fn affine_core() -> CouplerCore<DenseField> {
    let children: Vec<Box<dyn Solver<DenseField>>> = vec![
        Box::new(AffineToy::new(1.0, 0.5)),
        Box::new(AffineToy::new(3.0, -1.0)),
    ];

    let mut state = SharedState::new();
    state.set_value("y1", 0.0);
    state.set_value("y2", 0.0);

    let distribute = Exchanger::direct(
        vec![],
        vec![
            (Binding::state(0, "y2"), Binding::child(0, "x")),
            (Binding::state(0, "y1"), Binding::child(1, "x")),
        ],
    );
    let collect = Exchanger::direct(
        vec![],
        vec![
            (Binding::child(0, "y"), Binding::state(0, "y1")),
            (Binding::child(1, "y"), Binding::state(0, "y2")),
        ],
    );

    CouplerCore::new(
        children,
        vec![state],
        vec![distribute, collect],
        vec![0],
        vec![1],
    )
}

#[test]
fn fixed_point_converges_to_joint_solution() {
    let cfg = FixedPointConfig {
        tol: 1e-5,
        damping: 0.5,
        ..Default::default()
    };
    let mut coupler = FixedPointCoupler::with_config(affine_core(), cfg).unwrap();

    coupler.init().unwrap();
    coupler.init_time_step(1.0).unwrap();
    assert!(coupler.solve().unwrap());
    coupler.validate_time_step().unwrap();

    let state = &coupler.core().states()[0];
    assert!((state.get_value("y1").unwrap() - 5.0 / 3.0).abs() < 1e-4);
    assert!((state.get_value("y2").unwrap() - 4.0 / 3.0).abs() < 1e-4);
    assert_eq!(coupler.present_time(), 1.0);

    coupler.terminate().unwrap();
}

#[test]
fn exhausted_iteration_budget_reports_failure() {
    // The undamped map spirals in at rate √0.5 per iteration, far too slow
    // to reach 1e-5 within 20 iterations.
    let cfg = FixedPointConfig {
        tol: 1e-5,
        damping: 1.0,
        max_iter: 20,
        ..Default::default()
    };
    let mut coupler = FixedPointCoupler::with_config(affine_core(), cfg).unwrap();
    coupler.init().unwrap();
    coupler.init_time_step(1.0).unwrap();
    assert!(!coupler.solve().unwrap());
}

/// The power-iteration map shared by the accelerated-engine tests.
fn matrix_core(a: &DMatrix<Real>) -> CouplerCore<DenseField> {
    let n = a.nrows();
    let children: Vec<Box<dyn Solver<DenseField>>> = vec![Box::new(MatrixToy::new(a.clone()))];

    let mut state = SharedState::new();
    state.set_field("x", DenseField::from_vec(vec![1.0; n]));

    let distribute = Exchanger::direct(
        vec![(Binding::state(0, "x"), Binding::child(0, "x"))],
        vec![],
    );
    let collect = Exchanger::direct(
        vec![(Binding::child(0, "y"), Binding::state(0, "x"))],
        vec![],
    );

    CouplerCore::new(
        children,
        vec![state],
        vec![distribute, collect],
        vec![0],
        vec![1],
    )
}

fn test_matrix() -> DMatrix<Real> {
    DMatrix::from_row_slice(
        4,
        4,
        &[
            4.0, 1.0, 0.0, 0.0, //
            1.0, 3.0, 1.0, 0.0, //
            0.0, 1.0, 2.0, 1.0, //
            0.0, 0.0, 1.0, 1.0,
        ],
    )
}

fn rayleigh(a: &DMatrix<Real>, x: &DenseField) -> Real {
    let v = x.as_vector();
    v.dot(&(a * v)) / v.dot(v)
}

fn run_one_step(coupler: &mut dyn Solver<DenseField>) {
    coupler.init().unwrap();
    coupler.init_time_step(1.0).unwrap();
    assert!(coupler.solve().unwrap());
    coupler.validate_time_step().unwrap();
}

fn converged_x(core: &CouplerCore<DenseField>) -> DenseField {
    core.states()[0].get_field("x").unwrap().clone()
}

#[test]
fn accelerated_engines_agree_on_dominant_eigenvalue() {
    let a = test_matrix();

    let fp_cfg = FixedPointConfig {
        tol: 1e-8,
        max_iter: 500,
        ..Default::default()
    };
    let mut fp = FixedPointCoupler::with_config(matrix_core(&a), fp_cfg).unwrap();
    run_one_step(&mut fp);
    let reference = rayleigh(&a, &converged_x(fp.core()));

    let aa_cfg = AndersonConfig {
        tol: 1e-8,
        max_iter: 200,
        ..Default::default()
    };
    let mut aa = AndersonCoupler::with_config(matrix_core(&a), aa_cfg).unwrap();
    run_one_step(&mut aa);
    let anderson = rayleigh(&a, &converged_x(aa.core()));

    let jfnk_cfg = JfnkConfig {
        newton_max_iter: 30,
        ..Default::default()
    };
    let mut nk = JfnkCoupler::with_config(matrix_core(&a), jfnk_cfg).unwrap();
    run_one_step(&mut nk);
    let newton = rayleigh(&a, &converged_x(nk.core()));

    assert!((anderson - reference).abs() < 1e-3, "{anderson} vs {reference}");
    assert!((newton - reference).abs() < 1e-3, "{newton} vs {reference}");
}

#[test]
fn residual_balance_drives_both_children_to_target() {
    let children: Vec<Box<dyn Solver<DenseField>>> = vec![
        Box::new(ResidualToy::new(2.0, 10.0, 0.5)),
        Box::new(ResidualToy::new(-1.0, 5.0, 0.8)),
    ];
    let core = CouplerCore::new(children, vec![], vec![], vec![], vec![]);
    let cfg = ResidualBalanceConfig {
        targets: [1e-6, 1e-5],
        ..Default::default()
    };
    let mut coupler = ResidualBalanceCoupler::with_config(core, cfg).unwrap();

    coupler.init().unwrap();
    coupler.init_time_step(1.0).unwrap();
    assert!(coupler.solve().unwrap());

    let r0 = coupler.core().children()[0].get_output_value("residual").unwrap();
    let r1 = coupler.core().children()[1].get_output_value("residual").unwrap();
    assert!(r0 <= 1e-6);
    assert!(r1 <= 1e-5);
    let u0 = coupler.core().children()[0].get_output_value("u").unwrap();
    assert!((u0 - 2.0).abs() <= 1e-6);
}

#[test]
fn residual_balance_rejects_wrong_child_count() {
    let children: Vec<Box<dyn Solver<DenseField>>> =
        vec![Box::new(ResidualToy::new(0.0, 1.0, 0.5))];
    let core = CouplerCore::new(children, vec![], vec![], vec![], vec![]);
    assert!(ResidualBalanceCoupler::with_config(core, ResidualBalanceConfig::default()).is_err());
}

#[test]
fn solve_outside_open_step_is_rejected() {
    let mut coupler =
        FixedPointCoupler::with_config(affine_core(), FixedPointConfig::default()).unwrap();
    coupler.init().unwrap();
    let err = coupler.solve().unwrap_err();
    assert!(matches!(err, SolverError::WrongContext { method: "solve", .. }));
}

#[test]
fn checkpoint_restores_states_and_time() {
    let cfg = FixedPointConfig {
        tol: 1e-5,
        damping: 0.5,
        ..Default::default()
    };
    let mut coupler = FixedPointCoupler::with_config(affine_core(), cfg).unwrap();
    coupler.init().unwrap();
    coupler.save("start", CheckpointMethod::Memory).unwrap();

    coupler.init_time_step(1.0).unwrap();
    assert!(coupler.solve().unwrap());
    coupler.validate_time_step().unwrap();
    assert_eq!(coupler.present_time(), 1.0);

    coupler.restore("start", CheckpointMethod::Memory).unwrap();
    assert_eq!(coupler.present_time(), 0.0);
    assert_eq!(coupler.core().states()[0].get_value("y1").unwrap(), 0.0);
    coupler.forget("start", CheckpointMethod::Memory).unwrap();
}

#[test]
fn coupler_can_be_a_child_of_another_coupler() {
    let inner_cfg = FixedPointConfig {
        tol: 1e-5,
        damping: 0.5,
        ..Default::default()
    };
    let inner = FixedPointCoupler::with_config(affine_core(), inner_cfg).unwrap();

    let children: Vec<Box<dyn Solver<DenseField>>> = vec![Box::new(inner)];
    let core = CouplerCore::new(children, vec![], vec![], vec![], vec![]);
    let mut outer = FixedPointCoupler::with_config(core, FixedPointConfig::default()).unwrap();

    outer.init().unwrap();
    outer.init_time_step(1.0).unwrap();
    assert!(outer.solve().unwrap());
    outer.validate_time_step().unwrap();
    assert_eq!(outer.present_time(), 1.0);
    outer.terminate().unwrap();
}
