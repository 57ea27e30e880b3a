//! Remote dispatch scenarios: proxy transparency, handle lifetimes and
//! collective reductions, with workers running on their own threads.

use std::thread;

use cpl_core::{NormKind, Real};
use cpl_coupling::{
    Binding, CouplerCore, Exchanger, FixedPointConfig, FixedPointCoupler,
};
use cpl_remote::{
    channel_pair, Command, ExchangerProxy, MasterDataProxy, MasterSolverProxy, RemoteError,
    RemoteProcess, Reply, Transport, Worker,
};
use cpl_solver::{AffineToy, Solver, SolverResult, TimeStepRequest};
use cpl_state::{DenseField, SharedState};

fn init_logs() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// The cross-wired affine scenario with a pluggable first child.
fn affine_core(child0: Box<dyn Solver<DenseField>>) -> CouplerCore<DenseField> {
    let children: Vec<Box<dyn Solver<DenseField>>> =
        vec![child0, Box::new(AffineToy::new(3.0, -1.0))];

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

fn run_fixed_point(core: CouplerCore<DenseField>) -> (Real, Real) {
    let cfg = FixedPointConfig {
        tol: 1e-5,
        damping: 0.5,
        ..Default::default()
    };
    let mut coupler = FixedPointCoupler::with_config(core, cfg).unwrap();
    coupler.init().unwrap();
    coupler.init_time_step(1.0).unwrap();
    assert!(coupler.solve().unwrap());
    coupler.validate_time_step().unwrap();
    let state = &coupler.core().states()[0];
    let result = (
        state.get_value("y1").unwrap(),
        state.get_value("y2").unwrap(),
    );
    coupler.terminate().unwrap();
    result
}

#[test]
fn remote_child_is_transparent_to_the_coupler() {
    init_logs();
    let local = run_fixed_point(affine_core(Box::new(AffineToy::new(1.0, 0.5))));

    let (transport, endpoint) = channel_pair::<DenseField>();
    let worker = thread::spawn(move || {
        Worker::new(Box::new(AffineToy::new(1.0, 0.5)), vec![]).run(endpoint)
    });

    let process = RemoteProcess::point_to_point(transport);
    let proxy = MasterSolverProxy::new(process);
    let remote = run_fixed_point(affine_core(Box::new(proxy)));

    worker.join().unwrap().unwrap();

    // Same arithmetic runs on both sides, so the results match exactly.
    assert_eq!(local, remote);
    assert!((remote.0 - 5.0 / 3.0).abs() < 1e-4);
    assert!((remote.1 - 4.0 / 3.0).abs() < 1e-4);
}

fn sample_state() -> SharedState<DenseField> {
    let mut s = SharedState::new();
    s.set_value("p", 2.0);
    s.set_field("u", DenseField::from_vec(vec![1.0, -2.0, 3.0]));
    s
}

#[test]
fn data_proxies_batch_handle_releases() {
    let (transport, endpoint) = channel_pair::<DenseField>();
    let worker = thread::spawn(move || {
        Worker::new(Box::new(AffineToy::new(0.0, 1.0)), vec![]).run(endpoint)
    });

    let process = RemoteProcess::point_to_point(transport);
    {
        let a = MasterDataProxy::create(&process, sample_state()).unwrap();
        assert_eq!(a.handle(), 0);
        let b = a.clone_remote().unwrap();
        assert_eq!(b.handle(), 1);
        drop(b);

        // The queued release is flushed before this command, so the freed
        // handle is recycled for the new clone.
        let c = a.clone_remote().unwrap();
        assert_eq!(c.handle(), 1);

        // Remote arithmetic against the locally computed expectation.
        c.scale(2.0).unwrap();
        let fetched = c.fetch().unwrap();
        let expected = sample_state().mul(2.0);
        assert_eq!(fetched.get_value("p").unwrap(), expected.get_value("p").unwrap());
        assert_eq!(
            c.dot(&a).unwrap(),
            expected.dot(&sample_state()).unwrap()
        );
        assert_eq!(c.norm(NormKind::Max).unwrap(), expected.norm_max());
        assert_eq!(c.norm(NormKind::Two).unwrap(), expected.norm2());
    }

    // Shut the worker down through the solver surface.
    let mut proxy = MasterSolverProxy::new(process);
    proxy.init().unwrap();
    proxy.terminate().unwrap();
    worker.join().unwrap().unwrap();
}

/// A component whose solve always reports numerical failure.
struct FailingToy;

impl Solver<DenseField> for FailingToy {
    fn init(&mut self) -> SolverResult<()> {
        Ok(())
    }

    fn terminate(&mut self) -> SolverResult<()> {
        Ok(())
    }

    fn present_time(&self) -> Real {
        0.0
    }

    fn compute_time_step(&mut self) -> SolverResult<TimeStepRequest> {
        Ok(TimeStepRequest {
            dt: 0.25,
            stop: false,
        })
    }

    fn init_time_step(&mut self, _dt: Real) -> SolverResult<()> {
        Ok(())
    }

    fn solve(&mut self) -> SolverResult<bool> {
        Ok(false)
    }

    fn validate_time_step(&mut self) -> SolverResult<()> {
        Ok(())
    }

    fn abort_time_step(&mut self) -> SolverResult<()> {
        Ok(())
    }

    fn set_stationary_mode(&mut self, _stationary: bool) -> SolverResult<()> {
        Ok(())
    }
}

#[test]
fn group_reduces_statuses_and_time_steps() {
    let (t0, e0) = channel_pair::<DenseField>();
    let (t1, e1) = channel_pair::<DenseField>();
    let w0 =
        thread::spawn(move || Worker::new(Box::new(AffineToy::new(1.0, 0.5)), vec![]).run(e0));
    let w1 = thread::spawn(move || Worker::new(Box::new(FailingToy), vec![]).run(e1));

    let members: Vec<Box<dyn Transport<DenseField>>> = vec![Box::new(t0), Box::new(t1)];
    let process = RemoteProcess::group(members, 2).unwrap();
    let mut proxy = MasterSolverProxy::new(process.clone());

    proxy.init().unwrap();
    // One rank asks for a smaller step; the group takes the minimum.
    let req = proxy.compute_time_step().unwrap();
    assert_eq!(req.dt, 0.25);

    proxy.init_time_step(0.25).unwrap();
    // One rank failing makes the whole group fail.
    assert!(!proxy.solve().unwrap());
    proxy.abort_time_step().unwrap();

    // Dot products sum the per-rank contributions.
    let a = MasterDataProxy::create(&process, sample_state()).unwrap();
    let local = sample_state().dot(&sample_state()).unwrap();
    assert_eq!(a.dot(&a).unwrap(), 2.0 * local);
    assert_eq!(a.fetch_parts().unwrap().len(), 2);
    drop(a);

    proxy.terminate().unwrap();
    w0.join().unwrap().unwrap();
    w1.join().unwrap().unwrap();
}

#[test]
fn exchanges_run_remotely_by_index() {
    // The worker holds the exchangers; the master only refers to them by
    // index and passes the handles of the states involved.
    let distribute = Exchanger::direct(
        vec![],
        vec![(Binding::state(0, "x"), Binding::child(0, "x"))],
    );
    let collect = Exchanger::direct(
        vec![],
        vec![(Binding::child(0, "y"), Binding::state(0, "y"))],
    );
    let (transport, endpoint) = channel_pair::<DenseField>();
    let worker = thread::spawn(move || {
        Worker::new(Box::new(AffineToy::new(1.0, 2.0)), vec![distribute, collect]).run(endpoint)
    });

    let process = RemoteProcess::point_to_point(transport);
    let mut solver = MasterSolverProxy::new(process.clone());
    solver.init().unwrap();
    solver.init_time_step(1.0).unwrap();

    let mut shared = SharedState::new();
    shared.set_value("x", 4.0);
    shared.declare_value("y");
    let data = MasterDataProxy::create(&process, shared).unwrap();

    ExchangerProxy::new(process.clone(), 0).run(&[&data]).unwrap();
    assert!(solver.solve().unwrap());
    ExchangerProxy::new(process.clone(), 1).run(&[&data]).unwrap();
    // y = 1 + 2·4 made it back into the remote state.
    assert_eq!(data.get_value("y").unwrap(), 9.0);

    solver.validate_time_step().unwrap();
    drop(data);
    solver.terminate().unwrap();
    worker.join().unwrap().unwrap();
}

#[test]
fn master_runs_its_local_copy_of_an_exchange() {
    let collect = Exchanger::direct(
        vec![],
        vec![(Binding::child(0, "y"), Binding::state(0, "y"))],
    );
    let (transport, endpoint) = channel_pair::<DenseField>();
    let worker = thread::spawn(move || {
        Worker::new(Box::new(AffineToy::new(1.0, 2.0)), vec![collect]).run(endpoint)
    });

    let process = RemoteProcess::point_to_point(transport);
    let mut solver = MasterSolverProxy::new(process.clone());
    solver.init().unwrap();
    solver.init_time_step(1.0).unwrap();
    solver.set_input_value("x", 3.0).unwrap();
    assert!(solver.solve().unwrap());

    let mut remote_state = SharedState::new();
    remote_state.declare_value("y");
    let data = MasterDataProxy::create(&process, remote_state).unwrap();

    // The master participates with its own copy of the exchange, wired to
    // its local tables.
    let local = Exchanger::direct(
        vec![],
        vec![(Binding::state(0, "src"), Binding::state(1, "dst"))],
    );
    let ex = ExchangerProxy::with_local(process.clone(), 0, local);

    let mut src = SharedState::new();
    src.set_value("src", 7.5);
    let mut dst = SharedState::new();
    dst.declare_value("dst");
    let mut local_states = vec![src, dst];
    let mut local_children: Vec<Box<dyn Solver<DenseField>>> = Vec::new();

    ex.run_with_master(&[&data], &mut local_children, &mut local_states)
        .unwrap();

    // Both sides of the exchange ran: the worker's copy filled the remote
    // state, the master's copy filled the local one.
    assert_eq!(data.get_value("y").unwrap(), 7.0);
    assert_eq!(local_states[1].get_value("dst").unwrap(), 7.5);

    solver.validate_time_step().unwrap();
    drop(data);
    solver.terminate().unwrap();
    worker.join().unwrap().unwrap();
}

#[test]
fn group_size_is_checked_eagerly() {
    let (t0, _e0) = channel_pair::<DenseField>();
    let members: Vec<Box<dyn Transport<DenseField>>> = vec![Box::new(t0)];
    let err = RemoteProcess::group(members, 2).unwrap_err();
    assert!(matches!(
        err,
        RemoteError::GroupSize {
            expected: 2,
            got: 1
        }
    ));
}

#[test]
fn commands_survive_a_serde_round_trip() {
    let cmd = Command::SetInputField {
        name: "x".to_string(),
        field: DenseField::from_vec(vec![1.0, 2.5, -3.0]),
    };
    let text = serde_json::to_string(&cmd).unwrap();
    let back: Command<DenseField> = serde_json::from_str(&text).unwrap();
    assert_eq!(back.tag(), cmd.tag());
    match back {
        Command::SetInputField { name, field } => {
            assert_eq!(name, "x");
            assert_eq!(field.as_slice(), &[1.0, 2.5, -3.0]);
        }
        other => panic!("wrong command decoded: tag {}", other.tag()),
    }

    let reply = Reply::State(sample_state());
    let text = serde_json::to_string(&reply).unwrap();
    let back: Reply<DenseField> = serde_json::from_str(&text).unwrap();
    match back {
        Reply::State(s) => {
            assert_eq!(s.get_value("p").unwrap(), 2.0);
            assert_eq!(s.get_field("u").unwrap().as_slice(), &[1.0, -2.0, 3.0]);
        }
        other => panic!("wrong reply decoded: {}", other.describe()),
    }
}
