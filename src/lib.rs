pub mod checker;
pub mod config;
pub mod driver;
pub mod dut;
pub mod error;
pub mod executor;
pub mod fifo;
pub mod kernel;
pub mod matrix;
pub mod model;
pub mod monitor;
pub mod obj;
pub mod port;
pub mod prelude;
pub mod report;
pub mod scoreboard;
pub mod signal;
pub mod sim_if;
pub mod stimulus;
pub mod testbench;
pub mod trigger;
pub mod utils;
pub mod value;

use futures::future::{self, BoxFuture, Either};
use std::cell::RefCell;
use std::sync::Arc;
use std::time;

use config::TbConfig;
use dut::DeviceModel;
use error::{SimResult, TbError};
use executor::{JoinHandle, Task};
use obj::TbObj;
use report::{RunSummary, TestRecord};
use signal::SimObject;
use sim_if::SIM_IF;
use trigger::Trigger;
use value::Val;

pub type TbResult = Result<Val, TbError>;
pub type TestFn = fn(SimObject, TbConfig) -> BoxFuture<'static, TbResult>;

/// A named test. Tests of one run share a simulation and execute one after another.
#[derive(Clone)]
pub struct Test {
    pub name: String,
    pub generator: TestFn,
}

impl Test {
    pub fn new(name: &str, generator: TestFn) -> Self {
        Self { name: name.to_string(), generator }
    }
}

/// Builds a `Vec<Test>` from async functions `fn(SimObject, TbConfig) -> TbResult`.
#[macro_export]
macro_rules! tests {
    ($( $i:ident ),+ $(,)?) => {
        vec![$($crate::Test::new(stringify!($i), |dut, cfg| {
            $crate::prelude::FutureExt::boxed($i(dut, cfg))
        })),+]
    };
}

thread_local! {
    static CURRENT_TEST: RefCell<Option<(Arc<Task>, TbObj<TestRecord>)>> = RefCell::new(None);
}

pub fn pass_test(msg: &str) {
    // Passes test that has not already failed/passed
    finish_test(Ok(Val::String(msg.to_string())));
}

pub fn fail_test(err: TbError) {
    // Fails test that has not already failed/passed
    finish_test(Err(err));
}

fn finish_test(result: TbResult) {
    if let Some((task, record)) = CURRENT_TEST.with(|c| c.borrow_mut().take()) {
        match &result {
            Ok(_) => SIM_IF.log(&format!("TEST {} passed", task.name())),
            Err(e) => SIM_IF.log(&format!("TEST {} failed: {}", task.name(), e)),
        }
        record.with_mut(|r| r.finish(result));
        tear_down_test(task);
    }
}

fn tear_down_test(test: Arc<Task>) {
    trigger::cancel_all_triggers();
    executor::clear_ready_queue();
    test.cancel();
}

/// Elaborates `D`, runs `tests` in order against it and returns the summary.
///
/// Every test gets a fresh set of device processes and a budget of
/// `cfg.max_cycles` clock periods of simulated time.
pub fn run_tests<D: DeviceModel>(cfg: TbConfig, tests: Vec<Test>) -> SimResult<RunSummary> {
    cfg.validate()?;
    kernel::reset();
    CURRENT_TEST.with(|c| *c.borrow_mut() = None);
    utils::seed(cfg.seed);
    let device = Arc::new(D::elaborate(&cfg));
    let sim_start = time::Instant::now();
    let records: Vec<TbObj<TestRecord>> = tests.iter().map(|t| TbObj::new(TestRecord::new(&t.name))).collect();

    // All tests are scheduled in a chain at simulation start up by awaiting the previous test completion.
    let mut join_handle: Option<JoinHandle> = None;
    for (test, record) in tests.into_iter().zip(records.iter().cloned()) {
        let previous = join_handle.take();
        let device = device.clone();
        join_handle = Some(Task::spawn_from_future(
            async move {
                // await previous test, if there is one
                if let Some(handle) = previous {
                    let _ = handle.await;
                }
                device.start();
                let root = device.scope();
                let budget = cfg.max_cycles.saturating_mul(cfg.clock_period_ns);
                let rec = record.clone();
                let generator = test.generator;
                let test_handle = Task::spawn_from_future(
                    async move {
                        rec.with_mut(|r| r.start());
                        let run = (generator)(root, cfg);
                        match future::select(run, Trigger::timer(budget, "ns")).await {
                            Either::Left((Ok(val), _)) => pass_test(&format!("{:?}", val)),
                            Either::Left((Err(e), _)) => fail_test(e),
                            Either::Right(_) => fail_test(TbError::Timeout { cycles: cfg.max_cycles }),
                        }
                        Ok(Val::None)
                    },
                    &test.name,
                );
                let test_task = test_handle.task().clone();
                CURRENT_TEST.with(|c| *c.borrow_mut() = Some((test_task, record)));
                // await test execution
                let _ = test_handle.await;
                Ok(Val::None)
            },
            "test chain",
        ));
    }
    Task::spawn_from_future(
        async move {
            if let Some(handle) = join_handle {
                let _ = handle.await;
            }
            kernel::finish();
            Ok(Val::None)
        },
        "end of tests",
    );

    let outcome = kernel::run(None);
    if let Err(e) = &outcome {
        // the kernel gave up mid-test, nothing after it ran
        fail_test(e.clone());
    }
    Ok(end_of_simulation(sim_start, records))
}

fn end_of_simulation(sim_start: time::Instant, records: Vec<TbObj<TestRecord>>) -> RunSummary {
    let tests = records
        .iter()
        .map(|r| {
            let mut record = r.get().clone();
            if record.result.is_none() {
                record.result = Some(Err(TbError::TestFailed("test did not run".to_string())));
            }
            record
        })
        .collect();
    let summary = RunSummary {
        tests,
        sim_time_ns: SIM_IF.get_sim_time("ns"),
        real_secs: sim_start.elapsed().as_secs_f64(),
        deltas: kernel::delta_count(),
    };
    summary.log();
    summary
}
