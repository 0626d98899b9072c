mod common;

use common::init_tracing;
use litb::dut::{DeviceModel, SystolicArray};
use litb::prelude::*;
use litb::scoreboard::MismatchPolicy;
use litb::stimulus::{OperandSource, Timing};
use litb::testbench::{multiply_test, MatmulTb, Scenario, ScenarioReport};

fn ensure(cond: bool, msg: &str) -> SimResult {
    match cond {
        true => Ok(()),
        false => Err(TbError::TestFailed(msg.to_string())),
    }
}

async fn bench(dut: SimObject, cfg: TbConfig) -> SimResult<MatmulTb> {
    let tb = MatmulTb::new(dut, cfg)?;
    tb.start_clock();
    tb.reset().await?;
    Ok(tb)
}

fn clean(report: &ScenarioReport, samples: usize) -> SimResult {
    report.check()?;
    ensure(report.collected == samples, &format!("collected {} of {}", report.collected, samples))
}

/// The behavioural array with bit 0 of result lane 0 stuck high.
struct StuckBit(SystolicArray);

impl DeviceModel for StuckBit {
    fn elaborate(cfg: &TbConfig) -> Self {
        Self(SystolicArray::elaborate(cfg))
    }

    fn scope(&self) -> SimObject {
        self.0.scope()
    }

    fn start(&self) {
        self.0.start();
        Task::spawn_from_future(stuck_high(self.0.scope().c("c_data_streaming[0]")), "stuck_bit");
    }
}

async fn stuck_high(lane: SimObject) -> TbResult {
    loop {
        lane.edge().await;
        if lane.u64() & 1 == 0 {
            lane.set(lane.u64() | 1);
        }
    }
}

async fn steady_square(dut: SimObject, cfg: TbConfig) -> TbResult {
    let tb = bench(dut, cfg).await?;
    let report = tb.run_scenario(&Scenario::new(&cfg)).await?;
    clean(&report, 5)?;
    ensure(report.outputs.len() == 5, "one output matrix per sample")?;
    ensure(report.outputs.iter().all(|m| m.rows() == 4 && m.cols() == 4), "N x N results")?;
    Ok(Val::String(report.to_string()))
}

async fn timing_does_not_change_results(dut: SimObject, cfg: TbConfig) -> TbResult {
    let tb = bench(dut, cfg).await?;
    let steady = tb.run_scenario(&Scenario::new(&cfg)).await?;
    clean(&steady, 5)?;
    let long = Scenario::new(&cfg).timing(Timing::UnsteadyLong, Timing::UnsteadyLong);
    let unsteady = tb.run_scenario(&long).await?;
    clean(&unsteady, 5)?;
    ensure(steady.outputs == unsteady.outputs, "results depend on timing")?;
    ensure(unsteady.cycles > steady.cycles, "fillers and backpressure cost cycles")?;
    ensure(unsteady.a_idles > 0, "long timing inserts fillers")?;
    Ok(Val::None)
}

async fn all_ones_double_depth(dut: SimObject, cfg: TbConfig) -> TbResult {
    let tb = bench(dut, cfg).await?;
    let sc = Scenario::new(&cfg).inner(2 * cfg.n).operands(OperandSource::Max);
    let report = tb.run_scenario(&sc).await?;
    clean(&report, 5)?;
    let expected = 255 * 255 * 8;
    for m in &report.outputs {
        for i in 0..m.rows() {
            ensure(m.row(i).iter().all(|&v| v == expected), "every element is 255*255*8")?;
        }
    }
    Ok(Val::None)
}

async fn streamed_by_column(dut: SimObject, cfg: TbConfig) -> TbResult {
    let tb = bench(dut, cfg).await?;
    let by_row = tb.run_scenario(&Scenario::new(&cfg)).await?;
    let by_col = tb.run_scenario(&Scenario::new(&cfg).output_by_row(false)).await?;
    clean(&by_row, 5)?;
    clean(&by_col, 5)?;
    for (r, c) in by_row.outputs.iter().zip(&by_col.outputs) {
        ensure(*c == r.transpose(), "column stream is the transpose of the row stream")?;
    }
    Ok(Val::None)
}

async fn every_timing_combination(dut: SimObject, cfg: TbConfig) -> TbResult {
    let tb = bench(dut, cfg).await?;
    let scenarios = Scenario::cross_product(&cfg);
    for sc in &scenarios {
        let report = tb.run_scenario(sc).await?;
        ensure(report.mismatched.is_empty(), &format!("{}", report))?;
        ensure(report.violations.is_empty(), &format!("{}", report))?;
        ensure(report.collected == cfg.num_samples, &format!("{}", report))?;
    }
    ensure(scenarios.len() == 36, "three timings each side, two operand sources, two orders")?;
    Ok(Val::Int(scenarios.len() as u64))
}

async fn rejects_wrong_outer_dimension(dut: SimObject, cfg: TbConfig) -> TbResult {
    let tb = bench(dut, cfg).await?;
    let mut sc = Scenario::new(&cfg);
    sc.outer = cfg.n + 1;
    let err = tb.run_scenario(&sc).await;
    ensure(matches!(err, Err(TbError::InvalidConfig(_))), "outer must equal N")?;
    Ok(Val::None)
}

async fn single_scenario(dut: SimObject, cfg: TbConfig) -> TbResult {
    let tb = bench(dut, cfg).await?;
    tb.run_scenario(&Scenario::new(&cfg)).await?.check()?;
    Ok(Val::None)
}

async fn corrupted_results_are_reported(dut: SimObject, cfg: TbConfig) -> TbResult {
    let tb = bench(dut, cfg).await?;
    // 255 * 255 * 4 is even, so the stuck bit alters one element per row
    let report = tb.run_scenario(&Scenario::new(&cfg).operands(OperandSource::Max)).await?;
    ensure(report.collected == 5, "every sample still arrives")?;
    ensure(report.mismatched == vec![(0, 4), (1, 4), (2, 4), (3, 4), (4, 4)], &report.to_string())?;
    ensure(report.check() == Err(TbError::Mismatch { sample: 0, elements: 4 }), "first mismatch is reported")?;
    Ok(Val::None)
}

async fn corrupted_results_abort(dut: SimObject, cfg: TbConfig) -> TbResult {
    let tb = bench(dut, cfg).await?;
    let sc = Scenario::new(&cfg).operands(OperandSource::Max).policy(MismatchPolicy::Abort);
    let result = tb.run_scenario(&sc).await;
    ensure(result == Err(TbError::Mismatch { sample: 0, elements: 4 }), "abort on the first bad sample")?;
    Ok(Val::None)
}

#[test]
fn steady_stream_matches_model() {
    init_tracing();
    let summary = run_tests::<SystolicArray>(TbConfig::default(), litb::tests![steady_square]).unwrap();
    assert!(summary.passed(), "{}", summary.table());
}

#[test]
fn results_are_timing_independent() {
    init_tracing();
    let summary = run_tests::<SystolicArray>(
        TbConfig::default(),
        litb::tests![timing_does_not_change_results, all_ones_double_depth, streamed_by_column],
    )
    .unwrap();
    assert!(summary.passed(), "{}", summary.table());
}

#[test]
fn cross_product_of_timings() {
    init_tracing();
    let cfg = TbConfig::default().num_samples(3);
    let summary = run_tests::<SystolicArray>(cfg, litb::tests![every_timing_combination]).unwrap();
    assert!(summary.passed(), "{}", summary.table());
}

#[test]
fn smaller_array() {
    init_tracing();
    let cfg = TbConfig::default().n(2).seed(7);
    let summary = run_tests::<SystolicArray>(cfg, litb::tests![steady_or_bust, streamed_by_column_small]).unwrap();
    assert!(summary.passed(), "{}", summary.table());

    async fn steady_or_bust(dut: SimObject, cfg: TbConfig) -> TbResult {
        single_scenario(dut, cfg).await
    }
    async fn streamed_by_column_small(dut: SimObject, cfg: TbConfig) -> TbResult {
        let tb = bench(dut, cfg).await?;
        let report = tb.run_scenario(&Scenario::new(&cfg).output_by_row(false)).await?;
        clean(&report, cfg.num_samples)?;
        Ok(Val::None)
    }
}

#[test]
fn regression_passes() {
    init_tracing();
    let summary = run_tests::<SystolicArray>(TbConfig::default(), litb::tests![multiply_test]).unwrap();
    assert!(summary.passed(), "{}", summary.table());
}

#[test]
fn bad_scenario_is_rejected() {
    init_tracing();
    let summary = run_tests::<SystolicArray>(TbConfig::default(), litb::tests![rejects_wrong_outer_dimension]).unwrap();
    assert!(summary.passed(), "{}", summary.table());
}

#[test]
fn faulty_device_is_caught() {
    init_tracing();
    let summary = run_tests::<StuckBit>(
        TbConfig::default(),
        litb::tests![corrupted_results_are_reported, corrupted_results_abort],
    )
    .unwrap();
    assert!(summary.passed(), "{}", summary.table());
}

#[test]
fn faulty_device_fails_the_regression() {
    init_tracing();
    let summary = run_tests::<StuckBit>(TbConfig::default(), litb::tests![single_scenario]).unwrap();
    assert!(!summary.passed());
    assert!(matches!(summary.tests[0].error(), Some(TbError::Mismatch { .. })));
}

#[test]
fn tiny_budget_times_out() {
    init_tracing();
    let cfg = TbConfig::default().max_cycles(20);
    let summary = run_tests::<SystolicArray>(cfg, litb::tests![single_scenario, steady_square]).unwrap();
    assert!(!summary.passed());
    assert_eq!(summary.tests[0].error(), Some(&TbError::Timeout { cycles: 20 }));
    // the next test still gets its own budget
    assert_eq!(summary.tests[1].error(), Some(&TbError::Timeout { cycles: 20 }));
}

#[test]
fn invalid_config_is_refused() {
    let cfg = TbConfig::default().n(0);
    assert!(matches!(
        run_tests::<SystolicArray>(cfg, litb::tests![single_scenario]),
        Err(TbError::InvalidConfig(_))
    ));
}

#[test]
fn junit_report_lists_every_test() {
    init_tracing();
    let cfg = TbConfig::default().num_samples(2);
    let summary = run_tests::<SystolicArray>(cfg, litb::tests![single_scenario, steady_square]).unwrap();
    // steady_square expects five samples
    assert!(summary.tests[0].passed());
    assert!(!summary.tests[1].passed());
    let path = std::env::temp_dir().join(format!("litb-matmul-{}.xml", std::process::id()));
    summary.write_junit("matmul", &path).unwrap();
    let xml = std::fs::read_to_string(&path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert!(xml.contains("single_scenario"));
    assert!(xml.contains("steady_square"));
}
