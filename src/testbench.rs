use futures::future::{self, Either};
use std::fmt;
use tracing::{error, warn};

use crate::checker::HandshakeChecker;
use crate::driver::Writer;
use crate::matrix::Matrix;
use crate::monitor::Reader;
use crate::model::ReferenceModel;
use crate::port::{Port, Transaction};
use crate::prelude::*;
use crate::scoreboard::{self, MismatchPolicy, Scoreboard};
use crate::stimulus::{OperandSource, ReadyPattern, Stimulus, StimulusProfile, Timing};

/*
 * CLOCK
 */
pub async fn clock(clk: SimObject, period: u64, unit: &str) -> TbResult {
    let high_t = period / 2;
    let low_t = period - high_t;
    if period % 2 != 0 {
        SIM_IF.log(&format!("Warning: Clock period {period}{unit} not dividable by 2. High time will be {high}{unit}; low time will be {low}{unit}.", period=period, unit=unit, high=high_t, low=low_t));
    }
    loop {
        clk.set(0);
        Trigger::timer(low_t, unit).await;
        clk.set(1);
        Trigger::timer(high_t, unit).await;
    }
}

/*
 * SCENARIO
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scenario {
    pub num_samples: usize,
    pub outer: usize,
    pub inner: usize,
    pub profile: StimulusProfile,
    pub output_by_row: bool,
    pub operands: OperandSource,
    pub policy: MismatchPolicy,
}

impl Scenario {
    /// Square `N×N` operands, steady timing, random operands seeded from `cfg`.
    pub fn new(cfg: &TbConfig) -> Self {
        Self {
            num_samples: cfg.num_samples,
            outer: cfg.n,
            inner: cfg.n,
            profile: StimulusProfile::steady(),
            output_by_row: true,
            operands: OperandSource::Random { seed: cfg.seed },
            policy: MismatchPolicy::Continue,
        }
    }
    pub fn num_samples(mut self, num_samples: usize) -> Self {
        self.num_samples = num_samples;
        self
    }
    pub fn inner(mut self, inner: usize) -> Self {
        self.inner = inner;
        self
    }
    pub fn timing(mut self, input: Timing, output: Timing) -> Self {
        self.profile = StimulusProfile::new(input, output);
        self
    }
    pub fn output_by_row(mut self, by_row: bool) -> Self {
        self.output_by_row = by_row;
        self
    }
    pub fn operands(mut self, operands: OperandSource) -> Self {
        self.operands = operands;
        self
    }
    pub fn policy(mut self, policy: MismatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn name(&self) -> String {
        let operands = match self.operands {
            OperandSource::Random { .. } => "random".to_string(),
            OperandSource::Constant(v) => format!("const {}", v),
            OperandSource::Max => "max".to_string(),
        };
        format!(
            "in={} out={} inner={} {} {}",
            self.profile.input.name(),
            self.profile.output.name(),
            self.inner,
            if self.output_by_row { "rows" } else { "cols" },
            operands
        )
    }

    pub fn validate(&self, cfg: &TbConfig) -> SimResult {
        if self.outer != cfg.n {
            return Err(TbError::InvalidConfig(format!(
                "outer dimension {} must equal N={}",
                self.outer, cfg.n
            )));
        }
        if self.inner == 0 || self.num_samples == 0 {
            return Err(TbError::InvalidConfig(format!(
                "scenario '{}' has nothing to multiply",
                self.name()
            )));
        }
        Ok(())
    }

    /// Inner dimension N and 2N, each timing applied to both directions, random
    /// and all-ones operands.
    pub fn regression(cfg: &TbConfig) -> Vec<Scenario> {
        let mut list = Vec::new();
        for inner in [cfg.n, 2 * cfg.n] {
            for timing in Timing::ALL {
                for operands in [OperandSource::Random { seed: cfg.seed }, OperandSource::Max] {
                    list.push(Scenario::new(cfg).inner(inner).timing(timing, timing).operands(operands));
                }
            }
        }
        list
    }

    /// Every input timing against every output timing with random and all-ones
    /// operands, streamed by row and by column.
    pub fn cross_product(cfg: &TbConfig) -> Vec<Scenario> {
        let mut list = Vec::new();
        for input in Timing::ALL {
            for output in Timing::ALL {
                for operands in [OperandSource::Random { seed: cfg.seed }, OperandSource::Max] {
                    for by_row in [true, false] {
                        list.push(
                            Scenario::new(cfg)
                                .timing(input, output)
                                .operands(operands)
                                .output_by_row(by_row),
                        );
                    }
                }
            }
        }
        list
    }
}

/// Outcome of one scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioReport {
    pub name: String,
    pub collected: usize,
    /// `(sample, differing elements)` per mismatched sample.
    pub mismatched: Vec<(usize, usize)>,
    pub violations: Vec<TbError>,
    pub outputs: Vec<Matrix>,
    pub cycles: u64,
    pub a_idles: u64,
    pub b_idles: u64,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.mismatched.is_empty() && self.violations.is_empty()
    }

    /// First recorded failure, if any.
    pub fn check(&self) -> SimResult {
        if let Some(v) = self.violations.first() {
            return Err(v.clone());
        }
        match self.mismatched.first() {
            Some(&(sample, elements)) => Err(TbError::Mismatch { sample, elements }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: collected={}, mismatches={}, violations={}, cycles={}, idles a/b={}/{}",
            self.name,
            self.collected,
            self.mismatched.len(),
            self.violations.len(),
            self.cycles,
            self.a_idles,
            self.b_idles
        )
    }
}

/*
 * MATMUL TESTBENCH
 */
#[derive(Clone)]
pub struct MatmulTb {
    pub cfg: TbConfig,
    pub clk: SimObject,
    reset: SimObject,
    output_by_row: SimObject,
    pub a_writer: Writer,
    pub b_writer: Writer,
    pub reader: Reader,
}

fn lanes(dut: SimObject, name: &str, n: usize) -> SimResult<Vec<SimObject>> {
    (0..n).map(|i| dut.get_child(&format!("{}[{}]", name, i))).collect()
}

impl MatmulTb {
    pub fn new(dut: SimObject, cfg: TbConfig) -> SimResult<Self> {
        cfg.validate()?;
        let clk = dut.get_child("clk")?;
        let input_ready = dut.get_child("input_ready")?;
        let a_port = Port::new(
            "a_input",
            clk,
            lanes(dut, "a_data", cfg.n)?,
            dut.get_child("a_input_valid")?,
            input_ready,
        )
        .with_last(dut.get_child("last")?);
        let b_port = Port::new(
            "b_input",
            clk,
            lanes(dut, "b_data", cfg.n)?,
            dut.get_child("b_input_valid")?,
            input_ready,
        );
        let out_port = Port::new(
            "c_output",
            clk,
            lanes(dut, "c_data_streaming", cfg.n)?,
            dut.get_child("output_valid")?,
            dut.get_child("output_ready")?,
        );
        Ok(Self {
            cfg,
            clk,
            reset: dut.get_child("reset")?,
            output_by_row: dut.get_child("output_by_row")?,
            a_writer: Writer::new(a_port),
            b_writer: Writer::new(b_port),
            reader: Reader::new(out_port),
        })
    }

    pub fn start_clock(&self) -> JoinHandle {
        Task::spawn_from_future(clock(self.clk, self.cfg.clock_period_ns, "ns"), "clock")
    }

    /// Drives every input low and holds reset for three edges.
    pub async fn reset(&self) -> TbResult {
        let lanes = self.cfg.n;
        self.a_writer.port().drive(&Transaction::idle(lanes))?;
        self.b_writer.port().drive(&Transaction::idle(lanes))?;
        self.reader.set_ready(false)?;
        self.output_by_row.set(0);
        self.reset.set(1);
        utils::clock_cycles(self.clk, 3).await?;
        self.reset.set(0);
        SIM_IF.log("reset done");
        Ok(Val::None)
    }

    /// Streams one scenario through the device and scores every output matrix.
    pub async fn run_scenario(&self, sc: &Scenario) -> SimResult<ScenarioReport> {
        sc.validate(&self.cfg)?;
        utils::seed(self.cfg.seed);
        let model = ReferenceModel::new(&self.cfg);
        if !model.headroom(sc.inner) {
            warn!(inner = sc.inner, "result width cannot hold the worst-case sum, results wrap");
        }
        let stim = Stimulus::generate(
            sc.operands,
            self.cfg.data_width,
            sc.num_samples,
            sc.outer,
            sc.inner,
            sc.profile.input,
        );
        let sb = Scoreboard::new(sc.outer, sc.policy);
        for (a, b) in &stim.samples {
            sb.add_exp(model.expected(a, b, sc.output_by_row)?);
        }
        SIM_IF.log(&format!("scenario {}: {} samples", sc.name(), sc.num_samples));

        self.output_by_row.set_bool(sc.output_by_row);
        let checkers: Vec<_> = [self.a_writer.port(), self.b_writer.port(), self.reader.port()]
            .into_iter()
            .map(HandshakeChecker::new)
            .collect();
        for checker in &checkers {
            checker.start()?;
        }
        let (a_idles, b_idles) = (self.a_writer.idles(), self.b_writer.idles());
        self.a_writer.enqueue_all(stim.a_beats);
        self.b_writer.enqueue_all(stim.b_beats);
        let pattern = ReadyPattern::new(sc.profile.output, sc.inner);
        self.reader.set_ready(pattern.initial())?;
        self.a_writer.start()?;
        self.b_writer.start()?;
        self.reader.start()?;
        let backpressure = Task::spawn_from_future(backpressure(self.reader.clone(), self.clk, pattern), "backpressure");

        let start = SIM_IF.get_sim_time("ns");
        let collected = future::select(
            scoreboard::collect(self.reader.clone(), sb.clone(), sc.num_samples).boxed(),
            utils::clock_cycles(self.clk, self.cfg.max_cycles).boxed(),
        )
        .await;
        let cycles = ((SIM_IF.get_sim_time("ns") - start) / self.cfg.clock_period_ns as f64) as u64;

        backpressure.cancel();
        self.a_writer.stop()?;
        self.b_writer.stop()?;
        self.reader.stop()?;
        for checker in &checkers {
            checker.stop()?;
        }
        match collected {
            Either::Left((result, _)) => {
                result?;
            }
            Either::Right(_) => {
                // a writer that died on a bad beat starves the device
                let failed = self.a_writer.error().or_else(|| self.b_writer.error());
                return Err(failed.unwrap_or(TbError::Timeout { cycles: self.cfg.max_cycles }));
            }
        }

        Ok(ScenarioReport {
            name: sc.name(),
            collected: sb.collected(),
            mismatched: sb.mismatched(),
            violations: checkers.iter().flat_map(|c| c.violations()).collect(),
            outputs: sb.outputs(),
            cycles,
            a_idles: self.a_writer.idles() - a_idles,
            b_idles: self.b_writer.idles() - b_idles,
        })
    }
}

async fn backpressure(reader: Reader, clk: SimObject, mut pattern: ReadyPattern) -> TbResult {
    loop {
        clk.rising_edge().await;
        if let Err(e) = reader.set_ready(pattern.next_level()) {
            error!(port = %reader.name(), %e, "backpressure stopped");
            return Err(e);
        }
    }
}

/// Runs the regression list against the device under `dut`.
pub async fn multiply_test(dut: SimObject, cfg: TbConfig) -> TbResult {
    let tb = MatmulTb::new(dut, cfg)?;
    tb.start_clock();
    tb.reset().await?;
    let scenarios = Scenario::regression(&cfg);
    for sc in &scenarios {
        let report = tb.run_scenario(sc).await?;
        SIM_IF.log(&report.to_string());
        report.check()?;
    }
    Ok(Val::String(format!("{} scenarios passed", scenarios.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_product_covers_timings_operands_and_order() {
        let cfg = TbConfig::default();
        let list = Scenario::cross_product(&cfg);
        assert_eq!(list.len(), 3 * 3 * 2 * 2);
        let max_steady_long = Scenario::new(&cfg)
            .timing(Timing::Steady, Timing::UnsteadyLong)
            .operands(OperandSource::Max);
        assert!(list.contains(&max_steady_long));
        assert!(list.iter().all(|sc| sc.validate(&cfg).is_ok()));
    }

    #[test]
    fn regression_matches_the_classic_list() {
        let cfg = TbConfig::default();
        let list = Scenario::regression(&cfg);
        assert_eq!(list.len(), 2 * 3 * 2);
        assert!(list.iter().all(|sc| sc.profile.input == sc.profile.output));
        assert!(list.iter().any(|sc| sc.inner == 2 * cfg.n));
    }

    #[test]
    fn report_names_the_first_mismatch() {
        let report = ScenarioReport {
            name: "x".to_string(),
            collected: 3,
            mismatched: vec![(1, 4), (2, 1)],
            violations: Vec::new(),
            outputs: Vec::new(),
            cycles: 10,
            a_idles: 0,
            b_idles: 0,
        };
        assert!(!report.passed());
        assert_eq!(report.check(), Err(TbError::Mismatch { sample: 1, elements: 4 }));
        assert_eq!(
            report.check().unwrap_err().to_string(),
            "sample 1 mismatched in 4 element(s)"
        );
    }

    #[test]
    fn scenario_must_fit_the_array() {
        let cfg = TbConfig::default();
        let mut sc = Scenario::new(&cfg);
        sc.outer = 3;
        assert!(matches!(sc.validate(&cfg), Err(TbError::InvalidConfig(_))));
        assert!(Scenario::new(&cfg).num_samples(0).validate(&cfg).is_err());
    }
}
