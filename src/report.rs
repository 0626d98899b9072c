use junit_report::{Duration, ReportBuilder, TestCaseBuilder, TestSuiteBuilder};
use prettytable::{format, Cell, Row, Table};
use std::path::Path;
use std::time::Instant;

use crate::error::{SimResult, TbError};
use crate::sim_if::SIM_IF;
use crate::TbResult;

/// Result and timing of one registered test.
#[derive(Debug, Clone)]
pub struct TestRecord {
    pub name: String,
    pub result: Option<TbResult>,
    pub time_secs: f64,
    pub sim_time_ns: f64,
    started: Option<(Instant, f64)>,
}

impl TestRecord {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            result: None,
            time_secs: 0.0,
            sim_time_ns: 0.0,
            started: None,
        }
    }

    pub(crate) fn start(&mut self) {
        self.started = Some((Instant::now(), SIM_IF.get_sim_time("ns")));
    }

    pub(crate) fn finish(&mut self, result: TbResult) {
        if let Some((wall, sim)) = self.started {
            self.time_secs = wall.elapsed().as_secs_f64();
            self.sim_time_ns = SIM_IF.get_sim_time("ns") - sim;
        }
        self.result = Some(result);
    }

    pub fn passed(&self) -> bool {
        matches!(self.result, Some(Ok(_)))
    }

    pub fn error(&self) -> Option<&TbError> {
        match &self.result {
            Some(Err(e)) => Some(e),
            _ => None,
        }
    }
}

/// Everything known about a finished simulation.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub tests: Vec<TestRecord>,
    pub sim_time_ns: f64,
    pub real_secs: f64,
    pub deltas: u64,
}

impl RunSummary {
    pub fn passed(&self) -> bool {
        !self.tests.is_empty() && self.tests.iter().all(TestRecord::passed)
    }

    pub fn failed(&self) -> Vec<&TestRecord> {
        self.tests.iter().filter(|t| !t.passed()).collect()
    }

    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
        table.set_titles(Row::new(
            ["Test", "Result", "Time (s)", "SimTime (ns)", "SimSpeed (ns/s)"]
                .iter()
                .map(|t| Cell::new(t))
                .collect(),
        ));
        for t in &self.tests {
            let result = match &t.result {
                Some(Ok(_)) => "passed".to_string(),
                Some(Err(e)) => format!("failed: {}", e),
                None => "not run".to_string(),
            };
            table.add_row(Row::new(vec![
                Cell::new(&t.name),
                Cell::new(&result),
                Cell::new(&format!("{:.3}", t.time_secs)),
                Cell::new(&format!("{}", t.sim_time_ns)),
                Cell::new(&format!("{:.3}", speed(t.sim_time_ns, t.time_secs))),
            ]));
        }
        table
    }

    /// Logs the per-test table and the simulation totals.
    pub fn log(&self) {
        SIM_IF.log(&format!("TEST SUMMARY\n{}", self.table()));
        SIM_IF.log("TOTAL SIMULATION");
        SIM_IF.log(&format!("Simulation time: {} ns", self.sim_time_ns));
        SIM_IF.log(&format!("Real time: {:.3} s", self.real_secs));
        SIM_IF.log(&format!("Simulation speed: {:.3} ns/s", speed(self.sim_time_ns, self.real_secs)));
        SIM_IF.log(&format!("Delta cycles: {}", self.deltas));
    }

    pub fn write_junit(&self, suite: &str, path: impl AsRef<Path>) -> SimResult {
        let mut test_cases = Vec::new();
        for t in &self.tests {
            let duration = Duration::seconds_f64(t.time_secs);
            let tc = match &t.result {
                Some(Ok(_)) => TestCaseBuilder::success(&t.name, duration),
                Some(Err(e)) => TestCaseBuilder::failure(&t.name, duration, "failure", &e.to_string()),
                None => TestCaseBuilder::failure(&t.name, duration, "failure", "test did not run"),
            }
            .build();
            test_cases.push(tc);
        }

        let test_suite = TestSuiteBuilder::new(suite).add_testcases(test_cases).build();
        let report = ReportBuilder::new().add_testsuite(test_suite).build();
        let file = std::fs::File::create(path.as_ref())
            .map_err(|e| TbError::Report(format!("{}: {}", path.as_ref().display(), e)))?;
        report.write_xml(file).map_err(|e| TbError::Report(e.to_string()))
    }
}

fn speed(sim_ns: f64, secs: f64) -> f64 {
    match secs > 0.0 {
        true => sim_ns / secs,
        false => 0.0,
    }
}
