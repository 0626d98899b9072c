use std::collections::VecDeque;
use tracing::{debug, error};

use crate::error::{SimResult, TbError};
use crate::matrix::Matrix;
use crate::monitor::Reader;
use crate::obj::TbObj;
use crate::value::Val;
use crate::TbResult;

/// What to do once a collected sample differs from its expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MismatchPolicy {
    /// Record it and keep collecting.
    #[default]
    Continue,
    /// Fail the run with [`TbError::Mismatch`].
    Abort,
}

/// Rebuilds output matrices row by row and compares each completed one against
/// the expected matrix of the same index.
#[derive(Clone)]
pub struct Scoreboard(TbObj<ScoreboardInner>);

struct ScoreboardInner {
    rows_per_sample: usize,
    policy: MismatchPolicy,
    exp_q: VecDeque<Matrix>,
    partial: Vec<Vec<u64>>,
    recv_q: Vec<Matrix>,
    expected: usize,
    received: usize,
    matched: usize,
    // (sample, differing elements)
    mismatched: Vec<(usize, usize)>,
}

impl Scoreboard {
    pub fn new(rows_per_sample: usize, policy: MismatchPolicy) -> Self {
        Self(TbObj::new(ScoreboardInner {
            rows_per_sample,
            policy,
            exp_q: VecDeque::new(),
            partial: Vec::new(),
            recv_q: Vec::new(),
            expected: 0,
            received: 0,
            matched: 0,
            mismatched: Vec::new(),
        }))
    }

    pub fn add_exp(&self, data: Matrix) {
        self.0.with_mut(|s| {
            s.exp_q.push_back(data);
            s.expected += 1;
        });
    }

    /// Appends one output beat. Returns the finished matrix once a sample is complete.
    pub fn add_row(&self, row: Vec<u64>) -> SimResult<Option<Matrix>> {
        let complete = self.0.with_mut(|s| {
            s.partial.push(row);
            match s.partial.len() >= s.rows_per_sample {
                true => Some(std::mem::take(&mut s.partial)),
                false => None,
            }
        });
        match complete {
            Some(rows) => {
                let actual = Matrix::from_rows(rows)?;
                self.0.with_mut(|s| s.recv_q.push(actual.clone()));
                self.compare(&actual)?;
                Ok(Some(actual))
            }
            None => Ok(None),
        }
    }

    fn compare(&self, actual: &Matrix) -> SimResult {
        let (sample, expected, policy) = self.0.with_mut(|s| {
            let sample = s.received;
            s.received += 1;
            (sample, s.exp_q.pop_front(), s.policy)
        });
        let diff = match &expected {
            Some(exp) => exp.diff(actual),
            None => vec![(0, 0)],
        };
        if diff.is_empty() {
            debug!(sample, "sample matched");
            self.0.with_mut(|s| s.matched += 1);
            return Ok(());
        }
        match &expected {
            Some(exp) => error!(
                sample,
                elements = diff.len(),
                "output mismatch\nexpected:\n{}\nactual:\n{}",
                exp,
                actual
            ),
            None => error!(sample, "output without expectation\nactual:\n{}", actual),
        }
        self.0.with_mut(|s| s.mismatched.push((sample, diff.len())));
        match policy {
            MismatchPolicy::Continue => Ok(()),
            MismatchPolicy::Abort => Err(TbError::Mismatch { sample, elements: diff.len() }),
        }
    }

    /// Completed samples so far.
    pub fn collected(&self) -> usize {
        self.0.get().received
    }

    /// Every completed matrix in arrival order.
    pub fn outputs(&self) -> Vec<Matrix> {
        self.0.get().recv_q.clone()
    }

    /// `(sample, differing elements)` for every sample that differed from its
    /// expectation.
    pub fn mismatched(&self) -> Vec<(usize, usize)> {
        self.0.get().mismatched.clone()
    }

    pub fn result(&self) -> TbResult {
        if self.passed() {
            return Ok(Val::String(self.result_str()));
        }
        let inner = self.0.get();
        match inner.mismatched.first() {
            Some(&(sample, elements)) => Err(TbError::Mismatch { sample, elements }),
            None => Err(TbError::TestFailed(format!("incomplete: {}", inner.summary()))),
        }
    }

    pub fn passed(&self) -> bool {
        let inner = self.0.get();
        inner.expected > 0
            && inner.received == inner.expected
            && inner.matched == inner.received
            && inner.mismatched.is_empty()
            && inner.exp_q.is_empty()
            && inner.partial.is_empty()
    }

    pub fn result_str(&self) -> String {
        self.0.get().summary()
    }
}

impl ScoreboardInner {
    fn summary(&self) -> String {
        format!(
            "expected={}, received={}, matched={}, errors={}, expQ: {}, partial rows: {}",
            self.expected,
            self.received,
            self.matched,
            self.mismatched.len(),
            self.exp_q.len(),
            self.partial.len()
        )
    }
}

/// Feeds beats popped from `reader` into `scoreboard` until `num_samples`
/// matrices are complete.
pub async fn collect(reader: Reader, scoreboard: Scoreboard, num_samples: usize) -> TbResult {
    while scoreboard.collected() < num_samples {
        let beat = reader.pop().await;
        scoreboard.add_row(beat.payload)?;
    }
    Ok(Val::Int(scoreboard.collected() as u64))
}
