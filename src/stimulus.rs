//! Operand generation, wavefront ordering and idle-pattern timing.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::mask;
use crate::matrix::Matrix;
use crate::port::Transaction;
use crate::utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timing {
    Steady,
    UnsteadyShort,
    UnsteadyLong,
}

impl Timing {
    pub const ALL: [Timing; 3] = [Timing::Steady, Timing::UnsteadyShort, Timing::UnsteadyLong];

    /// Filler beats appended after one stimulus beat.
    pub fn fillers(&self, inner: usize) -> usize {
        match self {
            Timing::Steady => 0,
            Timing::UnsteadyShort => utils::rand_range(0..=1) as usize,
            Timing::UnsteadyLong => utils::rand_range(0..=inner as u64) as usize,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Timing::Steady => "steady",
            Timing::UnsteadyShort => "short",
            Timing::UnsteadyLong => "long",
        }
    }
}

/// Timing of the input writers and of the output backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StimulusProfile {
    pub input: Timing,
    pub output: Timing,
}

impl StimulusProfile {
    pub fn new(input: Timing, output: Timing) -> Self {
        Self { input, output }
    }

    pub fn steady() -> Self {
        Self::new(Timing::Steady, Timing::Steady)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandSource {
    Random { seed: u64 },
    Constant(u64),
    /// Every element all ones.
    Max,
}

/// Produces operand matrices from an [`OperandSource`]. Random sources own their
/// generator, so operand streams do not depend on timing randomness.
pub struct OperandGen {
    source: OperandSource,
    data_width: u32,
    rng: StdRng,
}

impl OperandGen {
    pub fn new(source: OperandSource, data_width: u32) -> Self {
        let seed = match source {
            OperandSource::Random { seed } => seed,
            _ => 0,
        };
        Self { source, data_width, rng: StdRng::seed_from_u64(seed) }
    }

    pub fn matrix(&mut self, rows: usize, cols: usize) -> Matrix {
        let m = mask(self.data_width);
        match self.source {
            OperandSource::Random { .. } => Matrix::from_fn(rows, cols, |_, _| self.rng.gen::<u64>() & m),
            OperandSource::Constant(v) => Matrix::from_fn(rows, cols, |_, _| v & m),
            OperandSource::Max => Matrix::from_fn(rows, cols, |_, _| m),
        }
    }
}

/// A as beats: columns from last to first, each column's rows reversed, `last`
/// only on column 0.
pub fn wavefront_a(a: &Matrix) -> Vec<Transaction> {
    (0..a.cols())
        .rev()
        .map(|col| {
            let mut payload = a.column(col);
            payload.reverse();
            Transaction::beat(payload).with_last(col == 0)
        })
        .collect()
}

/// B as beats: rows from last to first, each row reversed, `last` only on row 0.
pub fn wavefront_b(b: &Matrix) -> Vec<Transaction> {
    (0..b.rows())
        .rev()
        .map(|row| {
            let mut payload = b.row(row).to_vec();
            payload.reverse();
            Transaction::beat(payload).with_last(row == 0)
        })
        .collect()
}

/// Appends `timing.fillers(inner)` random `valid=false` beats after every beat.
pub fn with_fillers(beats: Vec<Transaction>, timing: Timing, inner: usize, data_width: u32) -> Vec<Transaction> {
    let m = mask(data_width);
    let mut out = Vec::with_capacity(beats.len());
    for beat in beats {
        let lanes = beat.payload.len();
        out.push(beat);
        for _ in 0..timing.fillers(inner) {
            let payload = (0..lanes).map(|_| utils::rand_range(0..=m)).collect();
            out.push(Transaction::filler(payload));
        }
    }
    out
}

/// Operands and beat streams of a whole run.
#[derive(Debug, Clone)]
pub struct Stimulus {
    pub samples: Vec<(Matrix, Matrix)>,
    pub a_beats: Vec<Transaction>,
    pub b_beats: Vec<Transaction>,
}

impl Stimulus {
    /// `num_samples` pairs of `outer×inner` A and `inner×outer` B.
    pub fn generate(
        source: OperandSource,
        data_width: u32,
        num_samples: usize,
        outer: usize,
        inner: usize,
        input: Timing,
    ) -> Self {
        let mut gen = OperandGen::new(source, data_width);
        let samples: Vec<_> = (0..num_samples)
            .map(|_| {
                let a = gen.matrix(outer, inner);
                let b = gen.matrix(inner, outer);
                (a, b)
            })
            .collect();
        let mut a_beats = Vec::new();
        let mut b_beats = Vec::new();
        for (a, b) in &samples {
            a_beats.extend(with_fillers(wavefront_a(a), input, inner, data_width));
            b_beats.extend(with_fillers(wavefront_b(b), input, inner, data_width));
        }
        Self { samples, a_beats, b_beats }
    }
}

/// Per-edge `ready` levels of the output reader.
#[derive(Debug, Clone)]
pub struct ReadyPattern {
    timing: Timing,
    inner: usize,
    counter: usize,
    status: bool,
    level: bool,
}

impl ReadyPattern {
    pub fn new(timing: Timing, inner: usize) -> Self {
        Self {
            timing,
            inner: inner.max(1),
            counter: 0,
            status: true,
            level: true,
        }
    }

    /// Level before the first edge.
    pub fn initial(&self) -> bool {
        true
    }

    /// Level to drive after the next edge.
    pub fn next_level(&mut self) -> bool {
        match self.timing {
            Timing::Steady => true,
            Timing::UnsteadyShort => utils::coin(),
            Timing::UnsteadyLong => {
                self.counter += 1;
                if self.counter % self.inner == 0 {
                    self.level = self.status;
                    self.status = !self.status;
                }
                self.level
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn numbered(rows: usize, cols: usize) -> Matrix {
        Matrix::from_fn(rows, cols, |i, j| (10 * i + j) as u64)
    }

    #[test]
    fn a_wavefront_for_n4() {
        let beats = wavefront_a(&numbered(4, 4));
        let payloads: Vec<_> = beats.iter().map(|b| b.payload.clone()).collect();
        assert_eq!(
            payloads,
            vec![
                vec![33, 23, 13, 3],
                vec![32, 22, 12, 2],
                vec![31, 21, 11, 1],
                vec![30, 20, 10, 0],
            ]
        );
        let lasts: Vec<_> = beats.iter().map(|b| b.last).collect();
        assert_eq!(lasts, vec![false, false, false, true]);
        assert!(beats.iter().all(|b| b.valid));
    }

    #[test]
    fn b_wavefront_for_n4() {
        let beats = wavefront_b(&numbered(4, 4));
        assert_eq!(beats[0].payload, vec![33, 32, 31, 30]);
        assert_eq!(beats[3].payload, vec![3, 2, 1, 0]);
        assert_eq!(beats.iter().filter(|b| b.last).count(), 1);
        assert!(beats[3].last);
    }

    #[test]
    fn steady_adds_no_fillers() {
        let beats = with_fillers(wavefront_a(&numbered(4, 4)), Timing::Steady, 4, 8);
        assert_eq!(beats.len(), 4);
    }

    #[test]
    fn long_pattern_toggles_every_inner_edges() {
        let mut p = ReadyPattern::new(Timing::UnsteadyLong, 2);
        let levels: Vec<bool> = (0..8).map(|_| p.next_level()).collect();
        assert_eq!(levels, vec![true, true, true, false, false, true, true, false]);
    }

    #[test]
    fn operand_stream_ignores_timing_randomness() {
        let a = Stimulus::generate(OperandSource::Random { seed: 3 }, 8, 2, 4, 4, Timing::Steady);
        utils::seed(99);
        let b = Stimulus::generate(OperandSource::Random { seed: 3 }, 8, 2, 4, 4, Timing::UnsteadyLong);
        assert_eq!(a.samples, b.samples);
        assert!(b.a_beats.len() >= a.a_beats.len());
    }

    #[test]
    fn max_source_is_all_ones() {
        let m = OperandGen::new(OperandSource::Max, 8).matrix(2, 3);
        assert!((0..2).all(|i| m.row(i).iter().all(|v| *v == 255)));
    }

    proptest! {
        #[test]
        fn wavefront_carries_every_operand_once(
            seed in any::<u64>(),
            outer in 1usize..6,
            inner in 1usize..9,
        ) {
            let mut gen = OperandGen::new(OperandSource::Random { seed }, 8);
            let a = gen.matrix(outer, inner);
            let b = gen.matrix(inner, outer);
            let a_beats = wavefront_a(&a);
            let b_beats = wavefront_b(&b);
            prop_assert_eq!(a_beats.len(), inner);
            prop_assert_eq!(b_beats.len(), inner);
            prop_assert_eq!(a_beats.iter().filter(|t| t.last).count(), 1);
            prop_assert!(b_beats.last().map(|t| t.last).unwrap_or(false));
            for (k, beat) in a_beats.iter().enumerate() {
                let col = inner - 1 - k;
                for (r, v) in beat.payload.iter().enumerate() {
                    prop_assert_eq!(*v, a.get(outer - 1 - r, col));
                }
            }
            for (k, beat) in b_beats.iter().enumerate() {
                let row = inner - 1 - k;
                for (c, v) in beat.payload.iter().enumerate() {
                    prop_assert_eq!(*v, b.get(row, outer - 1 - c));
                }
            }
        }

        #[test]
        fn fillers_are_idle_and_bounded(seed in any::<u64>(), inner in 1usize..9) {
            utils::seed(seed);
            let beats = wavefront_a(&Matrix::zeros(2, inner));
            let out = with_fillers(beats, Timing::UnsteadyLong, inner, 8);
            prop_assert_eq!(out.iter().filter(|t| t.valid).count(), inner);
            prop_assert!(out.len() <= inner * (inner + 1));
            prop_assert!(out.iter().filter(|t| !t.valid).all(|t| t.payload.len() == 2));
        }
    }
}
