//! Run parameters, fixed for the lifetime of one simulation.

use crate::error::{SimResult, TbError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TbConfig {
    /// Width of one operand element in bits.
    pub data_width: u32,
    /// Array dimension, also the number of data lanes per port.
    pub n: usize,
    pub multiply_data_width: u32,
    pub accum_data_width: u32,
    pub num_samples: usize,
    pub clock_period_ns: u64,
    /// Seed for the timing randomness (idle holds, fillers, backpressure).
    pub seed: u64,
    /// Cycle budget of the whole run; exceeding it ends the run with a timeout.
    pub max_cycles: u64,
}

impl Default for TbConfig {
    fn default() -> Self {
        Self {
            data_width: 8,
            n: 4,
            multiply_data_width: 16,
            accum_data_width: 16,
            num_samples: 5,
            clock_period_ns: 10,
            seed: 0x5eed,
            max_cycles: 1_000_000,
        }
    }
}

impl TbConfig {
    pub fn data_width(mut self, bits: u32) -> Self {
        self.data_width = bits;
        self
    }
    pub fn n(mut self, n: usize) -> Self {
        self.n = n;
        self
    }
    pub fn multiply_data_width(mut self, bits: u32) -> Self {
        self.multiply_data_width = bits;
        self
    }
    pub fn accum_data_width(mut self, bits: u32) -> Self {
        self.accum_data_width = bits;
        self
    }
    pub fn num_samples(mut self, samples: usize) -> Self {
        self.num_samples = samples;
        self
    }
    pub fn clock_period_ns(mut self, period: u64) -> Self {
        self.clock_period_ns = period;
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
    pub fn max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = cycles;
        self
    }

    /// Width of one result element.
    pub fn result_width(&self) -> u32 {
        self.multiply_data_width + self.accum_data_width
    }

    pub fn max_operand(&self) -> u64 {
        mask(self.data_width)
    }

    pub fn validate(&self) -> SimResult {
        if self.n == 0 {
            return Err(TbError::InvalidConfig("N must be at least 1".into()));
        }
        if self.data_width == 0 || self.data_width > 32 {
            return Err(TbError::InvalidConfig(format!(
                "DATA_WIDTH={} outside 1..=32",
                self.data_width
            )));
        }
        if self.multiply_data_width < 2 * self.data_width {
            return Err(TbError::InvalidConfig(format!(
                "MULTIPLY_DATA_WIDTH={} cannot hold a {}x{} bit product",
                self.multiply_data_width, self.data_width, self.data_width
            )));
        }
        if self.result_width() > 64 {
            return Err(TbError::InvalidConfig(format!(
                "MULTIPLY_DATA_WIDTH+ACCUM_DATA_WIDTH={} exceeds 64 bits",
                self.result_width()
            )));
        }
        if self.clock_period_ns < 2 {
            return Err(TbError::InvalidConfig("clock period must be at least 2ns".into()));
        }
        Ok(())
    }
}

/// All-ones value of the given width.
pub fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}
