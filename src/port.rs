//! One side of a ready/valid handshake: clock, data lanes, valid, ready and an
//! optional `last` line.

use std::fmt;

use crate::error::{SimResult, TbError};
use crate::signal::SimObject;

/// One beat as driven onto or sampled from a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub payload: Vec<u64>,
    pub valid: bool,
    pub last: bool,
}

impl Transaction {
    pub fn new(payload: Vec<u64>, valid: bool) -> Self {
        Self { payload, valid, last: false }
    }

    /// A beat carrying data.
    pub fn beat(payload: Vec<u64>) -> Self {
        Self::new(payload, true)
    }

    /// A `valid=false` beat with arbitrary payload.
    pub fn filler(payload: Vec<u64>) -> Self {
        Self::new(payload, false)
    }

    /// All-zero payload, `valid=false`. Driven whenever a writer has nothing queued.
    pub fn idle(lanes: usize) -> Self {
        Self::new(vec![0; lanes], false)
    }

    pub fn with_last(mut self, last: bool) -> Self {
        self.last = last;
        self
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} valid={} last={}",
            self.payload, self.valid as u8, self.last as u8
        )
    }
}

#[derive(Debug, Clone)]
pub struct Port {
    name: String,
    pub clk: SimObject,
    /// Lane `i` is `data[i]`; lane `len-1` is the most significant.
    pub data: Vec<SimObject>,
    pub valid: SimObject,
    pub ready: SimObject,
    pub last: Option<SimObject>,
}

impl Port {
    pub fn new(name: &str, clk: SimObject, data: Vec<SimObject>, valid: SimObject, ready: SimObject) -> Self {
        Self {
            name: name.to_string(),
            clk,
            data,
            valid,
            ready,
            last: None,
        }
    }

    pub fn with_last(mut self, last: SimObject) -> Self {
        self.last = Some(last);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lanes(&self) -> usize {
        self.data.len()
    }

    pub fn supports_last(&self) -> bool {
        self.last.is_some()
    }

    /// Drives payload, valid and (if present) last. Payload element `k` lands on
    /// lane `lanes-1-k`. `last` is dropped on ports without the line.
    pub fn drive(&self, tx: &Transaction) -> SimResult {
        if tx.payload.len() != self.lanes() {
            return Err(TbError::LaneCount {
                port: self.name.clone(),
                lanes: self.lanes(),
                got: tx.payload.len(),
            });
        }
        for (lane, value) in self.data.iter().rev().zip(&tx.payload) {
            lane.try_set(*value)?;
        }
        self.valid.try_set(tx.valid as u64)?;
        if let Some(last) = self.last {
            last.try_set(tx.last as u64)?;
        }
        Ok(())
    }

    /// Reads the current lane values into a transaction, inverse of [`Port::drive`].
    pub fn sample(&self) -> Transaction {
        Transaction {
            payload: self.data.iter().rev().map(|lane| lane.u64()).collect(),
            valid: self.valid.is_high(),
            last: self.last.map(|l| l.is_high()).unwrap_or(false),
        }
    }

    /// True when a beat is transferred at the current edge.
    pub fn handshake(&self) -> bool {
        self.valid.is_high() && self.ready.is_high()
    }

    pub fn set_ready(&self, ready: bool) -> SimResult {
        self.ready.try_set(ready as u64)
    }
}
