//! Behavioural model of the systolic-array matrix multiplier.
//!
//! Operand beats are consumed in pairs (one A column, one B row) on edges where
//! both input valids and `input_ready` are high; each pair adds its outer
//! product to the accumulators. The pair whose A beat carries `last` closes the
//! matrix. After `2N-2` skew cycles the array drains one row per accepted
//! output beat, or one column when `output_by_row` is low.
//!
//! Lane mapping: operand lane `i` feeds array row/column `i`; result element `j`
//! of a drained row is on lane `N-1-j`.

use tracing::debug;

use crate::config::{mask, TbConfig};
use crate::executor::Task;
use crate::kernel;
use crate::obj::TbObj;
use crate::signal::SimObject;
use crate::trigger::{self, Trigger};
use crate::TbResult;

pub const SCOPE: &str = "matrix_multiplier";

/// A simulated device: declares its nets once per simulation and spawns its
/// processes at the start of every test.
pub trait DeviceModel: Send + Sync + 'static {
    fn elaborate(cfg: &TbConfig) -> Self
    where
        Self: Sized;

    /// Top-level scope handed to tests.
    fn scope(&self) -> SimObject;

    fn start(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Accumulate,
    Skew(usize),
    Drain(usize),
}

struct ArrayState {
    phase: Phase,
    acc: Vec<u64>,
}

#[derive(Clone)]
pub struct SystolicArray {
    cfg: TbConfig,
    scope: SimObject,
    nets: Nets,
}

#[derive(Clone)]
struct Nets {
    clk: SimObject,
    reset: SimObject,
    a_data: Vec<SimObject>,
    b_data: Vec<SimObject>,
    a_valid: SimObject,
    b_valid: SimObject,
    input_ready: SimObject,
    last: SimObject,
    output_ready: SimObject,
    output_valid: SimObject,
    output_by_row: SimObject,
    c_data: Vec<SimObject>,
    // internal: high while pairs can be consumed
    accumulating: SimObject,
}

impl DeviceModel for SystolicArray {
    fn elaborate(cfg: &TbConfig) -> Self {
        let n = cfg.n;
        let scope = kernel::add_scope(SCOPE);
        let net = |name: &str, width: u32| kernel::add_net(&scope, name, width, 0);
        let lanes = |name: &str, width: u32| {
            (0..n)
                .map(|i| kernel::add_net(&scope, &format!("{}[{}]", name, i), width, 0))
                .collect::<Vec<_>>()
        };
        kernel::add_net(&scope, "DATA_WIDTH", 32, cfg.data_width as u64);
        kernel::add_net(&scope, "N", 32, n as u64);
        kernel::add_net(&scope, "MULTIPLY_DATA_WIDTH", 32, cfg.multiply_data_width as u64);
        kernel::add_net(&scope, "ACCUM_DATA_WIDTH", 32, cfg.accum_data_width as u64);
        let nets = Nets {
            clk: net("clk", 1),
            reset: net("reset", 1),
            a_data: lanes("a_data", cfg.data_width),
            b_data: lanes("b_data", cfg.data_width),
            a_valid: net("a_input_valid", 1),
            b_valid: net("b_input_valid", 1),
            input_ready: net("input_ready", 1),
            last: net("last", 1),
            output_ready: net("output_ready", 1),
            output_valid: net("output_valid", 1),
            output_by_row: net("output_by_row", 1),
            c_data: lanes("c_data_streaming", cfg.result_width()),
            accumulating: kernel::add_net(&scope, "accumulating", 1, 1),
        };
        Self { cfg: *cfg, scope, nets }
    }

    fn scope(&self) -> SimObject {
        self.scope
    }

    fn start(&self) {
        let state = TbObj::new(ArrayState {
            phase: Phase::Accumulate,
            acc: vec![0; self.cfg.n * self.cfg.n],
        });
        Task::spawn_from_future(self.clone().clocked(state), "systolic_array");
        Task::spawn_from_future(self.clone().input_ready(), "input_ready");
    }
}

impl SystolicArray {
    fn input_ready_level(&self) -> bool {
        let n = &self.nets;
        !n.reset.is_high() && n.accumulating.is_high() && n.a_valid.is_high() && n.b_valid.is_high()
    }

    async fn input_ready(self) -> TbResult {
        let n = self.nets.clone();
        loop {
            n.input_ready.set_bool(self.input_ready_level());
            trigger::first(vec![
                Trigger::edge(n.a_valid),
                Trigger::edge(n.b_valid),
                Trigger::edge(n.reset),
                Trigger::edge(n.accumulating),
            ])
            .await;
        }
    }

    async fn clocked(self, state: TbObj<ArrayState>) -> TbResult {
        let n = self.nets.clone();
        let size = self.cfg.n;
        let product_mask = mask(self.cfg.multiply_data_width);
        let result_mask = mask(self.cfg.result_width());
        loop {
            n.clk.rising_edge().await;
            if n.reset.is_high() {
                state.with_mut(|s| {
                    s.phase = Phase::Accumulate;
                    s.acc.iter_mut().for_each(|v| *v = 0);
                });
                n.output_valid.set(0);
                n.accumulating.set(1);
                continue;
            }
            let phase = state.get().phase;
            let next = match phase {
                Phase::Accumulate => {
                    if n.a_valid.is_high() && n.b_valid.is_high() && n.input_ready.is_high() {
                        let a: Vec<u64> = n.a_data.iter().map(|l| l.u64()).collect();
                        let b: Vec<u64> = n.b_data.iter().map(|l| l.u64()).collect();
                        state.with_mut(|s| {
                            for i in 0..size {
                                for j in 0..size {
                                    let product = a[i].wrapping_mul(b[j]) & product_mask;
                                    let acc = &mut s.acc[i * size + j];
                                    *acc = acc.wrapping_add(product) & result_mask;
                                }
                            }
                        });
                        match n.last.is_high() {
                            true => Phase::Skew(2 * size - 2),
                            false => Phase::Accumulate,
                        }
                    } else {
                        Phase::Accumulate
                    }
                }
                Phase::Skew(left) => Phase::Skew(left.saturating_sub(1)),
                Phase::Drain(row) => match n.output_valid.is_high() && n.output_ready.is_high() {
                    true if row + 1 == size => {
                        state.with_mut(|s| s.acc.iter_mut().for_each(|v| *v = 0));
                        Phase::Accumulate
                    }
                    true => Phase::Drain(row + 1),
                    false => Phase::Drain(row),
                },
            };
            // the skew count reaching zero starts the drain
            let next = match next {
                Phase::Skew(0) => Phase::Drain(0),
                other => other,
            };
            if next != phase {
                debug!(from = ?phase, to = ?next, "array phase");
            }
            state.with_mut(|s| s.phase = next);
            match next {
                Phase::Accumulate => {
                    n.output_valid.set(0);
                    n.accumulating.set(1);
                }
                Phase::Skew(_) => n.accumulating.set(0),
                Phase::Drain(row) => {
                    let by_row = n.output_by_row.is_high();
                    let values: Vec<u64> = state.with_mut(|s| {
                        (0..size)
                            .map(|k| match by_row {
                                true => s.acc[row * size + k],
                                false => s.acc[k * size + row],
                            })
                            .collect()
                    });
                    for (lane, value) in n.c_data.iter().rev().zip(values) {
                        lane.set(value);
                    }
                    n.output_valid.set(1);
                    n.accumulating.set(0);
                }
            }
        }
    }
}
