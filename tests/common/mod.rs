#![allow(dead_code)]

use litb::dut::DeviceModel;
use litb::kernel;
use litb::prelude::*;

/// Installs a fmt subscriber writing through the test harness. `RUST_LOG`
/// selects the level, warnings by default.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Bare wires for a single handshake port: `clk`, `data[N]`, `valid`,
/// `ready`, `last`. Nothing drives them besides the bench.
pub struct Wires {
    scope: SimObject,
}

impl DeviceModel for Wires {
    fn elaborate(cfg: &TbConfig) -> Self {
        let scope = kernel::add_scope("wires");
        kernel::add_net(&scope, "clk", 1, 0);
        for i in 0..cfg.n {
            kernel::add_net(&scope, &format!("data[{}]", i), cfg.data_width, 0);
        }
        for name in ["valid", "ready", "last"] {
            kernel::add_net(&scope, name, 1, 0);
        }
        Self { scope }
    }

    fn scope(&self) -> SimObject {
        self.scope
    }

    fn start(&self) {}
}

pub fn port(dut: SimObject, cfg: &TbConfig) -> litb::port::Port {
    litb::port::Port::new("wires", dut.c("clk"), dut.c_vec("data", cfg.n), dut.c("valid"), dut.c("ready"))
        .with_last(dut.c("last"))
}
