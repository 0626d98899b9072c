use crate::error::{SimResult, TbError};
use crate::kernel;
use crate::signal::{ObjectKind, SimObject};
use lazy_static::lazy_static;

lazy_static! {
    pub static ref SIM_IF: Box<dyn SimIf + Sync + Send> = new_interface();
}

fn new_interface() -> Box<dyn SimIf + Sync + Send> {
    Box::new(kernel::Kernel)
}

#[derive(Debug, Hash, Clone, Copy, Eq, PartialEq)]
pub enum SimCallback {
    /// Absolute time in simulation steps.
    Time(u64),
    Edge(usize),
    ReadWrite,
    ReadOnly,
}

/// Everything the bench needs from a simulator. The in-process kernel is the
/// only backend; the components never reach past this trait.
pub trait SimIf {
    fn set_value(&self, obj: &SimObject, value: u64) -> SimResult;
    fn get_value(&self, obj: &SimObject) -> SimResult<u64>;
    fn get_object_by_name(&self, name: &str) -> SimResult<SimObject>;
    fn get_root_object(&self) -> SimResult<SimObject>;
    fn get_full_name(&self, obj: &SimObject) -> SimResult<String>;
    fn get_kind(&self, handle: usize) -> ObjectKind;
    fn get_sim_time_steps(&self) -> u64;
    fn get_sim_precision(&self) -> i8;
    fn log(&self, msg: &str);
    fn register_callback(&self, cb: SimCallback) -> SimResult<usize>;
    fn cancel_callback(&self, cb_hdl: usize) -> SimResult;
    fn get_sim_time(&self, unit: &str) -> f64 {
        // this function does not preserve precision, so don't use carelessly
        let t = self.get_sim_time_steps() as f64;
        let precision = self.get_sim_precision();
        ldexp10(t, precision - time_scale(unit).unwrap_or(precision))
    }
    fn get_sim_steps(&self, time: f64, unit: &str) -> SimResult<u64> {
        let precision = self.get_sim_precision();
        let scale = time_scale(unit)?;
        let steps = ldexp10(time, scale - precision);
        if steps % 1.0 == 0.0 {
            Ok(steps as u64)
        } else {
            Err(TbError::InvalidConfig(format!(
                "can't convert time {} {} to sim steps without rounding (sim precision: {})",
                time,
                unit,
                scale_time(precision)?
            )))
        }
    }
}

fn time_scale(unit: &str) -> SimResult<i8> {
    match unit {
        "fs" => Ok(-15),
        "ps" => Ok(-12),
        "ns" => Ok(-9),
        "us" => Ok(-6),
        "ms" => Ok(-3),
        "sec" => Ok(0),
        _ => Err(TbError::InvalidConfig(format!("unknown time unit {}", unit))),
    }
}

fn scale_time(unit: i8) -> SimResult<String> {
    match unit {
        -15 => Ok("fs".to_string()),
        -12 => Ok("ps".to_string()),
        -9 => Ok("ns".to_string()),
        -6 => Ok("us".to_string()),
        -3 => Ok("ms".to_string()),
        0 => Ok("sec".to_string()),
        _ => Err(TbError::InvalidConfig(format!("unsupported precision 1e{}", unit))),
    }
}

fn ldexp10(frac: f64, exp: i8) -> f64 {
    // Like math.ldexp, but base 10
    if exp >= 0 {
        frac * 10_u64.pow(exp as u32) as f64
    } else {
        let div = 10_u64.pow(-exp as u32) as f64;
        frac / div
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_units_to_steps() {
        kernel::reset();
        assert_eq!(SIM_IF.get_sim_steps(5.0, "ns"), Ok(5_000));
        assert_eq!(SIM_IF.get_sim_steps(1.0, "us"), Ok(1_000_000));
        assert!(SIM_IF.get_sim_steps(0.5, "ps").is_err());
        assert!(SIM_IF.get_sim_steps(1.0, "parsec").is_err());
    }

    #[test]
    fn ldexp10_scales_both_ways() {
        assert_eq!(ldexp10(1.5, 3), 1500.0);
        assert_eq!(ldexp10(1500.0, -3), 1.5);
    }
}
