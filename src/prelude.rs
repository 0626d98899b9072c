pub use crate::config::TbConfig;
pub use crate::error::{SimResult, TbError};
pub use crate::executor::{JoinHandle, Task};
pub use crate::trigger::Trigger;
pub use crate::signal::SimObject;
pub use crate::sim_if::SIM_IF;
pub use futures::future::FutureExt;
pub use crate::{TbResult, Test, TestFn};
pub use crate::obj::TbObj;
pub use crate::value::Val;
pub use crate::{pass_test, fail_test, run_tests, utils};
