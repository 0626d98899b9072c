//! Passive handshake checker. Once a beat is offered (`valid=1`) it must stay on
//! the port unchanged until an edge where `ready=1` transfers it.

use tracing::warn;

use crate::error::{SimResult, TbError};
use crate::executor::{JoinHandle, Task};
use crate::obj::TbObj;
use crate::port::{Port, Transaction};
use crate::TbResult;

#[derive(Clone)]
pub struct HandshakeChecker(TbObj<CheckerInner>);

struct CheckerInner {
    port: Port,
    task: Option<JoinHandle>,
    cycle: u64,
    violations: Vec<TbError>,
}

impl HandshakeChecker {
    pub fn new(port: Port) -> Self {
        Self(TbObj::new(CheckerInner {
            port,
            task: None,
            cycle: 0,
            violations: Vec::new(),
        }))
    }

    pub fn start(&self) -> SimResult {
        let name = self.0.with_mut(|c| c.port.name().to_string());
        if self.0.get().task.is_some() {
            return Err(TbError::AlreadyStarted(format!("checker {}", name)));
        }
        let handle = Task::spawn_from_future(self.clone().watch(), &format!("checker {}", name));
        self.0.with_mut(|c| c.task = Some(handle));
        Ok(())
    }

    pub fn stop(&self) -> SimResult {
        match self.0.with_mut(|c| c.task.take()) {
            Some(task) => {
                task.cancel();
                Ok(())
            }
            None => Err(TbError::NotStarted(format!("checker {}", self.0.get().port.name()))),
        }
    }

    pub fn violations(&self) -> Vec<TbError> {
        self.0.get().violations.clone()
    }

    /// First violation seen, if any.
    pub fn result(&self) -> SimResult {
        match self.0.get().violations.first() {
            Some(v) => Err(v.clone()),
            None => Ok(()),
        }
    }

    async fn watch(self) -> TbResult {
        let port = self.0.get().port.clone();
        // beat offered but not taken at the previous edge
        let mut stalled: Option<Transaction> = None;
        loop {
            port.clk.rising_edge().await;
            let now = port.sample();
            let cycle = self.0.with_mut(|c| {
                c.cycle += 1;
                c.cycle
            });
            if let Some(prev) = stalled.take() {
                let reason = if !now.valid {
                    Some("valid withdrawn before ready".to_string())
                } else if now != prev {
                    Some(format!("beat changed while stalled: {} -> {}", prev, now))
                } else {
                    None
                };
                if let Some(reason) = reason {
                    warn!(port = port.name(), cycle, %reason, "handshake violation");
                    self.0.with_mut(|c| {
                        c.violations.push(TbError::ProtocolViolation {
                            port: port.name().to_string(),
                            cycle,
                            reason,
                        })
                    });
                }
            }
            if now.valid && !port.ready.is_high() {
                stalled = Some(now);
            }
        }
    }
}
