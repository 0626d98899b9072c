//! Protocol reader: drives `ready` on request and records every beat transferred
//! on its port.

use tracing::debug;

use crate::error::{SimResult, TbError};
use crate::executor::{JoinHandle, Task};
use crate::fifo::{Fifo, Pop};
use crate::obj::TbObj;
use crate::port::{Port, Transaction};
use crate::trigger;
use crate::TbResult;

#[derive(Clone)]
pub struct Reader {
    inner: TbObj<ReaderInner>,
    accepted: Fifo<Transaction>,
}

struct ReaderInner {
    port: Port,
    task: Option<JoinHandle>,
    sampled: u64,
}

impl Reader {
    pub fn new(port: Port) -> Self {
        Self {
            inner: TbObj::new(ReaderInner {
                port,
                task: None,
                sampled: 0,
            }),
            accepted: Fifo::new(),
        }
    }

    pub fn name(&self) -> String {
        self.inner.get().port.name().to_string()
    }

    pub fn port(&self) -> Port {
        self.inner.get().port.clone()
    }

    /// Sets the `ready` level seen at the next edge.
    pub fn set_ready(&self, ready: bool) -> SimResult {
        self.inner.get().port.set_ready(ready)
    }

    pub fn is_running(&self) -> bool {
        self.inner.get().task.is_some()
    }

    pub fn start(&self) -> SimResult {
        if self.is_running() {
            return Err(TbError::AlreadyStarted(self.name()));
        }
        let name = self.name();
        let handle = Task::spawn_from_future(self.clone().sample_loop(), &name);
        self.inner.with_mut(|r| r.task = Some(handle));
        Ok(())
    }

    /// Cancels the sampling loop. Beats already accepted stay in the buffer.
    pub fn stop(&self) -> SimResult {
        match self.inner.with_mut(|r| r.task.take()) {
            Some(task) => {
                task.cancel();
                Ok(())
            }
            None => Err(TbError::NotStarted(self.name())),
        }
    }

    /// Next accepted beat, waiting for one if the buffer is empty.
    pub fn pop(&self) -> Pop<Transaction> {
        self.accepted.pop()
    }

    pub fn try_pop(&self) -> Option<Transaction> {
        self.accepted.try_pop()
    }

    /// Beats accepted but not yet popped.
    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    /// Beats accepted since construction.
    pub fn sampled(&self) -> u64 {
        self.inner.get().sampled
    }

    async fn sample_loop(self) -> TbResult {
        let port = self.port();
        loop {
            port.clk.rising_edge().await;
            if !port.handshake() {
                trigger::first(vec![port.valid.rising_edge(), port.ready.rising_edge()]).await;
                continue;
            }
            let tx = port.sample();
            debug!(port = port.name(), payload = ?tx.payload, "beat sampled");
            self.inner.with_mut(|r| r.sampled += 1);
            self.accepted.push(tx);
        }
    }
}
