//! Protocol writer: presents queued transactions on a port and holds each valid
//! beat until the receiver accepts it.

use queues::{IsQueue, Queue};
use tracing::{debug, error};

use crate::error::{SimResult, TbError};
use crate::executor::{JoinHandle, Task};
use crate::obj::TbObj;
use crate::port::{Port, Transaction};
use crate::utils;
use crate::TbResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Idle,
    Presenting,
    WaitingForReady,
}

/// Number of edges a `valid=false` beat stays on the port, at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleHold {
    /// Uniform in `min..=max`.
    Random { min: u64, max: u64 },
    Fixed(u64),
}

impl Default for IdleHold {
    fn default() -> Self {
        IdleHold::Random { min: 1, max: 3 }
    }
}

impl IdleHold {
    fn cycles(&self) -> u64 {
        match *self {
            IdleHold::Random { min, max } => utils::rand_range(min..=max.max(min)),
            IdleHold::Fixed(n) => n,
        }
        .max(1)
    }
}

#[derive(Clone)]
pub struct Writer(TbObj<WriterInner>);

struct WriterInner {
    port: Port,
    queue: Queue<Transaction>,
    idle_hold: IdleHold,
    state: WriterState,
    task: Option<JoinHandle>,
    accepted: u64,
    idles: u64,
    // why the drive loop ended on its own
    error: Option<TbError>,
}

impl Writer {
    pub fn new(port: Port) -> Self {
        Self(TbObj::new(WriterInner {
            port,
            queue: Queue::new(),
            idle_hold: IdleHold::default(),
            state: WriterState::Idle,
            task: None,
            accepted: 0,
            idles: 0,
            error: None,
        }))
    }

    pub fn with_idle_hold(self, idle_hold: IdleHold) -> Self {
        self.0.with_mut(|w| w.idle_hold = idle_hold);
        self
    }

    pub fn name(&self) -> String {
        self.0.get().port.name().to_string()
    }

    pub fn port(&self) -> Port {
        self.0.get().port.clone()
    }

    pub fn enqueue(&self, tx: Transaction) {
        self.0.with_mut(|w| {
            // unbounded queue, add never fails
            let _ = w.queue.add(tx);
        });
    }

    pub fn enqueue_all(&self, txs: impl IntoIterator<Item = Transaction>) {
        for tx in txs {
            self.enqueue(tx);
        }
    }

    pub fn pending(&self) -> usize {
        self.0.get().queue.size()
    }

    /// Number of valid beats the receiver has accepted.
    pub fn accepted(&self) -> u64 {
        self.0.get().accepted
    }

    /// Number of idle beats driven, fillers included.
    pub fn idles(&self) -> u64 {
        self.0.get().idles
    }

    pub fn state(&self) -> WriterState {
        self.0.get().state
    }

    pub fn is_running(&self) -> bool {
        self.0.get().task.is_some()
    }

    /// Error that ended the drive loop, if it failed.
    pub fn error(&self) -> Option<TbError> {
        self.0.get().error.clone()
    }

    pub fn start(&self) -> SimResult {
        if self.is_running() {
            return Err(TbError::AlreadyStarted(self.name()));
        }
        let name = self.name();
        let handle = Task::spawn_from_future(self.clone().drive(), &name);
        self.0.with_mut(|w| {
            w.error = None;
            w.task = Some(handle);
        });
        Ok(())
    }

    /// Cancels the drive loop. Queued transactions are dropped; the port keeps
    /// whatever was driven last.
    pub fn stop(&self) -> SimResult {
        let task = self.0.with_mut(|w| {
            w.state = WriterState::Idle;
            w.queue = Queue::new();
            w.task.take()
        });
        match task {
            Some(task) => {
                task.cancel();
                Ok(())
            }
            None => Err(TbError::NotStarted(self.name())),
        }
    }

    fn next(&self) -> Transaction {
        self.0.with_mut(|w| match w.queue.remove() {
            Ok(tx) => tx,
            Err(_) => Transaction::idle(w.port.lanes()),
        })
    }

    fn set_state(&self, state: WriterState) {
        self.0.with_mut(|w| w.state = state);
    }

    async fn drive(self) -> TbResult {
        let port = self.port();
        let idle_hold = self.0.get().idle_hold;
        loop {
            let tx = self.next();
            if let Err(e) = port.drive(&tx) {
                error!(port = port.name(), %e, "writer stopped");
                self.0.with_mut(|w| w.error = Some(e.clone()));
                return Err(e);
            }
            if tx.valid {
                self.set_state(WriterState::Presenting);
                loop {
                    port.clk.rising_edge().await;
                    if port.ready.is_high() {
                        break;
                    }
                    self.set_state(WriterState::WaitingForReady);
                    port.ready.rising_edge().await;
                }
                debug!(port = port.name(), payload = ?tx.payload, last = tx.last, "beat accepted");
                self.0.with_mut(|w| w.accepted += 1);
            } else {
                self.set_state(WriterState::Idle);
                for _ in 0..idle_hold.cycles() {
                    port.clk.rising_edge().await;
                }
                self.0.with_mut(|w| w.idles += 1);
            }
        }
    }
}
