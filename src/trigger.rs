use futures::future::select_all;
use intmap::IntMap;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use crate::executor;
use crate::{
    signal::SimObject,
    sim_if::{SimCallback, SIM_IF},
    value::Val,
};

thread_local! {
    // key is signal handle
    static EDGE_MAP: RefCell<IntMap<CallbackHandles>> = RefCell::new(IntMap::new());
    // key is absolute callback time
    static TIMER_MAP: RefCell<IntMap<CallbackHandles>> = RefCell::new(IntMap::new());
    static READ_ONLY: RefCell<CallbackHandles> = RefCell::new(CallbackHandles::default());
    static READ_WRITE: RefCell<CallbackHandles> = RefCell::new(CallbackHandles::default());
}

#[derive(Default)]
struct CallbackHandles {
    handle: Option<usize>,
    callbacks: VecDeque<TrigShared>,
}

#[derive(PartialEq, Clone, Copy, Debug)]
pub enum EdgeKind {
    Any,
    Rising,
    Falling,
}

pub(crate) fn cancel_all_triggers() {
    let mut handles = Vec::new();
    // wakers are dropped after the borrows end, a dropped task may drop triggers of its own
    let mut released = Vec::new();
    for phase in [&READ_ONLY, &READ_WRITE] {
        phase.with(|p| {
            let mut p = p.borrow_mut();
            released.push(std::mem::take(&mut p.callbacks));
            handles.extend(p.handle.take());
        });
    }
    for map in [&TIMER_MAP, &EDGE_MAP] {
        let mut drained = map.with(|m| std::mem::replace(&mut *m.borrow_mut(), IntMap::new()));
        for (_, cb) in drained.drain() {
            handles.extend(cb.handle);
            released.push(cb.callbacks);
        }
    }
    drop(released);
    for handle in handles {
        // the kernel may already have retired the callback
        let _ = SIM_IF.cancel_callback(handle);
    }
}

/// Removes the waiter registered under `fired` from `callbacks`. An emptied
/// entry stays until its callback fires, `react` retires it then.
fn forget(callbacks: &mut VecDeque<TrigShared>, fired: &Arc<AtomicBool>) -> VecDeque<TrigShared> {
    let (gone, keep) = std::mem::take(callbacks)
        .into_iter()
        .partition(|t| Arc::ptr_eq(&t.fired, fired));
    *callbacks = keep;
    gone
}

#[derive(Debug, Clone)]
struct TrigShared {
    waker: Waker,
    // If trigger is an edge, react needs to know if it is a rising or falling edge
    // so an existing callback does not have to be rescheduled.
    edge_kind: EdgeKind,
    // Set by react. A task can be woken by a trigger it no longer awaits (the losing
    // side of a select), so a trigger only completes once its own flag is set.
    fired: Arc<AtomicBool>,
}

impl TrigShared {
    fn fire(self) {
        self.fired.store(true, Ordering::Release);
        self.waker.wake();
    }
}

#[derive(Clone, Copy, Debug)]
enum TrigKind {
    Edge(usize, EdgeKind),
    Timer(u64),
    ReadWrite,
    ReadOnly,
}

#[derive(Debug)]
pub struct Trigger {
    kind: TrigKind,
    // map key of the registration: absolute time for timers, handle for edges
    key: u64,
    fired: Option<Arc<AtomicBool>>,
}

impl Trigger {
    fn new(kind: TrigKind) -> Self {
        Trigger { kind, key: 0, fired: None }
    }
    pub fn timer(time: u64, unit: &str) -> Self {
        let steps = SIM_IF
            .get_sim_steps(time as f64, unit)
            .unwrap_or_else(|e| panic!("Invalid timer {}{}: {}", time, unit, e));
        Trigger::timer_steps(steps)
    }
    pub fn timer_steps(steps: u64) -> Self {
        Trigger::new(TrigKind::Timer(steps))
    }
    pub fn edge(signal: SimObject) -> Self {
        Trigger::new(TrigKind::Edge(signal.handle(), EdgeKind::Any))
    }
    pub fn rising_edge(signal: SimObject) -> Self {
        Trigger::new(TrigKind::Edge(signal.handle(), EdgeKind::Rising))
    }
    pub fn falling_edge(signal: SimObject) -> Self {
        Trigger::new(TrigKind::Edge(signal.handle(), EdgeKind::Falling))
    }
    pub fn read_write() -> Self {
        Trigger::new(TrigKind::ReadWrite)
    }
    pub fn read_only() -> Self {
        Trigger::new(TrigKind::ReadOnly)
    }

    fn register(&self, shared: TrigShared) -> u64 {
        let register = |cb: SimCallback| {
            SIM_IF
                .register_callback(cb)
                .unwrap_or_else(|e| panic!("Simulator refused callback {:?}: {}", cb, e))
        };
        match self.kind {
            TrigKind::ReadWrite => READ_WRITE.with(|rw| {
                let mut rw = rw.borrow_mut();
                rw.callbacks.push_back(shared);
                if rw.handle.is_none() {
                    rw.handle = Some(register(SimCallback::ReadWrite));
                }
                0
            }),
            TrigKind::ReadOnly => READ_ONLY.with(|ro| {
                let mut ro = ro.borrow_mut();
                ro.callbacks.push_back(shared);
                if ro.handle.is_none() {
                    ro.handle = Some(register(SimCallback::ReadOnly));
                }
                0
            }),
            TrigKind::Timer(t) => {
                // key on absolute time since the simulator reports absolute time, not delta
                let abs_time = t + SIM_IF.get_sim_time_steps();
                TIMER_MAP.with(|m| {
                    let mut m = m.borrow_mut();
                    if let Some(callbacks) = m.get_mut(abs_time) {
                        callbacks.callbacks.push_back(shared);
                    } else {
                        let handle = register(SimCallback::Time(abs_time));
                        m.insert(abs_time, CallbackHandles {
                            handle: Some(handle),
                            callbacks: VecDeque::from([shared]),
                        });
                    }
                });
                abs_time
            }
            TrigKind::Edge(sig_hdl, _) => {
                EDGE_MAP.with(|m| {
                    let mut m = m.borrow_mut();
                    if let Some(callbacks) = m.get_mut(sig_hdl as u64) {
                        callbacks.callbacks.push_back(shared);
                    } else {
                        let handle = register(SimCallback::Edge(sig_hdl));
                        m.insert(sig_hdl as u64, CallbackHandles {
                            handle: Some(handle),
                            callbacks: VecDeque::from([shared]),
                        });
                    }
                });
                sig_hdl as u64
            }
        }
    }
}

// A trigger dropped before it fired (the losing side of a select, a cancelled
// task) takes its waiter out of the callback tables.
impl Drop for Trigger {
    fn drop(&mut self) {
        let Some(fired) = self.fired.take() else {
            return;
        };
        if fired.load(Ordering::Acquire) {
            return;
        }
        let key = self.key;
        // the tables are gone at thread exit or busy while being cleared
        let gone = match self.kind {
            TrigKind::Edge(..) => EDGE_MAP.try_with(|m| {
                m.try_borrow_mut()
                    .ok()
                    .and_then(|mut m| m.get_mut(key).map(|cb| forget(&mut cb.callbacks, &fired)))
            }),
            TrigKind::Timer(_) => TIMER_MAP.try_with(|m| {
                m.try_borrow_mut()
                    .ok()
                    .and_then(|mut m| m.get_mut(key).map(|cb| forget(&mut cb.callbacks, &fired)))
            }),
            TrigKind::ReadWrite => READ_WRITE.try_with(|p| {
                p.try_borrow_mut().ok().map(|mut p| forget(&mut p.callbacks, &fired))
            }),
            TrigKind::ReadOnly => READ_ONLY.try_with(|p| {
                p.try_borrow_mut().ok().map(|mut p| forget(&mut p.callbacks, &fired))
            }),
        };
        drop(gone);
    }
}

impl Future for Trigger {
    type Output = Val;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(fired) = &self.fired {
            return match fired.load(Ordering::Acquire) {
                true => Poll::Ready(Val::None),
                false => Poll::Pending,
            };
        }
        let fired = Arc::new(AtomicBool::new(false));
        let edge_kind = match self.kind {
            TrigKind::Edge(_, kind) => kind,
            _ => EdgeKind::Any,
        };
        let key = self.register(TrigShared {
            waker: cx.waker().clone(),
            edge_kind,
            fired: fired.clone(),
        });
        self.key = key;
        self.fired = Some(fired);
        Poll::Pending
    }
}

/// Resolves as soon as one of `triggers` fires and returns its index.
pub async fn first(triggers: Vec<Trigger>) -> usize {
    let (_, index, _) = select_all(triggers).await;
    index
}

/// Called by the simulator for every due callback. Wakes the matching triggers and
/// runs the woken tasks to completion of this evaluation step.
#[inline]
pub fn react(cb: SimCallback, edge: Option<EdgeKind>) {
    let vec_wake: VecDeque<TrigShared> = match cb {
        SimCallback::ReadWrite => READ_WRITE.with(|rw| {
            let mut rw = rw.borrow_mut();
            rw.handle = None; // remove handle, since CB is now done
            std::mem::take(&mut rw.callbacks)
        }),
        SimCallback::ReadOnly => READ_ONLY.with(|ro| {
            let mut ro = ro.borrow_mut();
            ro.handle = None;
            std::mem::take(&mut ro.callbacks)
        }),
        SimCallback::Time(t) => TIMER_MAP
            .with(|m| m.borrow_mut().remove(t))
            .map(|cb| cb.callbacks)
            .unwrap_or_default(),
        SimCallback::Edge(sig_hdl) => {
            let edge = edge.unwrap_or(EdgeKind::Any);
            let (wake, retire) = EDGE_MAP.with(|m| {
                let mut m = m.borrow_mut();
                let Some(callbacks) = m.get_mut(sig_hdl as u64) else {
                    return (VecDeque::new(), None);
                };
                let (wake, keep): (VecDeque<_>, VecDeque<_>) = callbacks
                    .callbacks
                    .drain(..)
                    .partition(|trig| trig.edge_kind == EdgeKind::Any || trig.edge_kind == edge);
                callbacks.callbacks = keep;
                if callbacks.callbacks.is_empty() {
                    // if no callbacks are remaining, cancel
                    (wake, m.remove(sig_hdl as u64).and_then(|cb| cb.handle))
                } else {
                    (wake, None)
                }
            });
            if let Some(handle) = retire {
                let _ = SIM_IF.cancel_callback(handle);
            }
            wake
        }
    };

    if !vec_wake.is_empty() {
        for shared in vec_wake {
            shared.fire();
        }
        // execute woken tasks
        executor::run_once();
    }
}
