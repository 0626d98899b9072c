//! In-process event-driven simulator.
//!
//! The kernel owns a table of nets, the simulated time and the callback
//! registrations made through [`SimIf`]. One time step is evaluated as
//!
//! 1. timer callbacks due at this time,
//! 2. delta cycles: pending writes are applied together, then value-change
//!    callbacks fire for every net that changed; writes made while reacting
//!    land in the next delta,
//! 3. read-write callbacks once no writes are pending (may start new deltas),
//! 4. read-only callbacks, during which writes are refused.
//!
//! Writes never become visible in the delta they are made in, so every task
//! woken by a clock edge observes the values that were settled before the edge.
//! State lives in a thread local, one simulation per thread.

use intmap::IntMap;
use num_format::{Locale, ToFormattedString};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use crate::error::{SimResult, TbError};
use crate::executor;
use crate::signal::{ObjectKind, SimObject};
use crate::sim_if::{SimCallback, SimIf};
use crate::trigger::{self, EdgeKind};

const PRECISION: i8 = -12;
const MAX_DELTAS: u32 = 10_000;

thread_local! {
    static STATE: RefCell<State> = RefCell::new(State::default());
}

fn with_state<R>(f: impl FnOnce(&mut State) -> R) -> R {
    STATE.with(|s| f(&mut s.borrow_mut()))
}

enum Object {
    Scope { name: String },
    Net { name: String, width: u32, value: u64 },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
enum Phase {
    #[default]
    Active,
    ReadOnly,
}

#[derive(Default)]
struct State {
    // handle = index + 1, so 0 never names an object
    objects: Vec<Object>,
    names: HashMap<String, usize>,
    time: u64,
    phase: Phase,
    pending: Vec<(usize, u64)>,
    next_cb: usize,
    callbacks: IntMap<SimCallback>,
    timers: BTreeMap<u64, Vec<usize>>,
    edges: IntMap<Vec<usize>>,
    read_write: Vec<usize>,
    read_only: Vec<usize>,
    finished: bool,
    deltas: u64,
}

impl State {
    fn object(&self, handle: usize) -> Option<&Object> {
        handle.checked_sub(1).and_then(|i| self.objects.get(i))
    }

    fn insert(&mut self, object: Object) -> usize {
        let name = match &object {
            Object::Scope { name } | Object::Net { name, .. } => name.clone(),
        };
        self.objects.push(object);
        let handle = self.objects.len();
        self.names.insert(name, handle);
        handle
    }

    /// Applies all pending writes, last write wins. Returns the nets that changed.
    fn apply_pending(&mut self) -> Vec<(usize, EdgeKind)> {
        let pending = std::mem::take(&mut self.pending);
        let mut touched: Vec<(usize, u64)> = Vec::new();
        for (handle, value) in pending {
            if let Some(Object::Net { value: current, .. }) =
                handle.checked_sub(1).and_then(|i| self.objects.get_mut(i))
            {
                if !touched.iter().any(|(h, _)| *h == handle) {
                    touched.push((handle, *current));
                }
                *current = value;
            }
        }
        touched
            .into_iter()
            .filter_map(|(handle, old)| match self.object(handle) {
                Some(Object::Net { value, .. }) if *value != old => Some((handle, edge_kind(old, *value))),
                _ => None,
            })
            .collect()
    }

    fn take_live(&mut self, ids: Vec<usize>) -> Vec<SimCallback> {
        ids.into_iter().filter_map(|id| self.callbacks.remove(id as u64)).collect()
    }
}

fn edge_kind(old: u64, new: u64) -> EdgeKind {
    match (old & 1, new & 1) {
        (0, 1) => EdgeKind::Rising,
        (1, 0) => EdgeKind::Falling,
        _ => EdgeKind::Any,
    }
}

/// How a call to [`run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// [`finish`] was called.
    Finished,
    /// Nothing is scheduled any more.
    Starved,
    /// The next event lies beyond the time limit.
    TimeLimit,
}

/// Drops every net, callback and task of the current thread's simulation.
pub fn reset() {
    trigger::cancel_all_triggers();
    executor::clear_ready_queue();
    with_state(|s| *s = State::default());
}

/// Declares a hierarchy scope. The first scope declared is the root.
pub fn add_scope(name: &str) -> SimObject {
    let handle = with_state(|s| s.insert(Object::Scope { name: name.to_string() }));
    SimObject { handle, kind: ObjectKind::Hier }
}

/// Declares a net `scope.name` of `width` bits holding `init`.
pub fn add_net(scope: &SimObject, name: &str, width: u32, init: u64) -> SimObject {
    let full_name = format!("{}.{}", scope.name(), name);
    let value = init & crate::config::mask(width);
    let handle = with_state(|s| s.insert(Object::Net { name: full_name, width, value }));
    SimObject { handle, kind: ObjectKind::Int(width) }
}

/// Requests the end of the simulation once the current time step has settled.
pub fn finish() {
    with_state(|s| s.finished = true);
}

pub fn is_finished() -> bool {
    with_state(|s| s.finished)
}

pub fn delta_count() -> u64 {
    with_state(|s| s.deltas)
}

/// Runs the simulation until [`finish`] is called, no event is left, or the next
/// event would lie beyond `time_limit` steps.
pub fn run(time_limit: Option<u64>) -> SimResult<RunOutcome> {
    with_state(|s| s.finished = false);
    executor::run_once();
    settle()?;
    loop {
        if is_finished() {
            return Ok(RunOutcome::Finished);
        }
        let next = with_state(|s| s.timers.keys().next().copied());
        let Some(time) = next else {
            return Ok(RunOutcome::Starved);
        };
        if time_limit.is_some_and(|limit| time > limit) {
            return Ok(RunOutcome::TimeLimit);
        }
        let due = with_state(|s| {
            s.time = time;
            let ids = s.timers.remove(&time).unwrap_or_default();
            s.take_live(ids)
        });
        for cb in due {
            trigger::react(cb, None);
        }
        settle()?;
    }
}

fn settle() -> SimResult {
    let mut deltas = 0;
    loop {
        loop {
            let changes = with_state(|s| {
                s.deltas += 1;
                s.apply_pending()
            });
            if changes.is_empty() {
                break;
            }
            deltas += 1;
            if deltas > MAX_DELTAS {
                let time = with_state(|s| s.time);
                return Err(TbError::Oscillation { time });
            }
            // callbacks registered while reacting only see later deltas
            let watchers: Vec<_> = with_state(|s| {
                changes
                    .into_iter()
                    .map(|(handle, edge)| (edge, s.edges.get(handle as u64).cloned().unwrap_or_default()))
                    .collect()
            });
            for (edge, ids) in watchers {
                for id in ids {
                    // an earlier reaction may have cancelled this callback
                    let live = with_state(|s| s.callbacks.get(id as u64).copied());
                    if let Some(cb) = live {
                        trigger::react(cb, Some(edge));
                    }
                }
            }
        }
        let rw = with_state(|s| {
            let ids = std::mem::take(&mut s.read_write);
            s.take_live(ids)
        });
        if rw.is_empty() {
            break;
        }
        for cb in rw {
            trigger::react(cb, None);
        }
    }
    let ro = with_state(|s| {
        let ids = std::mem::take(&mut s.read_only);
        s.phase = Phase::ReadOnly;
        s.take_live(ids)
    });
    for cb in ro {
        trigger::react(cb, None);
    }
    with_state(|s| s.phase = Phase::Active);
    Ok(())
}

/// [`SimIf`] implementation backed by the thread-local kernel state.
pub struct Kernel;

impl SimIf for Kernel {
    fn set_value(&self, obj: &SimObject, value: u64) -> SimResult {
        with_state(|s| {
            let (name, width) = match s.object(obj.handle) {
                Some(Object::Net { name, width, .. }) => (name.clone(), *width),
                _ => return Err(TbError::SignalNotFound(format!("<handle {}>", obj.handle))),
            };
            if s.phase == Phase::ReadOnly {
                return Err(TbError::ReadOnlyWrite(name));
            }
            s.pending.push((obj.handle, value & crate::config::mask(width)));
            Ok(())
        })
    }
    fn get_value(&self, obj: &SimObject) -> SimResult<u64> {
        with_state(|s| match s.object(obj.handle) {
            Some(Object::Net { value, .. }) => Ok(*value),
            _ => Err(TbError::SignalNotFound(format!("<handle {}>", obj.handle))),
        })
    }
    fn get_object_by_name(&self, name: &str) -> SimResult<SimObject> {
        let handle = with_state(|s| s.names.get(name).copied())
            .ok_or_else(|| TbError::SignalNotFound(name.to_string()))?;
        Ok(SimObject { handle, kind: self.get_kind(handle) })
    }
    fn get_root_object(&self) -> SimResult<SimObject> {
        with_state(|s| match s.objects.first() {
            Some(Object::Scope { .. }) => Ok(SimObject { handle: 1, kind: ObjectKind::Hier }),
            _ => Err(TbError::SignalNotFound("<root scope>".to_string())),
        })
    }
    fn get_full_name(&self, obj: &SimObject) -> SimResult<String> {
        with_state(|s| match s.object(obj.handle) {
            Some(Object::Scope { name }) | Some(Object::Net { name, .. }) => Ok(name.clone()),
            None => Err(TbError::SignalNotFound(format!("<handle {}>", obj.handle))),
        })
    }
    fn get_kind(&self, handle: usize) -> ObjectKind {
        with_state(|s| match s.object(handle) {
            Some(Object::Net { width, .. }) => ObjectKind::Int(*width),
            _ => ObjectKind::Hier,
        })
    }
    fn get_sim_time_steps(&self) -> u64 {
        with_state(|s| s.time)
    }
    fn get_sim_precision(&self) -> i8 {
        PRECISION
    }
    fn log(&self, msg: &str) {
        let t = self.get_sim_time("ns");
        let int = t.floor() as u64;
        let mut frac_str = format!("{:.3}", t % 1.0);
        frac_str.remove(0);
        let stamp = format!("{}{}ns", int.to_formatted_string(&Locale::en), frac_str);
        tracing::info!(sim_time = %stamp, "{}", msg);
    }
    fn register_callback(&self, cb: SimCallback) -> SimResult<usize> {
        with_state(|s| {
            s.next_cb += 1;
            let id = s.next_cb;
            match cb {
                SimCallback::Time(abs_time) => {
                    if abs_time < s.time {
                        return Err(TbError::TimerInPast { at: abs_time, now: s.time });
                    }
                    s.timers.entry(abs_time).or_default().push(id);
                }
                SimCallback::Edge(handle) => {
                    if !matches!(s.object(handle), Some(Object::Net { .. })) {
                        return Err(TbError::SignalNotFound(format!("<handle {}>", handle)));
                    }
                    match s.edges.get_mut(handle as u64) {
                        Some(ids) => ids.push(id),
                        None => {
                            s.edges.insert(handle as u64, vec![id]);
                        }
                    }
                }
                SimCallback::ReadWrite => s.read_write.push(id),
                SimCallback::ReadOnly => s.read_only.push(id),
            }
            s.callbacks.insert(id as u64, cb);
            Ok(id)
        })
    }
    fn cancel_callback(&self, cb_hdl: usize) -> SimResult {
        with_state(|s| {
            match s.callbacks.remove(cb_hdl as u64) {
                Some(SimCallback::Edge(handle)) => {
                    if let Some(ids) = s.edges.get_mut(handle as u64) {
                        ids.retain(|id| *id != cb_hdl);
                    }
                }
                Some(SimCallback::Time(t)) => {
                    if let Some(ids) = s.timers.get_mut(&t) {
                        ids.retain(|id| *id != cb_hdl);
                        if ids.is_empty() {
                            s.timers.remove(&t);
                        }
                    }
                }
                // phase lists are filtered against the live set when they fire
                Some(_) | None => {}
            }
            Ok(())
        })
    }
}
