use futures::{future::{BoxFuture, FutureExt}, task::{waker_ref, ArcWake, Context, Poll}};
use futures_channel::oneshot;
use queues::{Queue, IsQueue};
use std::{cell::RefCell, future::Future, pin::Pin, sync::{Arc, Mutex, PoisonError}};

use crate::error::TbError;
use crate::TbResult;

thread_local! {
    static READY_QUEUE: RefCell<Queue<Arc<Task>>> = RefCell::new(Queue::new());
}

pub fn schedule_task(task: Arc<Task>) {
    READY_QUEUE.with(|q| {
        // Queue::add only fails for bounded queues
        let _ = q.borrow_mut().add(task);
    });
}

fn next_task() -> Option<Arc<Task>> {
    READY_QUEUE.with(|q| q.borrow_mut().remove().ok())
}

pub(crate) fn clear_ready_queue() {
    READY_QUEUE.with(|q| *q.borrow_mut() = Queue::new());
}

/// Polls woken tasks until none is ready any more. Tasks run in the order they were woken.
#[inline]
pub fn run_once() {
    while let Some(task) = next_task() {
        process_task(task);
    }
}

#[inline]
fn process_task(task: Arc<Task>) {
    if *task.state.lock().unwrap_or_else(PoisonError::into_inner) == TaskState::Cancelled {
        // do not execute if state is cancelled, will be dropped once all references disappear
        return
    }

    let mut fut_slot = task.future.lock().unwrap_or_else(PoisonError::into_inner);
    // a task may be woken several times before it is polled; once done the slot is empty
    if let Some(mut fut) = fut_slot.take() {
        let waker = waker_ref(&task);
        let context = &mut Context::from_waker(&waker);
        match fut.as_mut().poll(context) {
            Poll::Pending => *fut_slot = Some(fut),
            Poll::Ready(result) => {
                drop(fut_slot);
                *task.state.lock().unwrap_or_else(PoisonError::into_inner) = TaskState::Done;
                let tx = task.join_tx.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(tx) = tx {
                    // nobody awaiting the handle is fine
                    let _ = tx.send(result);
                }
            }
        }
    }
}

#[derive(PartialEq, Debug, Clone, Copy)]
enum TaskState {
    Pending,
    Done,
    Cancelled,
}

pub struct Task {
    future: Mutex<Option<BoxFuture<'static, TbResult>>>,
    state: Mutex<TaskState>,
    name: String,
    join_tx: Mutex<Option<oneshot::Sender<TbResult>>>,
}

impl Task {
    pub fn fork(
        future: impl Future<Output = TbResult> + Send + 'static
    ) -> JoinHandle {
        Task::spawn_from_future(future, "forked")
    }
    pub fn spawn_from_future(
        future: impl Future<Output = TbResult> + Send + 'static,
        name: &str,
    ) -> JoinHandle {
        let (task, join_handle) = Task::new(future.boxed(), name);
        schedule_task(task);
        join_handle
    }
    fn new(fut: BoxFuture<'static, TbResult>, name: &str) -> (Arc<Self>, JoinHandle) {
        let (tx, rx) = oneshot::channel::<TbResult>();
        let task = Arc::new(Self {
            future: Mutex::new(Some(fut)),
            state: Mutex::new(TaskState::Pending),
            name: name.to_string(),
            join_tx: Mutex::new(Some(tx)),
        });
        let join_handle = JoinHandle { join_rx: rx, awaited_task: task.clone() };
        (task, join_handle)
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn cancel(&self) {
        // set state to Cancelled, the executor drops the Task without execution on wake
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = TaskState::Cancelled;
        // release the future (and whatever it captured) unless it is currently being polled
        if let Ok(mut slot) = self.future.try_lock() {
            slot.take();
        }
        self.join_tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
    pub fn is_finished(&self) -> bool {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) != TaskState::Pending
    }
}

impl ArcWake for Task {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        schedule_task(arc_self.clone());
    }
}

pub struct JoinHandle {
    awaited_task: Arc<Task>,
    join_rx: oneshot::Receiver<TbResult>,
}

impl JoinHandle {
    pub fn task(&self) -> &Arc<Task> {
        &self.awaited_task
    }
    pub fn cancel(&self) {
        self.awaited_task.cancel();
    }
    pub fn is_finished(&self) -> bool {
        self.awaited_task.is_finished()
    }
}

impl Future for JoinHandle {
    type Output = TbResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.join_rx.poll_unpin(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // sender dropped without a result: the task was cancelled
            Poll::Ready(Err(_)) => Poll::Ready(Err(TbError::TaskCancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}
