use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use crate::obj::TbObj;

/// Unbounded FIFO shared between tasks. `pop` suspends the calling task until an
/// item is available.
pub struct Fifo<T>(TbObj<FifoInner<T>>);

struct FifoInner<T> {
    items: VecDeque<T>,
    waiters: Vec<Waker>,
}

impl<T> Clone for Fifo<T> {
    fn clone(&self) -> Self {
        Fifo(self.0.clone())
    }
}

impl<T> Default for Fifo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Fifo<T> {
    pub fn new() -> Self {
        Fifo(TbObj::new(FifoInner {
            items: VecDeque::new(),
            waiters: Vec::new(),
        }))
    }

    pub fn push(&self, item: T) {
        let waiters = self.0.with_mut(|f| {
            f.items.push_back(item);
            std::mem::take(&mut f.waiters)
        });
        for waker in waiters {
            waker.wake();
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.0.with_mut(|f| f.items.pop_front())
    }

    pub fn pop(&self) -> Pop<T> {
        Pop { fifo: self.clone() }
    }

    pub fn len(&self) -> usize {
        self.0.get().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

}

pub struct Pop<T> {
    fifo: Fifo<T>,
}

impl<T> Future for Pop<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        self.fifo.0.with_mut(|f| match f.items.pop_front() {
            Some(item) => Poll::Ready(item),
            None => {
                // re-polls by the same task must not pile up wakers
                if !f.waiters.iter().any(|w| w.will_wake(cx.waker())) {
                    f.waiters.push(cx.waker().clone());
                }
                Poll::Pending
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{self, Task};
    use crate::obj::TbObj;
    use crate::value::Val;

    #[test]
    fn pop_waits_for_push() {
        executor::clear_ready_queue();
        let fifo = Fifo::new();
        let got = TbObj::new(Vec::new());
        let (f, g) = (fifo.clone(), got.clone());
        Task::fork(async move {
            for _ in 0..2 {
                let v: u32 = f.pop().await;
                g.with_mut(|g| g.push(v));
            }
            Ok(Val::None)
        });
        executor::run_once();
        assert!(got.get().is_empty());

        let f = fifo.clone();
        Task::fork(async move {
            f.push(7);
            f.push(9);
            Ok(Val::None)
        });
        executor::run_once();
        assert_eq!(*got.get(), vec![7, 9]);
        assert!(fifo.is_empty());
    }

    #[test]
    fn repolling_keeps_one_waker() {
        let fifo: Fifo<u8> = Fifo::new();
        let mut pop = fifo.pop();
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        for _ in 0..10 {
            assert_eq!(Pin::new(&mut pop).poll(&mut cx), Poll::Pending);
        }
        assert_eq!(fifo.0.get().waiters.len(), 1);
        fifo.push(3);
        assert_eq!(Pin::new(&mut pop).poll(&mut cx), Poll::Ready(3));
        assert!(fifo.0.get().waiters.is_empty());
    }

    #[test]
    fn try_pop_preserves_order() {
        let fifo = Fifo::new();
        fifo.push('a');
        fifo.push('b');
        assert_eq!(fifo.len(), 2);
        assert_eq!(fifo.try_pop(), Some('a'));
        assert_eq!(fifo.try_pop(), Some('b'));
        assert_eq!(fifo.try_pop(), None);
    }
}
