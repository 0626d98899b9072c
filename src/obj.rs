use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// TbObj lets bench components (writers, readers, scoreboards, ...) be shared
// between tasks. The simulation runs on a single thread, so the lock is never
// contended; it is only there to satisfy the Send bound of task futures.
// Guards must never be held across an await.
pub struct TbObj<T>(Arc<Mutex<T>>);

impl<T> TbObj<T> {
    pub fn new(data: T) -> TbObj<T> {
        TbObj(Arc::new(Mutex::new(data)))
    }
    pub fn get(&self) -> MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.get())
    }
}

impl<T> Clone for TbObj<T> {
    fn clone(&self) -> Self {
        TbObj(self.0.clone())
    }
}
