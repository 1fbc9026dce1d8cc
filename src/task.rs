//! Task (spec §3/§4.E): a type-erased closure plus a back-reference to its
//! enclosing finish scope. Grounded on the teacher's `HeapJob`/`HeapTask`
//! pattern (`sched::job`, `multitask::task`): the closure's environment is
//! boxed once at `spawn` time and consumed exactly once on execution.

use std::sync::Arc;

use crate::finish::FinishScope;

/// A single unit of work. Immutable after construction, owned by exactly
/// one deque at a time, consumed when executed.
pub struct Job {
    body: Box<dyn FnOnce() + Send + 'static>,
    finish: Arc<FinishScope>,
}

impl Job {
    pub fn new<F>(finish: Arc<FinishScope>, body: F) -> Job
    where
        F: FnOnce() + Send + 'static,
    {
        Job {
            body: Box::new(body),
            finish,
        }
    }

    #[inline]
    pub fn finish_scope(&self) -> &Arc<FinishScope> {
        &self.finish
    }

    /// Consumes the job. The caller (the worker main loop) is responsible
    /// for setting its "current finish" to `finish_scope()` beforehand and
    /// decrementing that scope's counter afterwards -- this type does not
    /// do either, it only owns the closure.
    #[inline]
    pub fn run(self) {
        (self.body)()
    }
}
