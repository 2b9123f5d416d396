// ============================================================================
// QSBR – quiescent-state-based reclamation of retired store entries
// ============================================================================
//
// Reader threads register a context and periodically report that they are
// between operations. Anything retired by a writer is kept alive until every
// registered context has reported a quiescent state twice: once to close the
// interval the object was retired in, once more for a full interval after
// that. Only then can no reader still be inside an operation that started
// before the retirement.

use std::sync::Arc;

use parking_lot::Mutex;

type Action = Box<dyn FnOnce() + Send>;

#[derive(Clone, Copy, Debug, Default)]
struct ContextStatus {
    in_use: bool,
    was_idle: bool,
}

#[derive(Default)]
struct QsbrState {
    contexts: Vec<ContextStatus>,
    free_indices: Vec<usize>,
    num_contexts: usize,
    /// Contexts that still have to pass a quiescent point this interval.
    remaining: usize,
    /// Retired during the current interval.
    deferred: Vec<Action>,
    /// Retired during the previous interval; run when this one completes.
    pending: Vec<Action>,
}

impl QsbrState {
    /// Close the current interval. Returns the actions that are now safe to run.
    fn on_all_quiescent_states_passed(&mut self) -> Vec<Action> {
        let ready = std::mem::take(&mut self.pending);
        self.pending = std::mem::take(&mut self.deferred);
        self.remaining = self.num_contexts;
        for status in self.contexts.iter_mut() {
            if status.in_use {
                status.was_idle = false;
            }
        }
        ready
    }

    fn mark_quiescent(&mut self, index: usize) -> Vec<Action> {
        let Some(status) = self.contexts.get_mut(index) else {
            return Vec::new();
        };
        if !status.in_use || status.was_idle {
            return Vec::new();
        }
        status.was_idle = true;
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.on_all_quiescent_states_passed()
        } else {
            Vec::new()
        }
    }
}

/// Registry of reader contexts plus the queue of deferred reclamations.
#[derive(Default)]
pub struct Qsbr {
    state: Mutex<QsbrState>,
}

/// Identifies a registered reader context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextId(usize);

impl Qsbr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reader. The new context starts "busy": it must report a
    /// quiescent state before the current interval can close.
    pub fn register(&self) -> ContextId {
        let mut s = self.state.lock();
        let index = match s.free_indices.pop() {
            Some(i) => i,
            None => {
                s.contexts.push(ContextStatus::default());
                s.contexts.len() - 1
            }
        };
        s.contexts[index] = ContextStatus { in_use: true, was_idle: false };
        s.num_contexts += 1;
        s.remaining += 1;
        ContextId(index)
    }

    /// Remove a reader. Counts as a final quiescent state.
    pub fn unregister(&self, id: ContextId) {
        let ready = {
            let mut s = self.state.lock();
            let mut ready = s.mark_quiescent(id.0);
            if let Some(status) = s.contexts.get_mut(id.0)
                && status.in_use
            {
                // Still expected in the current interval if a new one was
                // opened by the mark above.
                let counted = !status.was_idle;
                *status = ContextStatus::default();
                s.num_contexts -= 1;
                s.free_indices.push(id.0);
                if counted {
                    s.remaining = s.remaining.saturating_sub(1);
                    if s.remaining == 0 && s.num_contexts > 0 {
                        ready.append(&mut s.on_all_quiescent_states_passed());
                    }
                }
                if s.num_contexts == 0 {
                    // Nobody left who could observe retired state.
                    let mut rest = std::mem::take(&mut s.pending);
                    rest.append(&mut s.deferred);
                    ready.append(&mut rest);
                    s.remaining = 0;
                }
            }
            ready
        };
        run(ready);
    }

    /// Report that the reader `id` holds no references obtained before this
    /// call. May run reclamations that became safe.
    pub fn quiescent(&self, id: ContextId) {
        let ready = self.state.lock().mark_quiescent(id.0);
        run(ready);
    }

    /// Defer `action` until no registered reader can observe the state it
    /// cleans up. Without registered readers it runs immediately.
    pub fn enqueue(&self, action: impl FnOnce() + Send + 'static) {
        let mut s = self.state.lock();
        if s.num_contexts == 0 {
            drop(s);
            action();
            return;
        }
        s.deferred.push(Box::new(action));
    }

    /// Run every deferred action now, as if all readers were quiescent at
    /// once. Intended for shutdown and test teardown.
    pub fn flush(&self) {
        let ready = {
            let mut s = self.state.lock();
            let mut ready = std::mem::take(&mut s.pending);
            ready.append(&mut s.deferred);
            ready
        };
        if !ready.is_empty() {
            log::debug!("qsbr: flushing {} deferred reclamations", ready.len());
        }
        run(ready);
    }

    /// Number of actions waiting to run.
    pub fn pending_len(&self) -> usize {
        let s = self.state.lock();
        s.deferred.len() + s.pending.len()
    }

    pub fn registered_contexts(&self) -> usize {
        self.state.lock().num_contexts
    }
}

impl Drop for Qsbr {
    fn drop(&mut self) {
        self.flush();
    }
}

fn run(actions: Vec<Action>) {
    for action in actions {
        action();
    }
}

/// RAII registration of one reader thread. Dropping it unregisters.
pub struct ReaderContext {
    qsbr: Arc<Qsbr>,
    id: ContextId,
}

impl ReaderContext {
    pub fn new(qsbr: Arc<Qsbr>) -> Self {
        let id = qsbr.register();
        Self { qsbr, id }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// This thread is between operations.
    pub fn quiescent(&self) {
        self.qsbr.quiescent(self.id);
    }
}

impl Drop for ReaderContext {
    fn drop(&mut self) {
        self.qsbr.unregister(self.id);
    }
}
