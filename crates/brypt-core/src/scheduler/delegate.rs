//! `Delegate` — a unit of scheduled work, gated by its own pending-task
//! counter so a tick only invokes delegates that actually have work.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A type-erased identity for a delegate. The scheduler only needs to
/// compare and hash these; subsystems use any stable string (a type name,
/// a peer identifier) as their delegate's identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DelegateId(pub String);

impl DelegateId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for DelegateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The callback invoked when a delegate's available-task counter goes
/// positive and the scheduler reaches its turn in priority order. Returns
/// the number of tasks it actually executed (it may run fewer than were
/// signaled available; unexecuted tasks remain pending for the next tick).
pub type OnExecute = Box<dyn FnMut() -> usize + Send>;

/// A cloneable handle a delegate's producer uses to signal new available
/// work without holding a mutable reference to the delegate itself.
#[derive(Clone)]
pub struct AvailableTasks(Arc<AtomicUsize>);

impl AvailableTasks {
    fn new() -> Self {
        Self(Arc::new(AtomicUsize::new(0)))
    }

    /// Signals that `count` more tasks are ready for this delegate.
    pub fn mark_available(&self, count: usize) {
        self.0.fetch_add(count, Ordering::SeqCst);
    }

    pub fn available(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn take_all(&self) -> usize {
        self.0.swap(0, Ordering::SeqCst)
    }

    fn return_unexecuted(&self, count: usize) {
        if count > 0 {
            self.0.fetch_add(count, Ordering::SeqCst);
        }
    }
}

/// A single registered unit of work inside a `Service`.
pub struct Delegate {
    pub(super) id: DelegateId,
    pub(super) dependencies: HashSet<DelegateId>,
    pub(super) priority: usize,
    pub(super) delisted: bool,
    pub(super) on_execute: OnExecute,
    pub(super) available: AvailableTasks,
}

impl Delegate {
    fn with_tasks(id: DelegateId, on_execute: OnExecute, available: AvailableTasks) -> Self {
        Self { id, dependencies: HashSet::new(), priority: 0, delisted: false, on_execute, available }
    }

    /// Builds a delegate whose work only runs once its `available_tasks`
    /// handle is signaled, for work driven by an external producer (an
    /// incoming message, a completed I/O operation).
    pub fn new(id: DelegateId, on_execute: OnExecute) -> Self {
        Self::with_tasks(id, on_execute, AvailableTasks::new())
    }

    /// Builds a delegate whose work is always pending: invoked every tick
    /// regardless of any producer signaling it, re-arming itself after each
    /// run. For housekeeping delegates with no natural "task available"
    /// event of their own (tracker sweeps, deferred detachment).
    pub fn recurring(id: DelegateId, mut on_execute: impl FnMut() -> usize + Send + 'static) -> Self {
        let available = AvailableTasks::new();
        available.mark_available(1);
        let rearm = available.clone();
        let wrapped: OnExecute = Box::new(move || {
            let completed = on_execute();
            rearm.mark_available(1);
            completed
        });
        Self::with_tasks(id, wrapped, available)
    }

    /// A cloneable handle this delegate's producer can use to signal new
    /// available work from outside the scheduler.
    pub fn available_tasks(&self) -> AvailableTasks {
        self.available.clone()
    }

    /// Declares that this delegate's work must run after `other` on any
    /// tick where both have available tasks.
    pub fn depends_on(mut self, other: DelegateId) -> Self {
        self.dependencies.insert(other);
        self
    }

    pub fn id(&self) -> &DelegateId {
        &self.id
    }

    pub fn priority(&self) -> usize {
        self.priority
    }

    /// Marks the delegate for removal on the scheduler's next `initialize`.
    pub fn delist(&mut self) {
        self.delisted = true;
    }

    pub(super) fn has_pending(&self) -> bool {
        self.available.available() > 0
    }

    pub(super) fn execute(&mut self) -> usize {
        let pending = self.available.take_all();
        if pending == 0 {
            return 0;
        }
        let completed = (self.on_execute)();
        self.available.return_unexecuted(pending.saturating_sub(completed));
        completed
    }
}

impl std::fmt::Debug for Delegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delegate")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("priority", &self.priority)
            .field("delisted", &self.delisted)
            .field("pending", &self.available.available())
            .finish()
    }
}
