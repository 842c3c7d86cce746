//! The cooperative scheduler: delegates register with declared dependencies,
//! `initialize` resolves them into a priority order via a depth-first
//! topological sort (detecting cycles), and `execute` runs one tick of
//! ready delegates in that order.

pub mod delegate;
pub mod sentinel;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

pub use delegate::{AvailableTasks, Delegate, DelegateId, OnExecute};
pub use sentinel::Sentinel;

use crate::error::{Error, Result};

pub struct Service {
    delegates: HashMap<DelegateId, Delegate>,
    order: Vec<DelegateId>,
    sentinel: Arc<Sentinel>,
    initialized: bool,
}

impl Service {
    pub fn new() -> Self {
        Self {
            delegates: HashMap::new(),
            order: Vec::new(),
            sentinel: Arc::new(Sentinel::new()),
            initialized: false,
        }
    }

    pub fn sentinel(&self) -> Arc<Sentinel> {
        Arc::clone(&self.sentinel)
    }

    pub fn register(&mut self, delegate: Delegate) {
        self.delegates.insert(delegate.id.clone(), delegate);
        self.initialized = false;
    }

    pub fn get_delegate(&self, id: &DelegateId) -> Option<&Delegate> {
        self.delegates.get(id)
    }

    /// Resolves dependencies into a priority order. Idempotent: may be
    /// called again after a prior successful run without spuriously
    /// detecting a cycle from stale state, and drops any delegate marked
    /// `delist`ed since the last run.
    pub fn initialize(&mut self) -> Result<()> {
        self.delegates.retain(|_, delegate| !delegate.delisted);

        let mut resolved: HashSet<DelegateId> = HashSet::new();
        let mut order: Vec<DelegateId> = Vec::new();
        let mut priority: HashMap<DelegateId, usize> = HashMap::new();

        let ids: Vec<DelegateId> = self.delegates.keys().cloned().collect();
        for id in ids {
            let mut unresolved = HashSet::new();
            self.resolve(&id, &mut resolved, &mut unresolved, &mut order, &mut priority)?;
        }

        for (id, p) in &priority {
            if let Some(delegate) = self.delegates.get_mut(id) {
                delegate.priority = *p;
            }
        }
        order.sort_by_key(|id| priority.get(id).copied().unwrap_or(0));
        self.order = order;
        self.initialized = true;
        Ok(())
    }

    fn resolve(
        &self,
        id: &DelegateId,
        resolved: &mut HashSet<DelegateId>,
        unresolved: &mut HashSet<DelegateId>,
        order: &mut Vec<DelegateId>,
        priority: &mut HashMap<DelegateId, usize>,
    ) -> Result<usize> {
        if let Some(p) = priority.get(id) {
            return Ok(*p);
        }
        if unresolved.contains(id) {
            return Err(Error::Conflict(format!("dependency cycle detected at delegate {id}")));
        }
        let Some(delegate) = self.delegates.get(id) else {
            return Err(Error::NotFound(format!("delegate {id} has no registration")));
        };

        unresolved.insert(id.clone());
        let mut max_dependency_priority = 0usize;
        for dependency in &delegate.dependencies {
            let dependency_priority =
                self.resolve(dependency, resolved, unresolved, order, priority)?;
            max_dependency_priority = max_dependency_priority.max(dependency_priority + 1);
        }
        unresolved.remove(id);
        resolved.insert(id.clone());
        order.push(id.clone());
        priority.insert(id.clone(), max_dependency_priority);
        Ok(max_dependency_priority)
    }

    /// Runs one tick: every delegate with available work, in priority order.
    /// Delegates with nothing pending are skipped entirely. Returns the
    /// total number of tasks executed.
    pub fn execute(&mut self) -> Result<usize> {
        if !self.initialized {
            return Err(Error::NotStarted);
        }
        let mut total = 0;
        for id in self.order.clone() {
            if let Some(delegate) = self.delegates.get_mut(&id) {
                if delegate.has_pending() {
                    total += delegate.execute();
                }
            }
        }
        self.sentinel.notify_task_completed(total);
        Ok(total)
    }

    /// Blocks until work is available (or `timeout` elapses) and runs one tick.
    pub fn await_and_execute(&mut self, timeout: Duration) -> Result<usize> {
        if self.sentinel.await_task(timeout) {
            self.execute()
        } else {
            Ok(0)
        }
    }

    pub fn priority_order(&self) -> &[DelegateId] {
        &self.order
    }
}

impl Default for Service {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_delegate(id: &str, counter: Arc<AtomicUsize>) -> Delegate {
        Delegate::recurring(DelegateId::new(id), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            1
        })
    }

    #[test]
    fn dependent_delegates_run_after_their_dependencies() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut service = Service::new();

        let a_log = Arc::clone(&log);
        service.register(Delegate::recurring(DelegateId::new("a"), move || {
            a_log.lock().unwrap().push("a");
            1
        }));
        let b_log = Arc::clone(&log);
        service.register(
            Delegate::recurring(DelegateId::new("b"), move || {
                b_log.lock().unwrap().push("b");
                1
            })
            .depends_on(DelegateId::new("a")),
        );

        service.initialize().unwrap();
        service.execute().unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.as_slice(), ["a", "b"]);
    }

    #[test]
    fn cyclic_dependencies_are_rejected() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut service = Service::new();
        service.register(
            counting_delegate("a", Arc::clone(&counter)).depends_on(DelegateId::new("b")),
        );
        service.register(
            counting_delegate("b", Arc::clone(&counter)).depends_on(DelegateId::new("a")),
        );
        assert!(service.initialize().is_err());
    }

    #[test]
    fn reinitializing_after_delist_drops_the_delegate() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut service = Service::new();
        service.register(counting_delegate("a", Arc::clone(&counter)));
        service.initialize().unwrap();
        assert_eq!(service.priority_order().len(), 1);

        if let Some(delegate) = service.delegates.get_mut(&DelegateId::new("a")) {
            delegate.delist();
        }
        service.initialize().unwrap();
        assert!(service.priority_order().is_empty());
    }

    #[test]
    fn reinitializing_twice_does_not_spuriously_detect_a_cycle() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut service = Service::new();
        service.register(counting_delegate("a", Arc::clone(&counter)));
        service.initialize().unwrap();
        service.initialize().unwrap();
        assert_eq!(service.priority_order().len(), 1);
    }

    #[test]
    fn a_delegate_with_nothing_pending_is_skipped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        let mut service = Service::new();
        let delegate = Delegate::new(
            DelegateId::new("a"),
            Box::new(move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                1
            }),
        );
        let available = delegate.available_tasks();
        service.register(delegate);
        service.initialize().unwrap();

        assert_eq!(service.execute().unwrap(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        available.mark_available(1);
        assert_eq!(service.execute().unwrap(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
