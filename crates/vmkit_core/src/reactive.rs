//! Observable substrate
//!
//! A small single-threaded reactive graph that gives the view-model layer
//! the three capabilities it needs from a reactive-state library:
//!
//! - **Mutable cells** ([`Observable<T>`]) whose reads are tracked and whose
//!   writes notify dependents, optionally gated by an equality
//! - **Transactions** ([`ReactiveGraph::transaction`]) that defer reactions
//!   until the outermost transaction ends, so observers never see a half
//!   applied update
//! - **Memoized derivations** ([`Computed<T>`]) that only notify dependents
//!   when their value changes under a chosen equality
//!
//! Effects ([`ReactiveGraph::effect`]) re-run whenever a cell they read
//! changes. An effect that writes a cell it reads is re-scheduled; a flush
//! gives up after [`MAX_REACTION_RUNS`] runs and drops the pending queue.
//!
//! ```ignore
//! let graph = ReactiveGraph::new();
//! let count = graph.cell(1);
//! let doubled = graph.computed({
//!     let count = count.clone();
//!     move || count.get() * 2
//! }, |a, b| a == b);
//!
//! let _log = graph.effect({
//!     let doubled = doubled.clone();
//!     move || println!("doubled = {}", doubled.get())
//! });
//!
//! graph.transaction(|| {
//!     count.set(2);
//!     count.set(3);
//! }); // effect prints once: "doubled = 6"
//! ```

use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

new_key_type! {
    /// Unique identifier for an observable cell
    pub struct CellId;
    /// Unique identifier for a reaction (memo or effect)
    pub struct ReactionId;
}

/// Reaction runs allowed in a single flush before it is abandoned
pub const MAX_REACTION_RUNS: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReactionKind {
    /// Recomputes a derived cell; runs before effects
    Memo,
    Effect,
}

/// Internal cell bookkeeping; the value itself lives in the handle
struct CellNode {
    version: u64,
    observers: SmallVec<[ReactionId; 4]>,
}

struct ReactionNode {
    kind: ReactionKind,
    run: Rc<RefCell<dyn FnMut()>>,
    /// Cells read during the last run
    dependencies: SmallVec<[CellId; 4]>,
    /// Queued for the current or next flush
    scheduled: bool,
}

#[derive(Default)]
struct Graph {
    cells: SlotMap<CellId, CellNode>,
    reactions: SlotMap<ReactionId, ReactionNode>,
    pending_memos: VecDeque<ReactionId>,
    pending_effects: VecDeque<ReactionId>,
    /// Current transaction depth (> 0 means reactions are deferred)
    batch_depth: u32,
    flushing: bool,
    /// Dependency frames; `None` marks an untracked section
    tracking: Vec<Option<SmallVec<[CellId; 8]>>>,
    global_version: u64,
    abandoned_flushes: u64,
}

impl Graph {
    fn schedule(&mut self, id: ReactionId) {
        if let Some(node) = self.reactions.get_mut(id) {
            if !node.scheduled {
                node.scheduled = true;
                match node.kind {
                    ReactionKind::Memo => self.pending_memos.push_back(id),
                    ReactionKind::Effect => self.pending_effects.push_back(id),
                }
            }
        }
    }

    fn next_pending(&mut self) -> Option<ReactionId> {
        self.pending_memos
            .pop_front()
            .or_else(|| self.pending_effects.pop_front())
    }

    fn should_flush(&self) -> bool {
        self.batch_depth == 0 && !self.flushing
    }
}

/// Shared handle to a reactive graph (cheap to clone)
#[derive(Clone, Default)]
pub struct ReactiveGraph {
    inner: Rc<RefCell<Graph>>,
}

impl ReactiveGraph {
    /// Create a new reactive graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether two handles point at the same graph
    pub fn ptr_eq(&self, other: &ReactiveGraph) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // =========================================================================
    // CELLS
    // =========================================================================

    /// Create a cell that notifies on every write
    pub fn cell<T: 'static>(&self, initial: T) -> Observable<T> {
        Observable::new(self, initial, None, true)
    }

    /// Create a cell that skips notification when `equals(old, new)` holds
    pub fn cell_with_equality<T: 'static>(
        &self,
        initial: T,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Observable<T> {
        Observable::new(self, initial, Some(Rc::new(equals)), true)
    }

    /// Create a plain cell: reads are not tracked, writes notify nobody
    pub fn plain_cell<T: 'static>(&self, initial: T) -> Observable<T> {
        Observable::new(self, initial, None, false)
    }

    fn register_cell(&self) -> CellId {
        self.inner.borrow_mut().cells.insert(CellNode {
            version: 0,
            observers: SmallVec::new(),
        })
    }

    fn report_read(&self, id: CellId) {
        let mut graph = self.inner.borrow_mut();
        if let Some(Some(frame)) = graph.tracking.last_mut() {
            if !frame.contains(&id) {
                frame.push(id);
            }
        }
    }

    fn report_write(&self, id: CellId) {
        let flush = {
            let mut graph = self.inner.borrow_mut();
            let graph = &mut *graph;
            let Some(node) = graph.cells.get_mut(id) else {
                return;
            };
            node.version += 1;
            let observers = node.observers.clone();
            graph.global_version += 1;
            for observer in observers {
                graph.schedule(observer);
            }
            graph.should_flush()
        };

        if flush {
            self.flush();
        }
    }

    /// Version of a cell (for change detection)
    pub fn cell_version(&self, id: CellId) -> Option<u64> {
        self.inner.borrow().cells.get(id).map(|node| node.version)
    }

    // =========================================================================
    // TRANSACTIONS
    // =========================================================================

    /// Run `f` as one atomic update
    ///
    /// Reactions scheduled inside `f` run once, after the outermost
    /// transaction returns.
    pub fn transaction<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.borrow_mut().batch_depth += 1;
        let result = f();
        let flush = {
            let mut graph = self.inner.borrow_mut();
            graph.batch_depth -= 1;
            graph.should_flush()
        };
        if flush {
            self.flush();
        }
        result
    }

    /// Run `f` without recording the cells it reads
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.borrow_mut().tracking.push(None);
        let result = f();
        self.inner.borrow_mut().tracking.pop();
        result
    }

    /// Whether a transaction is currently open
    pub fn in_transaction(&self) -> bool {
        self.inner.borrow().batch_depth > 0
    }

    // =========================================================================
    // DERIVATIONS
    // =========================================================================

    /// Create a memoized derivation
    ///
    /// `compute` runs immediately and again whenever a cell it read changes.
    /// Dependents are notified only when `equals(old, new)` is false.
    pub fn computed<T: 'static>(
        &self,
        compute: impl Fn() -> T + 'static,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Computed<T> {
        self.inner.borrow_mut().tracking.push(Some(SmallVec::new()));
        let initial = compute();
        let deps = self.pop_frame();

        let cell = self.cell_with_equality(initial, equals);
        let target = Rc::downgrade(&cell.handle);
        let id = self.insert_reaction(ReactionKind::Memo, move || {
            if let Some(handle) = target.upgrade() {
                Observable { handle }.set(compute());
            }
        });
        self.resubscribe(id, deps);

        Computed {
            cell,
            _reaction: Rc::new(ReactionGuard {
                id,
                graph: self.clone(),
            }),
        }
    }

    // =========================================================================
    // EFFECTS
    // =========================================================================

    /// Create an effect that runs now and whenever its dependencies change
    ///
    /// The effect lives until the returned handle is dropped or disposed.
    pub fn effect(&self, run: impl FnMut() + 'static) -> EffectHandle {
        let id = self.insert_reaction(ReactionKind::Effect, run);
        let flush = {
            let mut graph = self.inner.borrow_mut();
            graph.schedule(id);
            graph.should_flush()
        };
        if flush {
            self.flush();
        }
        EffectHandle {
            guard: ReactionGuard {
                id,
                graph: self.clone(),
            },
        }
    }

    // =========================================================================
    // INTERNAL
    // =========================================================================

    fn insert_reaction(&self, kind: ReactionKind, run: impl FnMut() + 'static) -> ReactionId {
        let run: Rc<RefCell<dyn FnMut()>> = Rc::new(RefCell::new(run));
        self.inner.borrow_mut().reactions.insert(ReactionNode {
            kind,
            run,
            dependencies: SmallVec::new(),
            scheduled: false,
        })
    }

    fn dispose_reaction(&self, id: ReactionId) {
        let removed = {
            let mut graph = self.inner.borrow_mut();
            let graph = &mut *graph;
            let removed = graph.reactions.remove(id);
            if let Some(node) = &removed {
                for dep in &node.dependencies {
                    if let Some(cell) = graph.cells.get_mut(*dep) {
                        cell.observers.retain(|o| *o != id);
                    }
                }
            }
            removed
        };
        // The closure may own cells whose drop touches the graph
        drop(removed);
    }

    fn pop_frame(&self) -> SmallVec<[CellId; 8]> {
        self.inner
            .borrow_mut()
            .tracking
            .pop()
            .flatten()
            .unwrap_or_default()
    }

    fn resubscribe(&self, id: ReactionId, deps: SmallVec<[CellId; 8]>) {
        let mut graph = self.inner.borrow_mut();
        let graph = &mut *graph;
        let Some(node) = graph.reactions.get_mut(id) else {
            return;
        };
        let old = std::mem::replace(&mut node.dependencies, deps.iter().copied().collect());

        for dep in old {
            if let Some(cell) = graph.cells.get_mut(dep) {
                cell.observers.retain(|o| *o != id);
            }
        }
        for dep in deps {
            if let Some(cell) = graph.cells.get_mut(dep) {
                if !cell.observers.contains(&id) {
                    cell.observers.push(id);
                }
            }
        }
    }

    /// Run pending reactions until the queues are empty
    fn flush(&self) {
        self.inner.borrow_mut().flushing = true;

        let mut runs = 0usize;
        loop {
            let Some(id) = self.inner.borrow_mut().next_pending() else {
                break;
            };
            runs += 1;
            if runs > MAX_REACTION_RUNS {
                self.abandon_flush(id);
                break;
            }
            self.run_reaction(id);
        }

        self.inner.borrow_mut().flushing = false;
    }

    fn abandon_flush(&self, current: ReactionId) {
        let mut graph = self.inner.borrow_mut();
        let graph = &mut *graph;
        graph.abandoned_flushes += 1;
        let dropped: Vec<ReactionId> = std::iter::once(current)
            .chain(graph.pending_memos.drain(..))
            .chain(graph.pending_effects.drain(..))
            .collect();
        for id in &dropped {
            if let Some(node) = graph.reactions.get_mut(*id) {
                node.scheduled = false;
            }
        }
        tracing::error!(
            max_runs = MAX_REACTION_RUNS,
            dropped = dropped.len(),
            "reactions did not settle; abandoning flush"
        );
    }

    fn run_reaction(&self, id: ReactionId) {
        let run = {
            let mut graph = self.inner.borrow_mut();
            let Some(node) = graph.reactions.get_mut(id) else {
                return;
            };
            node.scheduled = false;
            node.run.clone()
        };

        self.inner.borrow_mut().tracking.push(Some(SmallVec::new()));
        {
            let mut run = run.borrow_mut();
            (&mut *run)();
        }
        let deps = self.pop_frame();
        self.resubscribe(id, deps);
    }

    /// Get statistics about the reactive graph
    pub fn stats(&self) -> ReactiveStats {
        let graph = self.inner.borrow();
        ReactiveStats {
            cell_count: graph.cells.len(),
            reaction_count: graph.reactions.len(),
            pending_reactions: graph.pending_memos.len() + graph.pending_effects.len(),
            global_version: graph.global_version,
            abandoned_flushes: graph.abandoned_flushes,
        }
    }
}

impl fmt::Debug for ReactiveGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReactiveGraph").field(&self.stats()).finish()
    }
}

/// Statistics about the reactive graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactiveStats {
    pub cell_count: usize,
    pub reaction_count: usize,
    pub pending_reactions: usize,
    pub global_version: u64,
    /// Flushes stopped by the runaway guard
    pub abandoned_flushes: u64,
}

// =============================================================================
// OBSERVABLE
// =============================================================================

type Equality<T> = Rc<dyn Fn(&T, &T) -> bool>;

struct CellHandle<T> {
    id: CellId,
    value: RefCell<T>,
    graph: ReactiveGraph,
    equals: Option<Equality<T>>,
    tracked: bool,
}

impl<T> Drop for CellHandle<T> {
    fn drop(&mut self) {
        // A busy graph keeps the slot until the graph itself is dropped
        if let Ok(mut graph) = self.graph.inner.try_borrow_mut() {
            graph.cells.remove(self.id);
        }
    }
}

/// A reactive mutable cell (cheap to clone, clones share the value)
pub struct Observable<T> {
    handle: Rc<CellHandle<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
        }
    }
}

impl<T: 'static> Observable<T> {
    fn new(
        graph: &ReactiveGraph,
        initial: T,
        equals: Option<Equality<T>>,
        tracked: bool,
    ) -> Self {
        Self {
            handle: Rc::new(CellHandle {
                id: graph.register_cell(),
                value: RefCell::new(initial),
                graph: graph.clone(),
                equals,
                tracked,
            }),
        }
    }

    /// Get the cell's internal ID
    pub fn id(&self) -> CellId {
        self.handle.id
    }

    /// Read through a closure, recording a dependency
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.handle.value.borrow())
    }

    /// Record a dependency without reading
    pub fn track(&self) {
        if self.handle.tracked {
            self.handle.graph.report_read(self.handle.id);
        }
    }

    /// Replace the value
    ///
    /// Returns `false` when the cell's equality reported the new value as
    /// unchanged; nothing is notified in that case.
    pub fn set(&self, value: T) -> bool {
        if let Some(equals) = &self.handle.equals {
            if equals(&self.handle.value.borrow(), &value) {
                return false;
            }
        }
        let old = self.handle.value.replace(value);
        drop(old);
        if self.handle.tracked {
            self.handle.graph.report_write(self.handle.id);
        }
        true
    }

    /// Mutate the value in place; always notifies
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.handle.value.borrow_mut());
        if self.handle.tracked {
            self.handle.graph.report_write(self.handle.id);
        }
    }
}

impl<T: Clone + 'static> Observable<T> {
    /// Get the current value, recording a dependency
    pub fn get(&self) -> T {
        self.track();
        self.handle.value.borrow().clone()
    }

    /// Get the current value without recording a dependency
    pub fn get_untracked(&self) -> T {
        self.handle.value.borrow().clone()
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Observable")
            .field(&*self.handle.value.borrow())
            .finish()
    }
}

// =============================================================================
// COMPUTED / EFFECT HANDLES
// =============================================================================

/// Disposes a reaction when dropped
struct ReactionGuard {
    id: ReactionId,
    graph: ReactiveGraph,
}

impl Drop for ReactionGuard {
    fn drop(&mut self) {
        if self.graph.inner.try_borrow_mut().is_ok() {
            self.graph.dispose_reaction(self.id);
        }
    }
}

/// A memoized derived value (cheap to clone, clones share the memo)
pub struct Computed<T> {
    cell: Observable<T>,
    _reaction: Rc<ReactionGuard>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            _reaction: self._reaction.clone(),
        }
    }
}

impl<T: Clone + 'static> Computed<T> {
    /// Current value, recording a dependency on the derivation
    pub fn get(&self) -> T {
        self.cell.get()
    }

    pub fn get_untracked(&self) -> T {
        self.cell.get_untracked()
    }

    /// Cell id dependents subscribe to
    pub fn id(&self) -> CellId {
        self.cell.id()
    }
}

/// Keeps an effect alive; dropping it disposes the effect
pub struct EffectHandle {
    guard: ReactionGuard,
}

impl EffectHandle {
    pub fn id(&self) -> ReactionId {
        self.guard.id
    }

    /// Stop the effect now
    pub fn dispose(self) {}
}

/// A weak reference to a cell, used to break graph-to-cell cycles
pub struct WeakObservable<T> {
    handle: Weak<CellHandle<T>>,
}

impl<T> Observable<T> {
    pub fn downgrade(&self) -> WeakObservable<T> {
        WeakObservable {
            handle: Rc::downgrade(&self.handle),
        }
    }
}

impl<T> WeakObservable<T> {
    pub fn upgrade(&self) -> Option<Observable<T>> {
        self.handle.upgrade().map(|handle| Observable { handle })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_cell_create_get_set() {
        let graph = ReactiveGraph::new();

        let count = graph.cell(0i32);
        assert_eq!(count.get(), 0);

        count.set(42);
        assert_eq!(count.get(), 42);
        assert_eq!(graph.cell_version(count.id()), Some(1));
    }

    #[test]
    fn test_cell_update() {
        let graph = ReactiveGraph::new();

        let items = graph.cell(vec![1]);
        items.update(|v| v.push(2));
        assert_eq!(items.get(), vec![1, 2]);
    }

    #[test]
    fn test_computed_basic() {
        let graph = ReactiveGraph::new();

        let count = graph.cell(5i32);
        let doubled = graph.computed(
            {
                let count = count.clone();
                move || count.get() * 2
            },
            |a, b| a == b,
        );

        assert_eq!(doubled.get(), 10);

        count.set(7);
        assert_eq!(doubled.get(), 14);
    }

    #[test]
    fn test_computed_caching() {
        let graph = ReactiveGraph::new();
        let computes = Rc::new(Cell::new(0));

        let count = graph.cell(5i32);
        let doubled = graph.computed(
            {
                let count = count.clone();
                let computes = computes.clone();
                move || {
                    computes.set(computes.get() + 1);
                    count.get() * 2
                }
            },
            |a, b| a == b,
        );

        // First computation happens at creation
        assert_eq!(doubled.get(), 10);
        assert_eq!(computes.get(), 1);

        // Reads use the cache
        assert_eq!(doubled.get(), 10);
        assert_eq!(computes.get(), 1);

        // Source change recomputes
        count.set(7);
        assert_eq!(doubled.get(), 14);
        assert_eq!(computes.get(), 2);
    }

    #[test]
    fn test_computed_equality_suppresses_dependents() {
        let graph = ReactiveGraph::new();
        let runs = Rc::new(Cell::new(0));

        let count = graph.cell(3i32);
        let parity = graph.computed(
            {
                let count = count.clone();
                move || count.get() % 2
            },
            |a, b| a == b,
        );
        let _effect = graph.effect({
            let runs = runs.clone();
            move || {
                let _ = parity.get();
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(runs.get(), 1);

        // Parity unchanged
        count.set(5);
        assert_eq!(runs.get(), 1);

        count.set(6);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_effect_runs_on_change() {
        let graph = ReactiveGraph::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let count = graph.cell(0i32);
        let _effect = graph.effect({
            let count = count.clone();
            let seen = seen.clone();
            move || seen.borrow_mut().push(count.get())
        });

        // Effect runs immediately
        assert_eq!(*seen.borrow(), vec![0]);

        count.set(1);
        count.set(2);
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_transaction_batches_effects() {
        let graph = ReactiveGraph::new();
        let runs = Rc::new(Cell::new(0));

        let a = graph.cell(1i32);
        let b = graph.cell(2i32);
        let _effect = graph.effect({
            let (a, b, runs) = (a.clone(), b.clone(), runs.clone());
            move || {
                let _ = a.get() + b.get();
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(runs.get(), 1);

        // Without a transaction, effect runs twice
        a.set(10);
        b.set(20);
        assert_eq!(runs.get(), 3);

        // Nested transactions flush once at the outermost end
        graph.transaction(|| {
            a.set(100);
            graph.transaction(|| b.set(200));
            assert_eq!(runs.get(), 3);
        });
        assert_eq!(runs.get(), 4);
    }

    #[test]
    fn test_dispose_effect() {
        let graph = ReactiveGraph::new();
        let runs = Rc::new(Cell::new(0));

        let count = graph.cell(0i32);
        let effect = graph.effect({
            let (count, runs) = (count.clone(), runs.clone());
            move || {
                let _ = count.get();
                runs.set(runs.get() + 1);
            }
        });
        count.set(1);
        assert_eq!(runs.get(), 2);

        effect.dispose();
        count.set(2);
        assert_eq!(runs.get(), 2);
        assert_eq!(graph.stats().reaction_count, 0);
    }

    #[test]
    fn test_equality_gated_cell() {
        let graph = ReactiveGraph::new();
        let runs = Rc::new(Cell::new(0));

        let name = graph.cell_with_equality(String::from("a"), |a, b| a == b);
        let _effect = graph.effect({
            let (name, runs) = (name.clone(), runs.clone());
            move || {
                let _ = name.get();
                runs.set(runs.get() + 1);
            }
        });

        assert!(!name.set("a".into()));
        assert_eq!(runs.get(), 1);
        assert!(name.set("b".into()));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_plain_cell_is_not_tracked() {
        let graph = ReactiveGraph::new();
        let runs = Rc::new(Cell::new(0));

        let plain = graph.plain_cell(0i32);
        let _effect = graph.effect({
            let (plain, runs) = (plain.clone(), runs.clone());
            move || {
                let _ = plain.get();
                runs.set(runs.get() + 1);
            }
        });
        plain.set(1);
        assert_eq!(plain.get_untracked(), 1);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_untracked_reads() {
        let graph = ReactiveGraph::new();
        let runs = Rc::new(Cell::new(0));

        let count = graph.cell(0i32);
        let _effect = graph.effect({
            let (graph, count, runs) = (graph.clone(), count.clone(), runs.clone());
            move || {
                graph.untracked(|| count.get());
                runs.set(runs.get() + 1);
            }
        });
        count.set(1);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_self_feeding_effect_is_abandoned() {
        let graph = ReactiveGraph::new();
        let runs = Rc::new(Cell::new(0usize));

        let count = graph.cell(0u64);
        let _effect = graph.effect({
            let (count, runs) = (count.clone(), runs.clone());
            move || {
                let value = count.get();
                runs.set(runs.get() + 1);
                count.set(value + 1);
            }
        });
        // The first run has no subscription yet, so the loop starts on the
        // next external write
        assert_eq!(runs.get(), 1);

        count.set(100);
        assert_eq!(runs.get(), 1 + MAX_REACTION_RUNS);
        assert_eq!(graph.stats().abandoned_flushes, 1);
        assert_eq!(graph.stats().pending_reactions, 0);
    }

    #[test]
    fn test_dropped_cell_releases_slot() {
        let graph = ReactiveGraph::new();
        {
            let _a = graph.cell(1u8);
            assert_eq!(graph.stats().cell_count, 1);
        }
        assert_eq!(graph.stats().cell_count, 0);
    }
}
