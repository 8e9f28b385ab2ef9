//! View model registry
//!
//! The store tracks every view model that a binding has asked for:
//!
//! - **staged** view models were constructed during a render pass but not
//!   committed yet. They are already discoverable by id, so siblings built in
//!   the same pass can address them.
//! - **live** view models were attached at least once and are reference
//!   counted. The first attach mounts, the last detach unmounts.
//!
//! Mount and unmount work may be asynchronous. The store serializes that
//! work per id: an attach that arrives while the same id is still
//! unmounting waits for the unmount to settle before mounting again.
//!
//! Every mutation runs inside one reactive transaction and bumps a revision
//! cell, so reads such as [`ViewModelStore::get`] and
//! [`ViewModelStore::is_able_to_render_view`] are tracked.
//!
//! # Example
//!
//! ```ignore
//! let store = ViewModelStore::new();
//! let class = ViewModelClass::of::<Counter>();
//!
//! let id = store.generate_id(None, &IdContext::new(class.name()));
//! let vm = store.create_view_model(&class, store.create_params(id, Payload::Null));
//! vm.will_mount();
//! store.mark_staged(&vm);
//!
//! pollster::block_on(store.attach(&vm));
//! assert!(store.is_able_to_render_view(vm.id()));
//! ```

use crate::config::{global_config, ConfigOverrides, ViewModelsConfig};
use crate::error::{Result, ViewModelError};
use crate::id::{short_type_name, IdContext};
use crate::payload::Payload;
use crate::reactive::{Observable, ReactiveGraph};
use crate::view_model::{
    downcast_view_model, settled, AsViewModel, ModelKind, Settle, ViewModel, ViewModelClass,
    ViewModelParams,
};
use futures::future::{FutureExt, Shared};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::any::{type_name, TypeId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

// =============================================================================
// LOOKUPS
// =============================================================================

/// An alias that can stand in for a view model class in lookups
///
/// Bindings link their anchor to the class they create, so other code can
/// find "the view model behind this binding" without naming its class.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Anchor(Rc<str>);

impl Anchor {
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Anchor {
    fn from(name: &str) -> Self {
        Anchor::new(name)
    }
}

/// What to look a view model up by
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup {
    Id(String),
    Class { type_id: TypeId, name: &'static str },
    Anchor(Anchor),
}

impl Lookup {
    pub fn id(id: impl Into<String>) -> Self {
        Lookup::Id(id.into())
    }

    pub fn class<VM: ViewModel>() -> Self {
        Lookup::Class {
            type_id: TypeId::of::<VM>(),
            name: type_name::<VM>(),
        }
    }

    pub fn anchor(anchor: impl Into<Anchor>) -> Self {
        Lookup::Anchor(anchor.into())
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Id(id) => write!(f, "id '{id}'"),
            Lookup::Class { name, .. } => write!(f, "class {}", short_type_name(name)),
            Lookup::Anchor(anchor) => write!(f, "anchor '{}'", anchor.name()),
        }
    }
}

impl From<&str> for Lookup {
    fn from(id: &str) -> Self {
        Lookup::Id(id.to_string())
    }
}

impl From<String> for Lookup {
    fn from(id: String) -> Self {
        Lookup::Id(id)
    }
}

impl From<Anchor> for Lookup {
    fn from(anchor: Anchor) -> Self {
        Lookup::Anchor(anchor)
    }
}

impl From<&ViewModelClass> for Lookup {
    fn from(class: &ViewModelClass) -> Self {
        Lookup::Class {
            type_id: class.type_id(),
            name: class.name(),
        }
    }
}

impl From<&Lookup> for Lookup {
    fn from(lookup: &Lookup) -> Self {
        lookup.clone()
    }
}

// =============================================================================
// STATE
// =============================================================================

#[derive(Clone)]
struct Entry {
    vm: Rc<dyn ViewModel>,
    kind: ModelKind,
    class: TypeId,
    class_name: &'static str,
}

impl Entry {
    fn new(vm: &Rc<dyn ViewModel>) -> Self {
        Self {
            vm: vm.clone(),
            kind: ModelKind::of(&**vm),
            class: vm.as_any().type_id(),
            class_name: vm.class_name(),
        }
    }
}

struct ClassIds {
    name: &'static str,
    ids: Vec<String>,
}

#[derive(Default)]
struct StoreState {
    live: IndexMap<String, Entry>,
    staged: IndexMap<String, Entry>,
    ref_counts: FxHashMap<String, usize>,
    ids_by_class: IndexMap<TypeId, ClassIds>,
    /// Pending mounts per id
    mounting: FxHashMap<String, usize>,
    /// Pending unmounts per id
    unmounting: FxHashMap<String, usize>,
    anchors: FxHashMap<Anchor, (TypeId, &'static str)>,
    /// Tail of the per-id lifecycle chain
    inflight: FxHashMap<String, (u64, Shared<Settle>)>,
}

impl StoreState {
    fn index_insert(&mut self, entry: &Entry, id: &str) {
        let ids = &mut self
            .ids_by_class
            .entry(entry.class)
            .or_insert_with(|| ClassIds {
                name: entry.class_name,
                ids: Vec::new(),
            })
            .ids;
        if !ids.iter().any(|known| known == id) {
            ids.push(id.to_string());
        }
    }

    fn index_remove(&mut self, class: TypeId, id: &str) {
        if let Some(class_ids) = self.ids_by_class.get_mut(&class) {
            class_ids.ids.retain(|known| known != id);
            if class_ids.ids.is_empty() {
                self.ids_by_class.shift_remove(&class);
            }
        }
    }

    fn entry(&self, id: &str) -> Option<&Entry> {
        self.live.get(id).or_else(|| self.staged.get(id))
    }

    /// Ids matching `lookup`, in class index order
    fn resolve(&self, lookup: &Lookup) -> Vec<String> {
        let class = match lookup {
            Lookup::Id(id) => {
                return self.entry(id).map(|_| vec![id.clone()]).unwrap_or_default();
            }
            Lookup::Class { type_id, .. } => Some(*type_id),
            Lookup::Anchor(anchor) => self.anchors.get(anchor).map(|(type_id, _)| *type_id),
        };
        class
            .and_then(|class| self.ids_by_class.get(&class))
            .map(|class_ids| class_ids.ids.clone())
            .unwrap_or_default()
    }

    fn resolve_last(&self, lookup: &Lookup, warn: bool) -> Option<String> {
        let mut ids = self.resolve(lookup);
        if warn && ids.len() > 1 {
            tracing::warn!(
                lookup = %lookup,
                matches = ids.len(),
                chosen = ids.last().map(String::as_str).unwrap_or_default(),
                "ambiguous view model lookup, using the most recently registered instance"
            );
        }
        ids.pop()
    }
}

/// Snapshot of the registry indexes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub live: usize,
    pub staged: usize,
    /// Sum of all reference counts
    pub references: usize,
    pub classes: usize,
    pub mounting: usize,
    pub unmounting: usize,
    pub anchors: usize,
}

// =============================================================================
// STORE
// =============================================================================

struct StoreInner {
    state: RefCell<StoreState>,
    revision: Observable<u64>,
    reactive: ReactiveGraph,
    overrides: ConfigOverrides,
    op_seq: Cell<u64>,
}

/// Registry of staged and live view models
#[derive(Clone)]
pub struct ViewModelStore {
    inner: Rc<StoreInner>,
}

/// Non-owning handle to a [`ViewModelStore`]
#[derive(Clone)]
pub struct WeakViewModelStore {
    inner: Weak<StoreInner>,
}

impl WeakViewModelStore {
    pub fn upgrade(&self) -> Option<ViewModelStore> {
        self.inner.upgrade().map(|inner| ViewModelStore { inner })
    }
}

impl Default for ViewModelStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewModelStore {
    pub fn new() -> Self {
        Self::with_parts(ReactiveGraph::new(), ConfigOverrides::default())
    }

    /// A store whose view models use `overrides` on top of the global defaults
    pub fn with_overrides(overrides: ConfigOverrides) -> Self {
        Self::with_parts(ReactiveGraph::new(), overrides)
    }

    pub fn with_parts(reactive: ReactiveGraph, overrides: ConfigOverrides) -> Self {
        let revision = reactive.cell(0u64);
        Self {
            inner: Rc::new(StoreInner {
                state: RefCell::new(StoreState::default()),
                revision,
                reactive,
                overrides,
                op_seq: Cell::new(0),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakViewModelStore {
        WeakViewModelStore {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &ViewModelStore) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn reactive(&self) -> &ReactiveGraph {
        &self.inner.reactive
    }

    /// Contextual overrides of this store
    pub fn overrides(&self) -> &ConfigOverrides {
        &self.inner.overrides
    }

    /// Global defaults with this store's overrides applied
    pub fn config(&self) -> ViewModelsConfig {
        global_config().merged(&self.inner.overrides)
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> R {
        self.inner.reactive.transaction(|| {
            let result = f(&mut self.inner.state.borrow_mut());
            self.inner.revision.update(|revision| *revision += 1);
            result
        })
    }

    fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R {
        self.inner.revision.track();
        f(&self.inner.state.borrow())
    }

    // =========================================================================
    // CREATION
    // =========================================================================

    /// The explicit id if there is one, otherwise a generated id
    pub fn generate_id(&self, explicit: Option<&str>, ctx: &IdContext<'_>) -> String {
        match explicit {
            Some(id) => id.to_string(),
            None => self.config().generate_id(ctx),
        }
    }

    /// Creation parameters bound to this store
    pub fn create_params(&self, id: impl Into<String>, payload: Payload) -> ViewModelParams {
        ViewModelParams::new(id, payload)
            .with_config(Rc::new(self.config()))
            .with_store(self)
    }

    /// Augment creation parameters before construction
    ///
    /// Binds the parameters to this store and links their anchor, if any, to
    /// `class`.
    pub fn process_create_config(&self, class: &ViewModelClass, params: &mut ViewModelParams) {
        if !params.store.as_ref().is_some_and(|store| store.ptr_eq(self)) {
            params.store = Some(self.clone());
            params.reactive = self.inner.reactive.clone();
        }
        if let Some(anchor) = params.anchor.clone() {
            self.link_components(class, [anchor]);
        }
    }

    /// Construct a view model through the configured factory
    ///
    /// The instance is not registered; see [`ViewModelStore::mark_staged`].
    pub fn create_view_model(
        &self,
        class: &ViewModelClass,
        params: ViewModelParams,
    ) -> Rc<dyn ViewModel> {
        let config = params.config.clone();
        let vm = config.construct(class, params);
        if let Some(core) = vm.core() {
            core.attach_store(self);
        }
        tracing::debug!(id = vm.id(), class = short_type_name(class.name()), "view model created");
        vm
    }

    /// Make a freshly constructed view model discoverable by id and class
    pub fn mark_staged(&self, vm: &Rc<dyn ViewModel>) {
        let id = vm.id().to_string();
        self.mutate(|state| {
            if state.live.contains_key(&id) {
                tracing::trace!(id = %id, "view model already live, not staging");
                return;
            }
            if let Some(staged) = state.staged.get(&id) {
                if !Rc::ptr_eq(&staged.vm, vm) {
                    tracing::debug!(
                        id = %id,
                        staged = short_type_name(staged.class_name),
                        "another view model is already staged under this id, keeping it"
                    );
                }
                return;
            }
            let entry = Entry::new(vm);
            state.index_insert(&entry, &id);
            state.staged.insert(id.clone(), entry);
            tracing::trace!(id = %id, "view model staged");
        });
    }

    // =========================================================================
    // ATTACH / DETACH
    // =========================================================================

    fn begin_op(&self, id: &str) -> (u64, Option<Shared<Settle>>) {
        let seq = self.inner.op_seq.get() + 1;
        self.inner.op_seq.set(seq);
        let previous = self
            .inner
            .state
            .borrow()
            .inflight
            .get(id)
            .map(|(_, op)| op.clone());
        (seq, previous)
    }

    fn register_op(&self, id: String, seq: u64, op: impl Future<Output = ()> + 'static) -> Settle {
        let shared = op.boxed_local().shared();
        self.inner
            .state
            .borrow_mut()
            .inflight
            .insert(id, (seq, shared.clone()));
        shared.boxed_local()
    }

    fn end_op(state: &mut StoreState, id: &str, seq: u64) {
        if state.inflight.get(id).is_some_and(|(tail, _)| *tail == seq) {
            state.inflight.remove(id);
        }
    }

    /// Take a reference on `vm`, mounting it on the first one
    ///
    /// Reference counts and indexes are updated before this returns. The
    /// returned future completes when the mount (if any) has settled and
    /// must be driven by the caller. `will_mount` is the creator's
    /// responsibility and is not called here.
    pub fn attach(&self, vm: &Rc<dyn ViewModel>) -> Settle {
        let id = vm.id().to_string();
        let first = self.mutate(|state| {
            let count = state.ref_counts.entry(id.clone()).or_insert(0);
            *count += 1;
            if *count > 1 {
                tracing::trace!(id = %id, references = *count, "view model shared");
                return None;
            }
            let entry = match state.staged.shift_remove(&id) {
                Some(entry) => entry,
                None => match state.live.get(&id) {
                    Some(unmounting) => {
                        tracing::debug!(id = %id, "view model reattached while unmounting");
                        unmounting.clone()
                    }
                    None => Entry::new(vm),
                },
            };
            state.index_insert(&entry, &id);
            state.live.insert(id.clone(), entry.clone());
            *state.mounting.entry(id.clone()).or_insert(0) += 1;
            Some(entry)
        });

        let Some(entry) = first else {
            return settled();
        };

        let (seq, previous) = self.begin_op(&id);
        let store = self.downgrade();
        let op_id = id.clone();
        let op = async move {
            if let Some(previous) = previous {
                previous.await;
            }
            if let Some(core) = entry.vm.core() {
                core.mark_mounting();
            }
            tracing::debug!(id = %op_id, kind = ?entry.kind, "mounting view model");
            entry.vm.clone().mount().await;
            if let Some(store) = store.upgrade() {
                store.finish_mount(&op_id, seq);
            }
        };
        self.register_op(id, seq, op)
    }

    fn finish_mount(&self, id: &str, seq: u64) {
        self.mutate(|state| {
            if let Some(pending) = state.mounting.get_mut(id) {
                *pending -= 1;
                if *pending == 0 {
                    state.mounting.remove(id);
                }
            }
            Self::end_op(state, id, seq);
        });
        tracing::debug!(id, "view model attached");
    }

    /// Release a reference on `id`, unmounting on the last one
    ///
    /// Unknown ids and ids already unmounting are ignored. A view model that
    /// was only staged is discarded without any lifecycle calls.
    pub fn detach(&self, id: &str) -> Result<Settle> {
        let last = self.mutate(|state| -> Result<Option<Entry>> {
            if let Some(entry) = state.staged.shift_remove(id) {
                state.index_remove(entry.class, id);
                tracing::trace!(id, "staged view model discarded");
                return Ok(None);
            }
            let Some(entry) = state.live.get(id).cloned() else {
                tracing::trace!(id, "detach of unknown view model ignored");
                return Ok(None);
            };
            match state.ref_counts.get(id).copied() {
                None if state.unmounting.contains_key(id) => Ok(None),
                None => Err(ViewModelError::CorruptedIndex {
                    id: id.to_string(),
                    reason: "live view model without a reference count",
                }),
                Some(count) if count > 1 => {
                    state.ref_counts.insert(id.to_string(), count - 1);
                    tracing::trace!(id, references = count - 1, "view model reference released");
                    Ok(None)
                }
                Some(_) => {
                    state.ref_counts.remove(id);
                    *state.unmounting.entry(id.to_string()).or_insert(0) += 1;
                    Ok(Some(entry))
                }
            }
        });
        let last = match last {
            Ok(last) => last,
            Err(err) => {
                tracing::error!(id, error = %err, "view model index corrupted");
                return Err(err);
            }
        };
        let Some(entry) = last else {
            return Ok(settled());
        };

        let (seq, previous) = self.begin_op(id);
        let store = self.downgrade();
        let op_id = id.to_string();
        let op = async move {
            if let Some(previous) = previous {
                previous.await;
            }
            if let Some(core) = entry.vm.core() {
                core.mark_unmounting();
            }
            tracing::debug!(id = %op_id, kind = ?entry.kind, "unmounting view model");
            entry.vm.will_unmount();
            entry.vm.clone().unmount().await;
            if let Some(store) = store.upgrade() {
                store.finish_unmount(&op_id, entry.class, seq);
            }
        };
        Ok(self.register_op(id.to_string(), seq, op))
    }

    fn finish_unmount(&self, id: &str, class: TypeId, seq: u64) {
        let purged = self.mutate(|state| {
            if let Some(pending) = state.unmounting.get_mut(id) {
                *pending -= 1;
                if *pending == 0 {
                    state.unmounting.remove(id);
                }
            }
            Self::end_op(state, id, seq);
            // A reattach queued behind this unmount still owns the entry
            if state.ref_counts.contains_key(id) || state.inflight.contains_key(id) {
                return false;
            }
            state.live.shift_remove(id);
            state.index_remove(class, id);
            true
        });
        if purged {
            tracing::debug!(id, "view model detached");
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Live or staged view model matching `lookup`
    ///
    /// Class and anchor lookups matching several instances return the most
    /// recently registered one and log a warning.
    pub fn get(&self, lookup: impl Into<Lookup>) -> Option<Rc<dyn ViewModel>> {
        let lookup = lookup.into();
        self.read(|state| {
            let id = state.resolve_last(&lookup, true)?;
            state.entry(&id).map(|entry| entry.vm.clone())
        })
    }

    /// Typed [`ViewModelStore::get`]
    pub fn get_as<VM: ViewModel>(&self, lookup: impl Into<Lookup>) -> Option<Rc<VM>> {
        downcast_view_model(self.get(lookup)?)
    }

    /// Every live view model matching `lookup`, in registration order
    pub fn get_all(&self, lookup: impl Into<Lookup>) -> Vec<Rc<dyn ViewModel>> {
        let lookup = lookup.into();
        self.read(|state| {
            state
                .resolve(&lookup)
                .iter()
                .filter_map(|id| state.live.get(id).map(|entry| entry.vm.clone()))
                .collect()
        })
    }

    pub fn has(&self, lookup: impl Into<Lookup>) -> bool {
        let lookup = lookup.into();
        self.read(|state| state.resolve_last(&lookup, false).is_some())
    }

    /// Id that [`ViewModelStore::get`] would return
    pub fn get_id(&self, lookup: impl Into<Lookup>) -> Option<String> {
        let lookup = lookup.into();
        self.read(|state| state.resolve_last(&lookup, true))
    }

    /// Every live or staged id matching `lookup`, in registration order
    pub fn get_ids(&self, lookup: impl Into<Lookup>) -> Vec<String> {
        let lookup = lookup.into();
        self.read(|state| state.resolve(&lookup))
    }

    /// Live or staged view model by id; never logs
    pub fn peek(&self, id: &str) -> Option<Rc<dyn ViewModel>> {
        self.read(|state| state.entry(id).map(|entry| entry.vm.clone()))
    }

    /// Constructed but not attached yet
    pub fn is_staged(&self, id: &str) -> bool {
        self.read(|state| state.staged.contains_key(id))
    }

    /// Shape recorded when the view model entered the registry
    pub fn model_kind(&self, id: &str) -> Option<ModelKind> {
        self.read(|state| state.entry(id).map(|entry| entry.kind))
    }

    /// Current reference count of `id`
    pub fn references(&self, id: &str) -> usize {
        self.read(|state| state.ref_counts.get(id).copied().unwrap_or(0))
    }

    /// Whether bound content for `id` should render instead of a fallback
    pub fn is_able_to_render_view(&self, id: &str) -> bool {
        self.read(|state| state.live.contains_key(id) && !state.mounting.contains_key(id))
    }

    pub fn stats(&self) -> StoreStats {
        self.read(|state| StoreStats {
            live: state.live.len(),
            staged: state.staged.len(),
            references: state.ref_counts.values().sum(),
            classes: state.ids_by_class.len(),
            mounting: state.mounting.len(),
            unmounting: state.unmounting.len(),
            anchors: state.anchors.len(),
        })
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Offer a new payload to the view model registered under `id`
    pub fn update_payload(&self, id: &str, payload: Payload) -> Result<()> {
        let vm = self
            .inner
            .state
            .borrow()
            .entry(id)
            .map(|entry| entry.vm.clone())
            .ok_or_else(|| ViewModelError::NotFound {
                lookup: Lookup::id(id).to_string(),
            })?;
        vm.set_payload(payload);
        Ok(())
    }

    /// Let `anchors` stand in for `class` in lookups
    pub fn link_components(&self, class: &ViewModelClass, anchors: impl IntoIterator<Item = Anchor>) {
        self.mutate(|state| {
            for anchor in anchors {
                tracing::trace!(anchor = anchor.name(), class = short_type_name(class.name()), "anchor linked");
                state.anchors.insert(anchor, (class.type_id(), class.name()));
            }
        });
    }

    pub fn unlink_components(&self, anchors: impl IntoIterator<Item = Anchor>) {
        self.mutate(|state| {
            for anchor in anchors {
                state.anchors.remove(&anchor);
            }
        });
    }

    /// Drop every index without running lifecycle hooks
    pub fn clean(&self) {
        self.mutate(|state| *state = StoreState::default());
        tracing::debug!("view model store cleaned");
    }
}

impl fmt::Debug for ViewModelStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        let classes: Vec<_> = state
            .ids_by_class
            .values()
            .map(|class_ids| (short_type_name(class_ids.name), class_ids.ids.len()))
            .collect();
        f.debug_struct("ViewModelStore")
            .field("live", &state.live.keys().collect::<Vec<_>>())
            .field("staged", &state.staged.keys().collect::<Vec<_>>())
            .field("classes", &classes)
            .finish_non_exhaustive()
    }
}
