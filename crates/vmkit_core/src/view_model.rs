//! View model entities
//!
//! A view model is a plain object bound to one UI binding activation. Its
//! lifecycle is driven from outside (by the [store](crate::store) or by a
//! local binding) through a fixed sequence of calls:
//!
//! ```text
//! staged ──mark_mounting──▶ mounting ──mount()──▶ mounted
//!                                                   │ set_payload() (any number)
//!                                                   ▼
//! unmounted ◀──unmount()── unmounting ◀──mark_unmounting / will_unmount()
//! ```
//!
//! Two shapes of view model exist:
//!
//! - **Full** view models embed a [`ViewModelCore`], which owns the id, the
//!   observable payload, the mount flags, the parent back-reference and the
//!   abort signal. Every lifecycle method has a working default.
//! - **Simple** view models only provide an id and whichever hooks they
//!   care about. They have no flags and ignore payloads unless they override
//!   [`ViewModel::set_payload`].
//!
//! The shape is resolved once, when the view model is staged, into a
//! [`ModelKind`].
//!
//! # Example
//!
//! ```ignore
//! struct Counter {
//!     core: ViewModelCore,
//! }
//!
//! impl CreateViewModel for Counter {
//!     fn create(params: ViewModelParams) -> Self {
//!         Self { core: ViewModelCore::new(&params) }
//!     }
//! }
//!
//! impl ViewModel for Counter {
//!     fn id(&self) -> &str {
//!         self.core.id()
//!     }
//!
//!     fn core(&self) -> Option<&ViewModelCore> {
//!         Some(&self.core)
//!     }
//!
//!     fn payload_changed(&self, next: &Payload, prev: &Payload) {
//!         tracing::info!(?next, ?prev, "counter input changed");
//!     }
//! }
//! ```

use crate::config::{global_config, ViewModelsConfig};
use crate::payload::Payload;
use crate::reactive::{Computed, Observable, ReactiveGraph};
use crate::store::{Anchor, ViewModelStore, WeakViewModelStore};
use futures::future::LocalBoxFuture;
use std::any::{type_name, Any, TypeId};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use tokio_util::sync::CancellationToken;

/// Deferred completion of a lifecycle step
pub type Settle = LocalBoxFuture<'static, ()>;

/// A lifecycle step that completed synchronously
pub fn settled() -> Settle {
    Box::pin(std::future::ready(()))
}

/// Lifecycle position of a full view model
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, not yet attached
    Staged,
    Mounting,
    Mounted,
    Unmounting,
    Unmounted,
}

/// Upcasts available on every view model
///
/// Implemented automatically for every sized [`ViewModel`].
pub trait AsViewModel {
    fn as_any(&self) -> &dyn Any;
    fn as_view_model(&self) -> &dyn ViewModel;
    fn into_any_rc(self: Rc<Self>) -> Rc<dyn Any>;
    fn into_view_model_rc(self: Rc<Self>) -> Rc<dyn ViewModel>;
    /// Fully qualified type name of the concrete view model
    fn class_name(&self) -> &'static str;
}

impl<T: ViewModel> AsViewModel for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_view_model(&self) -> &dyn ViewModel {
        self
    }

    fn into_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn into_view_model_rc(self: Rc<Self>) -> Rc<dyn ViewModel> {
        self
    }

    fn class_name(&self) -> &'static str {
        type_name::<T>()
    }
}

/// A stateful object with an externally driven mount/unmount lifecycle
pub trait ViewModel: AsViewModel + 'static {
    /// Registry id; immutable for the lifetime of the instance
    fn id(&self) -> &str;

    /// Shared machinery of full view models; `None` for simple ones
    fn core(&self) -> Option<&ViewModelCore> {
        None
    }

    /// Runs once after construction, before the first mount
    fn will_mount(&self) {}

    /// Bring the view model up
    ///
    /// The returned future may stay pending (loading data, waiting on a
    /// parent); the registry withholds "ready to render" until it resolves.
    /// Overrides of a full view model must call
    /// [`ViewModelCore::mark_mounted`] and then [`ViewModel::did_mount`].
    fn mount(self: Rc<Self>) -> Settle {
        Box::pin(async move {
            if let Some(core) = self.core() {
                core.mark_mounted(self.as_view_model());
            }
            self.did_mount();
        })
    }

    fn did_mount(&self) {}

    /// Runs before the unmount starts, while the view model is still mounted
    fn will_unmount(&self) {}

    /// Tear the view model down
    ///
    /// Overrides of a full view model must call
    /// [`ViewModelCore::mark_unmounted`] and then [`ViewModel::did_unmount`].
    fn unmount(self: Rc<Self>) -> Settle {
        Box::pin(async move {
            if let Some(core) = self.core() {
                core.mark_unmounted(self.as_view_model());
            }
            self.did_unmount();
        })
    }

    fn did_unmount(&self) {}

    /// Called with the incoming and the current payload, before the stored
    /// payload is replaced
    fn payload_changed(&self, _next: &Payload, _prev: &Payload) {}

    /// Offer a new payload
    ///
    /// The configured equality decides whether anything happens. Calling
    /// this before the view model is attached simply stores the payload.
    fn set_payload(&self, next: Payload) {
        let Some(core) = self.core() else {
            return;
        };
        let prev = core.payload_untracked();
        if core.config().compare_payload.equals(&prev, &next) {
            return;
        }
        self.payload_changed(&next, &prev);
        core.replace_payload(next);
    }
}

impl fmt::Debug for dyn ViewModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewModel")
            .field("class", &crate::id::short_type_name(self.class_name()))
            .field("id", &self.id())
            .finish()
    }
}

/// View models that can be constructed by the registry
pub trait CreateViewModel: ViewModel + Sized {
    fn create(params: ViewModelParams) -> Self;
}

/// Shape of a view model, resolved once when it enters the registry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    /// Embeds a [`ViewModelCore`]
    Full,
    /// Id and hooks only
    Simple,
}

impl ModelKind {
    pub fn of(vm: &dyn ViewModel) -> Self {
        if vm.core().is_some() {
            ModelKind::Full
        } else {
            ModelKind::Simple
        }
    }
}

/// Downcast a type-erased view model
pub fn downcast_view_model<VM: ViewModel>(vm: Rc<dyn ViewModel>) -> Option<Rc<VM>> {
    vm.into_any_rc().downcast::<VM>().ok()
}

// =============================================================================
// CLASS REFERENCES
// =============================================================================

/// Runtime reference to a view model class
#[derive(Clone, Copy)]
pub struct ViewModelClass {
    type_id: TypeId,
    name: &'static str,
    construct: fn(ViewModelParams) -> Rc<dyn ViewModel>,
}

fn construct_erased<VM: CreateViewModel>(params: ViewModelParams) -> Rc<dyn ViewModel> {
    Rc::new(VM::create(params))
}

impl ViewModelClass {
    pub fn of<VM: CreateViewModel>() -> Self {
        Self {
            type_id: TypeId::of::<VM>(),
            name: type_name::<VM>(),
            construct: construct_erased::<VM>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Construct directly, bypassing any configured factory
    pub fn construct(&self, params: ViewModelParams) -> Rc<dyn ViewModel> {
        (self.construct)(params)
    }
}

impl PartialEq for ViewModelClass {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ViewModelClass {}

impl fmt::Debug for ViewModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ViewModelClass({})", self.name)
    }
}

// =============================================================================
// CREATION PARAMETERS
// =============================================================================

/// Everything a view model needs at construction
#[derive(Clone)]
pub struct ViewModelParams {
    pub id: String,
    pub payload: Payload,
    pub parent_id: Option<String>,
    /// Explicitly injected parent; held weakly by the core
    pub parent: Option<Rc<dyn ViewModel>>,
    pub store: Option<ViewModelStore>,
    pub config: Rc<ViewModelsConfig>,
    pub reactive: ReactiveGraph,
    /// Binding artifact to link to the created class
    pub anchor: Option<Anchor>,
}

impl ViewModelParams {
    /// Parameters with the process-wide configuration and a private graph
    pub fn new(id: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            payload,
            parent_id: None,
            parent: None,
            store: None,
            config: global_config(),
            reactive: ReactiveGraph::new(),
            anchor: None,
        }
    }

    /// Use `store` for parent resolution and share its reactive graph
    pub fn with_store(mut self, store: &ViewModelStore) -> Self {
        self.reactive = store.reactive().clone();
        self.store = Some(store.clone());
        self
    }

    pub fn with_parent(mut self, parent: &Rc<dyn ViewModel>) -> Self {
        self.parent_id = Some(parent.id().to_string());
        self.parent = Some(parent.clone());
        self
    }

    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_config(mut self, config: Rc<ViewModelsConfig>) -> Self {
        self.config = config;
        self
    }

    pub fn with_reactive(mut self, reactive: ReactiveGraph) -> Self {
        self.reactive = reactive;
        self
    }
}

impl fmt::Debug for ViewModelParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewModelParams")
            .field("id", &self.id)
            .field("payload", &self.payload)
            .field("parent_id", &self.parent_id)
            .field("has_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// CORE
// =============================================================================

/// State shared by every full view model
pub struct ViewModelCore {
    id: String,
    payload: Observable<Payload>,
    /// Memoized view of `payload`, per `payload_computed`
    exposed: Option<Computed<Payload>>,
    is_mounted: Observable<bool>,
    is_unmounting: Observable<bool>,
    state: Cell<LifecycleState>,
    parent_id: Option<String>,
    parent: Option<Weak<dyn ViewModel>>,
    store: RefCell<Option<WeakViewModelStore>>,
    config: Rc<ViewModelsConfig>,
    reactive: ReactiveGraph,
    /// Abort signal of the current mount cycle
    unmount_signal: RefCell<CancellationToken>,
}

impl ViewModelCore {
    pub fn new(params: &ViewModelParams) -> Self {
        let config = params.config.clone();
        let reactive = params.reactive.clone();
        let observable = config.payload_observable;

        let payload = match (observable.is_tracked(), observable.notify_filter()) {
            (false, _) => reactive.plain_cell(params.payload.clone()),
            (true, Some(equals)) => {
                reactive.cell_with_equality(params.payload.clone(), move |a, b| equals(a, b))
            }
            (true, None) => reactive.cell(params.payload.clone()),
        };
        let exposed = config.payload_computed.memo_equality().map(|equals| {
            let source = payload.clone();
            reactive.computed(move || source.get(), move |a, b| equals(a, b))
        });

        Self {
            id: params.id.clone(),
            payload,
            exposed,
            is_mounted: reactive.cell(false),
            is_unmounting: reactive.cell(false),
            state: Cell::new(LifecycleState::Staged),
            parent_id: params.parent_id.clone(),
            parent: params.parent.as_ref().map(Rc::downgrade),
            store: RefCell::new(params.store.as_ref().map(ViewModelStore::downgrade)),
            config,
            reactive,
            unmount_signal: RefCell::new(CancellationToken::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current payload, tracked by the observable substrate
    pub fn payload(&self) -> Payload {
        match &self.exposed {
            Some(memo) => memo.get(),
            None => self.payload.get(),
        }
    }

    /// Current payload without registering a dependency
    pub fn payload_untracked(&self) -> Payload {
        self.payload.get_untracked()
    }

    pub fn is_mounted(&self) -> bool {
        self.is_mounted.get()
    }

    pub fn is_unmounting(&self) -> bool {
        self.is_unmounting.get()
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    pub fn config(&self) -> &ViewModelsConfig {
        &self.config
    }

    pub fn reactive(&self) -> &ReactiveGraph {
        &self.reactive
    }

    /// Abort signal for async work started during the current mount cycle
    ///
    /// Fires exactly once, when the view model becomes unmounted. A later
    /// remount gets a fresh signal; the old one stays cancelled.
    pub fn unmount_signal(&self) -> CancellationToken {
        self.unmount_signal.borrow().clone()
    }

    pub fn parent_view_model_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// Registry this view model was created for, if it is still alive
    pub fn store(&self) -> Option<ViewModelStore> {
        self.store.borrow().as_ref().and_then(WeakViewModelStore::upgrade)
    }

    /// Record the registry; done when the view model is staged
    pub fn attach_store(&self, store: &ViewModelStore) {
        *self.store.borrow_mut() = Some(store.downgrade());
    }

    /// Parent view model
    ///
    /// The explicitly injected parent wins; otherwise the parent id is
    /// looked up in the registry. Never creates, mounts or retains anything.
    pub fn parent_view_model(&self) -> Option<Rc<dyn ViewModel>> {
        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            return Some(parent);
        }
        let parent_id = self.parent_id.as_deref()?;
        match self.store() {
            Some(store) => store.peek(parent_id),
            None => {
                tracing::warn!(
                    id = %self.id,
                    parent_id,
                    "parent view model requested without a view model store"
                );
                None
            }
        }
    }

    /// Typed parent view model
    pub fn parent<P: ViewModel>(&self) -> Option<Rc<P>> {
        downcast_view_model(self.parent_view_model()?)
    }

    // =========================================================================
    // LIFECYCLE TRANSITIONS
    // =========================================================================

    /// `staged -> mounting`; called by whoever starts the mount
    pub fn mark_mounting(&self) {
        self.state.set(LifecycleState::Mounting);
    }

    /// `mounting -> mounted`
    pub fn mark_mounted(&self, vm: &dyn ViewModel) {
        if let Some(on_mount) = &self.config.on_mount {
            on_mount(vm);
        }
        if self.unmount_signal.borrow().is_cancelled() {
            *self.unmount_signal.borrow_mut() = CancellationToken::new();
        }
        self.config
            .with_view_transition(self.config.view_transitions.mount, || {
                self.reactive.transaction(|| {
                    self.is_mounted.set(true);
                    self.state.set(LifecycleState::Mounted);
                });
            });
        tracing::debug!(id = %self.id, "view model mounted");
    }

    /// `mounted -> unmounting`
    pub fn mark_unmounting(&self) {
        self.reactive.transaction(|| {
            self.is_unmounting.set(true);
            self.state.set(LifecycleState::Unmounting);
        });
    }

    /// `unmounting -> unmounted`; fires the abort signal first
    pub fn mark_unmounted(&self, vm: &dyn ViewModel) {
        self.unmount_signal.borrow().cancel();
        if let Some(on_unmount) = &self.config.on_unmount {
            on_unmount(vm);
        }
        self.config
            .with_view_transition(self.config.view_transitions.unmount, || {
                self.reactive.transaction(|| {
                    self.is_mounted.set(false);
                    self.is_unmounting.set(false);
                    self.state.set(LifecycleState::Unmounted);
                });
            });
        tracing::debug!(id = %self.id, "view model unmounted");
    }

    /// Store `next` as the payload, notifying observers
    pub fn replace_payload(&self, next: Payload) {
        self.config
            .with_view_transition(self.config.view_transitions.payload_change, || {
                self.reactive.transaction(|| {
                    self.payload.set(next);
                });
            });
    }
}

impl fmt::Debug for ViewModelCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewModelCore")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .field("payload", &self.payload.get_untracked())
            .field("parent_id", &self.parent_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ConfigOverrides;
    use crate::equality::{PayloadCompare, PayloadComputed, PayloadObservable};

    /// Full view model that records every hook call
    pub(crate) struct Probe {
        pub core: ViewModelCore,
        pub log: RefCell<Vec<String>>,
        pub changes: Cell<usize>,
    }

    impl CreateViewModel for Probe {
        fn create(params: ViewModelParams) -> Self {
            Self {
                core: ViewModelCore::new(&params),
                log: RefCell::new(Vec::new()),
                changes: Cell::new(0),
            }
        }
    }

    impl Probe {
        fn record(&self, event: &str) {
            self.log.borrow_mut().push(event.to_string());
        }

        pub fn events(&self) -> Vec<String> {
            self.log.borrow().clone()
        }
    }

    impl ViewModel for Probe {
        fn id(&self) -> &str {
            self.core.id()
        }

        fn core(&self) -> Option<&ViewModelCore> {
            Some(&self.core)
        }

        fn will_mount(&self) {
            self.record("will_mount");
        }

        fn did_mount(&self) {
            self.record("did_mount");
        }

        fn will_unmount(&self) {
            self.record("will_unmount");
        }

        fn did_unmount(&self) {
            self.record("did_unmount");
        }

        fn payload_changed(&self, next: &Payload, prev: &Payload) {
            self.changes.set(self.changes.get() + 1);
            self.record(&format!("payload {prev:?} -> {next:?}"));
        }
    }

    struct Simple {
        id: String,
    }

    impl ViewModel for Simple {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn probe_with(overrides: ConfigOverrides, payload: Payload) -> Rc<Probe> {
        let config = Rc::new(global_config().merged(&overrides));
        Rc::new(Probe::create(
            ViewModelParams::new("probe", payload).with_config(config),
        ))
    }

    fn x(n: i64) -> Payload {
        Payload::map([("x", n.into())])
    }

    #[test]
    fn test_shallow_compare_gates_payload_changes() {
        let vm = probe_with(
            ConfigOverrides::new().compare_payload(PayloadCompare::Shallow),
            Payload::Null,
        );

        vm.set_payload(x(1));
        // New allocation, same shape
        vm.set_payload(x(1));
        assert_eq!(vm.changes.get(), 1);

        vm.set_payload(x(2));
        assert_eq!(vm.changes.get(), 2);
    }

    #[test]
    fn test_disabled_compare_always_changes() {
        let vm = probe_with(
            ConfigOverrides::new().compare_payload(PayloadCompare::Off),
            x(1),
        );
        let same = vm.core.payload_untracked();
        vm.set_payload(same.clone());
        vm.set_payload(same);
        assert_eq!(vm.changes.get(), 2);
    }

    #[test]
    fn test_payload_changed_sees_previous_payload() {
        let vm = probe_with(ConfigOverrides::new(), 1.into());
        vm.set_payload(2.into());
        assert_eq!(vm.events(), vec!["payload 1 -> 2"]);
        assert_eq!(vm.core.payload().as_i64(), Some(2));
    }

    #[test]
    fn test_set_payload_before_mount_is_buffered() {
        let vm = probe_with(ConfigOverrides::new(), 1.into());
        vm.set_payload(5.into());
        assert_eq!(vm.core.state(), LifecycleState::Staged);
        assert!(!vm.core.is_mounted());
        assert_eq!(vm.core.payload_untracked().as_i64(), Some(5));
    }

    #[test]
    fn test_default_lifecycle_flips_flags() {
        let vm = probe_with(ConfigOverrides::new(), Payload::Null);

        vm.core.mark_mounting();
        assert_eq!(vm.core.state(), LifecycleState::Mounting);
        pollster::block_on(vm.clone().mount());
        assert!(vm.core.is_mounted());
        assert_eq!(vm.core.state(), LifecycleState::Mounted);

        vm.core.mark_unmounting();
        assert!(vm.core.is_unmounting());
        pollster::block_on(vm.clone().unmount());
        assert!(!vm.core.is_mounted());
        assert!(!vm.core.is_unmounting());
        assert_eq!(vm.core.state(), LifecycleState::Unmounted);
        assert_eq!(vm.events(), vec!["did_mount", "did_unmount"]);
    }

    #[test]
    fn test_unmount_signal_fires_once_per_cycle() {
        let vm = probe_with(ConfigOverrides::new(), Payload::Null);
        pollster::block_on(vm.clone().mount());

        let first = vm.core.unmount_signal();
        assert!(!first.is_cancelled());
        pollster::block_on(vm.clone().unmount());
        assert!(first.is_cancelled());

        // Remount: a fresh signal, the old one stays cancelled
        pollster::block_on(vm.clone().mount());
        let second = vm.core.unmount_signal();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }

    #[test]
    fn test_lifecycle_callbacks() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let vm = probe_with(
            ConfigOverrides::new()
                .on_mount({
                    let seen = seen.clone();
                    move |vm| seen.borrow_mut().push(format!("mount {}", vm.id()))
                })
                .on_unmount({
                    let seen = seen.clone();
                    move |vm| seen.borrow_mut().push(format!("unmount {}", vm.id()))
                }),
            Payload::Null,
        );
        pollster::block_on(vm.clone().mount());
        pollster::block_on(vm.clone().unmount());
        assert_eq!(*seen.borrow(), vec!["mount probe", "unmount probe"]);
    }

    #[test]
    fn test_structural_observable_suppresses_notification() {
        let vm = probe_with(
            ConfigOverrides::new()
                .compare_payload(PayloadCompare::Off)
                .payload_observable(PayloadObservable::Structural)
                .payload_computed(PayloadComputed::Off),
            x(1),
        );
        let runs = Rc::new(Cell::new(0));
        let _effect = vm.core.reactive().effect({
            let (vm, runs) = (vm.clone(), runs.clone());
            move || {
                let _ = vm.core.payload();
                runs.set(runs.get() + 1);
            }
        });

        vm.set_payload(x(1));
        assert_eq!(vm.changes.get(), 1);
        assert_eq!(runs.get(), 1);

        vm.set_payload(x(2));
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_simple_view_model_defaults() {
        let vm: Rc<dyn ViewModel> = Rc::new(Simple { id: "plain".into() });
        assert_eq!(ModelKind::of(&*vm), ModelKind::Simple);
        vm.set_payload(1.into());
        pollster::block_on(vm.clone().mount());
        pollster::block_on(vm.clone().unmount());
        assert!(vm.core().is_none());
    }

    #[test]
    fn test_explicit_parent_is_weak() {
        let parent: Rc<dyn ViewModel> = Rc::new(Simple { id: "parent".into() });
        let child = Probe::create(ViewModelParams::new("child", Payload::Null).with_parent(&parent));

        assert_eq!(child.core.parent_view_model_id(), Some("parent"));
        assert_eq!(child.core.parent_view_model().map(|p| p.id().to_string()), Some("parent".into()));
        assert!(child.core.parent::<Simple>().is_some());
        assert!(child.core.parent::<Probe>().is_none());

        drop(parent);
        assert!(child.core.parent_view_model().is_none());
    }

    #[test]
    fn test_parent_without_store_is_none() {
        let child = Probe::create(ViewModelParams::new("child", Payload::Null).with_parent_id("missing"));
        assert!(child.core.parent_view_model().is_none());
    }

    #[test]
    fn test_class_reference() {
        let class = ViewModelClass::of::<Probe>();
        assert_eq!(class, ViewModelClass::of::<Probe>());
        assert_eq!(class.type_id(), TypeId::of::<Probe>());

        let vm = class.construct(ViewModelParams::new("built", 3.into()));
        assert_eq!(vm.id(), "built");
        assert_eq!(ModelKind::of(&*vm), ModelKind::Full);
        assert!(downcast_view_model::<Probe>(vm).is_some());
    }
}
