//! View model configuration
//!
//! Configuration is resolved in three layers, later layers winning:
//!
//! 1. the process-wide default ([`global_config`], changed only through
//!    [`configure`], which affects view models created afterwards)
//! 2. contextual overrides (a store or a binding scope)
//! 3. call-site overrides
//!
//! Layers are merged into a fresh [`ViewModelsConfig`]; merging never
//! mutates a base layer.
//!
//! ```ignore
//! configure(|config| config.compare_payload = PayloadCompare::Shallow);
//!
//! let call_site = ConfigOverrides::new().compare_payload(PayloadCompare::Off);
//! let resolved = global_config().merged(&call_site);
//! ```

use crate::equality::{PayloadCompare, PayloadComputed, PayloadObservable};
use crate::id::{self, GenerateId, IdContext};
use crate::view_model::{ViewModel, ViewModelClass, ViewModelParams};
use serde::Deserialize;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Builds a view model instance from its class and creation parameters
pub type Factory = Rc<dyn Fn(&ViewModelClass, ViewModelParams) -> Rc<dyn ViewModel>>;

/// Called with the view model whose lifecycle step just ran
pub type LifecycleCallback = Rc<dyn Fn(&dyn ViewModel)>;

/// Wraps a state change in a platform visual transition
pub type TransitionRunner = Rc<dyn Fn(&mut dyn FnMut())>;

/// Which lifecycle steps request a visual transition
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ViewTransitions {
    pub mount: bool,
    pub unmount: bool,
    pub payload_change: bool,
}

/// Fully resolved view model configuration
#[derive(Clone)]
pub struct ViewModelsConfig {
    /// Decides whether `set_payload` sees a change
    pub compare_payload: PayloadCompare,
    /// How the stored payload notifies observers
    pub payload_observable: PayloadObservable,
    /// Whether payload reads go through a memo
    pub payload_computed: PayloadComputed,
    /// Replaces the default id generator
    pub generate_id: Option<GenerateId>,
    /// Replaces direct construction of view model classes
    pub factory: Option<Factory>,
    pub view_transitions: ViewTransitions,
    /// Platform hook for visual transitions; without it the hint is a no-op
    pub start_view_transition: Option<TransitionRunner>,
    pub on_mount: Option<LifecycleCallback>,
    pub on_unmount: Option<LifecycleCallback>,
    /// Lookup misses are errors instead of falling back to the last known
    /// instance
    pub strict_lookups: bool,
}

impl Default for ViewModelsConfig {
    fn default() -> Self {
        Self {
            compare_payload: PayloadCompare::default(),
            payload_observable: PayloadObservable::default(),
            payload_computed: PayloadComputed::default(),
            generate_id: None,
            factory: None,
            view_transitions: ViewTransitions::default(),
            start_view_transition: None,
            on_mount: None,
            on_unmount: None,
            strict_lookups: cfg!(debug_assertions),
        }
    }
}

impl ViewModelsConfig {
    /// Generate an id with the configured generator
    pub fn generate_id(&self, ctx: &IdContext<'_>) -> String {
        match &self.generate_id {
            Some(generate) => generate(ctx),
            None => id::generate_id(ctx),
        }
    }

    /// Construct a view model with the configured factory
    pub fn construct(&self, class: &ViewModelClass, params: ViewModelParams) -> Rc<dyn ViewModel> {
        match &self.factory {
            Some(factory) => factory(class, params),
            None => class.construct(params),
        }
    }

    /// Run `apply`, inside a visual transition when `requested` and supported
    pub fn with_view_transition(&self, requested: bool, apply: impl FnOnce()) {
        match (&self.start_view_transition, requested) {
            (Some(runner), true) => {
                let mut apply = Some(apply);
                runner(&mut || {
                    if let Some(apply) = apply.take() {
                        apply();
                    }
                });
                // Runners that never call back still get the update applied
                if let Some(apply) = apply.take() {
                    apply();
                }
            }
            _ => apply(),
        }
    }

    /// A copy of `self` with every set field of `overrides` applied
    pub fn merged(&self, overrides: &ConfigOverrides) -> ViewModelsConfig {
        let mut config = self.clone();
        if let Some(compare) = &overrides.compare_payload {
            config.compare_payload = compare.clone();
        }
        if let Some(observable) = overrides.payload_observable {
            config.payload_observable = observable;
        }
        if let Some(computed) = &overrides.payload_computed {
            config.payload_computed = computed.clone();
        }
        if let Some(generate) = &overrides.generate_id {
            config.generate_id = Some(generate.clone());
        }
        if let Some(factory) = &overrides.factory {
            config.factory = Some(factory.clone());
        }
        if let Some(transitions) = overrides.view_transitions {
            config.view_transitions = transitions;
        }
        if let Some(runner) = &overrides.start_view_transition {
            config.start_view_transition = Some(runner.clone());
        }
        if let Some(on_mount) = &overrides.on_mount {
            config.on_mount = Some(on_mount.clone());
        }
        if let Some(on_unmount) = &overrides.on_unmount {
            config.on_unmount = Some(on_unmount.clone());
        }
        if let Some(strict) = overrides.strict_lookups {
            config.strict_lookups = strict;
        }
        config
    }
}

impl fmt::Debug for ViewModelsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewModelsConfig")
            .field("compare_payload", &self.compare_payload)
            .field("payload_observable", &self.payload_observable)
            .field("payload_computed", &self.payload_computed)
            .field("generate_id", &self.generate_id.is_some())
            .field("factory", &self.factory.is_some())
            .field("view_transitions", &self.view_transitions)
            .field("strict_lookups", &self.strict_lookups)
            .finish_non_exhaustive()
    }
}

/// Partial configuration; unset fields fall through to the layer below
#[derive(Clone, Default)]
pub struct ConfigOverrides {
    pub compare_payload: Option<PayloadCompare>,
    pub payload_observable: Option<PayloadObservable>,
    pub payload_computed: Option<PayloadComputed>,
    pub generate_id: Option<GenerateId>,
    pub factory: Option<Factory>,
    pub view_transitions: Option<ViewTransitions>,
    pub start_view_transition: Option<TransitionRunner>,
    pub on_mount: Option<LifecycleCallback>,
    pub on_unmount: Option<LifecycleCallback>,
    pub strict_lookups: Option<bool>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compare_payload(mut self, compare: PayloadCompare) -> Self {
        self.compare_payload = Some(compare);
        self
    }

    pub fn payload_observable(mut self, observable: PayloadObservable) -> Self {
        self.payload_observable = Some(observable);
        self
    }

    pub fn payload_computed(mut self, computed: PayloadComputed) -> Self {
        self.payload_computed = Some(computed);
        self
    }

    pub fn generate_id(mut self, generate: impl Fn(&IdContext<'_>) -> String + 'static) -> Self {
        self.generate_id = Some(Rc::new(generate));
        self
    }

    pub fn factory(
        mut self,
        factory: impl Fn(&ViewModelClass, ViewModelParams) -> Rc<dyn ViewModel> + 'static,
    ) -> Self {
        self.factory = Some(Rc::new(factory));
        self
    }

    pub fn view_transitions(mut self, transitions: ViewTransitions) -> Self {
        self.view_transitions = Some(transitions);
        self
    }

    pub fn start_view_transition(mut self, runner: impl Fn(&mut dyn FnMut()) + 'static) -> Self {
        self.start_view_transition = Some(Rc::new(runner));
        self
    }

    pub fn on_mount(mut self, callback: impl Fn(&dyn ViewModel) + 'static) -> Self {
        self.on_mount = Some(Rc::new(callback));
        self
    }

    pub fn on_unmount(mut self, callback: impl Fn(&dyn ViewModel) + 'static) -> Self {
        self.on_unmount = Some(Rc::new(callback));
        self
    }

    pub fn strict_lookups(mut self, strict: bool) -> Self {
        self.strict_lookups = Some(strict);
        self
    }

    /// Layer `over` on top of `self`; set fields of `over` win
    pub fn layered(&self, over: &ConfigOverrides) -> ConfigOverrides {
        ConfigOverrides {
            compare_payload: over.compare_payload.clone().or_else(|| self.compare_payload.clone()),
            payload_observable: over.payload_observable.or(self.payload_observable),
            payload_computed: over
                .payload_computed
                .clone()
                .or_else(|| self.payload_computed.clone()),
            generate_id: over.generate_id.clone().or_else(|| self.generate_id.clone()),
            factory: over.factory.clone().or_else(|| self.factory.clone()),
            view_transitions: over.view_transitions.or(self.view_transitions),
            start_view_transition: over
                .start_view_transition
                .clone()
                .or_else(|| self.start_view_transition.clone()),
            on_mount: over.on_mount.clone().or_else(|| self.on_mount.clone()),
            on_unmount: over.on_unmount.clone().or_else(|| self.on_unmount.clone()),
            strict_lookups: over.strict_lookups.or(self.strict_lookups),
        }
    }
}

// =============================================================================
// PROCESS-WIDE DEFAULTS
// =============================================================================

thread_local! {
    /// View models are single-threaded; each thread has its own defaults
    static GLOBAL_CONFIG: RefCell<Rc<ViewModelsConfig>> =
        RefCell::new(Rc::new(ViewModelsConfig::default()));
}

/// Current process-wide defaults
pub fn global_config() -> Rc<ViewModelsConfig> {
    GLOBAL_CONFIG.with(|config| config.borrow().clone())
}

/// Replace the process-wide defaults
///
/// View models created before the call keep the configuration they were
/// created with.
pub fn configure(f: impl FnOnce(&mut ViewModelsConfig)) {
    let mut next = (*global_config()).clone();
    f(&mut next);
    tracing::debug!(config = ?next, "view model defaults replaced");
    GLOBAL_CONFIG.with(|config| *config.borrow_mut() = Rc::new(next));
}

/// Restore the built-in defaults
pub fn reset_global_config() {
    GLOBAL_CONFIG.with(|config| *config.borrow_mut() = Rc::new(ViewModelsConfig::default()));
}
