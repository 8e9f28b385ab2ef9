//! Ambient binding context
//!
//! A [`BindingScope`] is what a UI binding sees around itself: the registry
//! (if any), the nearest enclosing view model, contextual configuration and
//! the host's executor for lifecycle work. Hosts create one scope at the
//! root and derive nested scopes as view models are rendered:
//!
//! ```ignore
//! let root = BindingScope::with_store(store, pool.spawner());
//! let page = page_binding.render(&root, Payload::Null)?;
//! let inner = root.nested(page);
//! ```
//!
//! Without a store the scope runs bindings in local mode: each view model is
//! private to its binding and is mounted directly on commit.

use crate::binding::ViewModelBinding;
use futures::task::{LocalSpawn, LocalSpawnExt};
use std::fmt;
use std::rc::Rc;
use vmkit_core::{
    global_config, ConfigOverrides, CreateViewModel, Lookup, Payload, ReactiveGraph, Result,
    Settle, ViewModel, ViewModelError, ViewModelStore, ViewModelsConfig,
};

#[derive(Clone)]
pub struct BindingScope {
    store: Option<ViewModelStore>,
    active: Option<Rc<dyn ViewModel>>,
    spawner: Rc<dyn LocalSpawn>,
    overrides: ConfigOverrides,
    reactive: ReactiveGraph,
}

impl BindingScope {
    /// A scope without a registry; bindings run in local mode
    pub fn new(spawner: impl LocalSpawn + 'static) -> Self {
        Self {
            store: None,
            active: None,
            spawner: Rc::new(spawner),
            overrides: ConfigOverrides::default(),
            reactive: ReactiveGraph::new(),
        }
    }

    /// A scope backed by `store`
    pub fn with_store(store: ViewModelStore, spawner: impl LocalSpawn + 'static) -> Self {
        Self {
            reactive: store.reactive().clone(),
            store: Some(store),
            active: None,
            spawner: Rc::new(spawner),
            overrides: ConfigOverrides::default(),
        }
    }

    /// Contextual overrides for every binding in this scope
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Child scope in which `vm` is the active view model
    pub fn nested(&self, vm: Rc<dyn ViewModel>) -> Self {
        Self {
            active: Some(vm),
            ..self.clone()
        }
    }

    pub fn store(&self) -> Option<&ViewModelStore> {
        self.store.as_ref()
    }

    /// Nearest enclosing view model
    pub fn active(&self) -> Option<&Rc<dyn ViewModel>> {
        self.active.as_ref()
    }

    pub fn reactive(&self) -> &ReactiveGraph {
        &self.reactive
    }

    /// Contextual overrides, including the store's
    pub fn overrides(&self) -> ConfigOverrides {
        match &self.store {
            Some(store) => store.overrides().layered(&self.overrides),
            None => self.overrides.clone(),
        }
    }

    /// Resolve configuration: `caller` over this scope over global defaults
    pub fn config(&self, caller: &ConfigOverrides) -> ViewModelsConfig {
        global_config().merged(&self.overrides().layered(caller))
    }

    /// Hand lifecycle work to the host executor
    pub fn spawn(&self, work: Settle) -> Result<()> {
        self.spawner.spawn_local(work)?;
        Ok(())
    }

    // =========================================================================
    // INBOUND OPERATIONS
    // =========================================================================

    /// Resolve a view model by class and optional id, then attach it
    ///
    /// The reference taken here is released with
    /// [`BindingScope::schedule_detach`].
    #[track_caller]
    pub fn resolve_and_attach<VM: CreateViewModel>(
        &self,
        payload: Payload,
        id: Option<&str>,
    ) -> Result<Rc<VM>> {
        let mut binding = ViewModelBinding::<VM>::new();
        if let Some(id) = id {
            binding = binding.with_id(id);
        }
        let vm = binding.render(self, payload)?;
        binding.commit(self)?;
        Ok(vm)
    }

    /// Offer a new payload to a registered view model
    pub fn update_payload(&self, id: &str, payload: Payload) -> Result<()> {
        self.require_store(id)?.update_payload(id, payload)
    }

    /// Release one reference on `id`; the unmount runs on the host executor
    pub fn schedule_detach(&self, id: &str) -> Result<()> {
        let work = self.require_store(id)?.detach(id)?;
        self.spawn(work)
    }

    /// `false` when there is no store in scope
    pub fn is_able_to_render_view(&self, id: &str) -> bool {
        self.store
            .as_ref()
            .is_some_and(|store| store.is_able_to_render_view(id))
    }

    fn require_store(&self, id: &str) -> Result<&ViewModelStore> {
        self.store.as_ref().ok_or_else(|| ViewModelError::MissingStore {
            lookup: Lookup::id(id).to_string(),
        })
    }
}

impl fmt::Debug for BindingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingScope")
            .field("store", &self.store.is_some())
            .field("active", &self.active.as_ref().map(|vm| vm.id().to_string()))
            .finish_non_exhaustive()
    }
}
