//! Creation/reconciliation protocol
//!
//! A [`ViewModelBinding`] is owned by one UI binding activation (a component
//! instance). The host drives it through three phases:
//!
//! 1. [`render`](ViewModelBinding::render) on every render pass: resolves
//!    the id, reuses or constructs the view model, stages fresh instances
//!    and forwards the payload
//! 2. [`commit`](ViewModelBinding::commit) once the host commits the
//!    binding: attaches (store) or mounts directly (local mode)
//! 3. [`teardown`](ViewModelBinding::teardown) once the host removes it
//!
//! Between render and commit [`gate`](ViewModelBinding::gate) tells the host
//! whether to render the bound content or its fallback.

use crate::scope::BindingScope;
use std::any::type_name;
use std::fmt;
use std::panic::Location;
use std::rc::Rc;
use vmkit_core::{
    downcast_view_model, Anchor, AsViewModel, ConfigOverrides, CreateViewModel, IdContext,
    Payload, Result, ViewModel, ViewModelClass, ViewModelError, ViewModelParams, ViewModelStore,
    ViewModelsConfig,
};

/// What the host should render for a binding
pub enum RenderGate<VM> {
    Ready(Rc<VM>),
    Fallback,
}

impl<VM> RenderGate<VM> {
    pub fn is_ready(&self) -> bool {
        matches!(self, RenderGate::Ready(_))
    }
}

impl<VM> fmt::Debug for RenderGate<VM> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderGate::Ready(_) => f.write_str("Ready"),
            RenderGate::Fallback => f.write_str("Fallback"),
        }
    }
}

struct Resolved<VM> {
    id: String,
    vm: Rc<VM>,
    erased: Rc<dyn ViewModel>,
    /// Registry the view model was resolved in; `None` in local mode
    store: Option<ViewModelStore>,
    /// Constructed and staged by this binding
    staged_here: bool,
    attached: bool,
}

/// Binds one UI binding activation to a view model of class `VM`
pub struct ViewModelBinding<VM> {
    site: &'static Location<'static>,
    explicit_id: Option<String>,
    generated_id: Option<String>,
    anchor: Option<Anchor>,
    overrides: ConfigOverrides,
    resolved: Option<Resolved<VM>>,
}

impl<VM: CreateViewModel> ViewModelBinding<VM> {
    /// A binding for the call site of this function
    #[track_caller]
    pub fn new() -> Self {
        Self {
            site: Location::caller(),
            explicit_id: None,
            generated_id: None,
            anchor: None,
            overrides: ConfigOverrides::default(),
            resolved: None,
        }
    }

    /// Use a fixed id; bindings sharing an id share the instance
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.explicit_id = Some(id.into());
        self
    }

    /// Link `anchor` to `VM` when the instance is created
    pub fn with_anchor(mut self, anchor: impl Into<Anchor>) -> Self {
        self.anchor = Some(anchor.into());
        self
    }

    /// Call-site configuration
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Change the explicit id; takes effect on the next render
    pub fn set_id(&mut self, id: Option<String>) {
        self.explicit_id = id;
    }

    /// Id of the resolved view model
    pub fn id(&self) -> Option<&str> {
        self.resolved.as_ref().map(|resolved| resolved.id.as_str())
    }

    pub fn view_model(&self) -> Option<&Rc<VM>> {
        self.resolved.as_ref().map(|resolved| &resolved.vm)
    }

    pub fn is_attached(&self) -> bool {
        self.resolved.as_ref().is_some_and(|resolved| resolved.attached)
    }

    /// Resolve the view model for this render pass
    ///
    /// Reuses the instance registered under the resolved id, constructing
    /// and staging one when there is none. A reused instance receives
    /// `payload` through [`ViewModel::set_payload`]; nothing is mounted or
    /// unmounted here.
    pub fn render(&mut self, scope: &BindingScope, payload: Payload) -> Result<Rc<VM>> {
        let parent = scope.active().cloned();
        let config = scope.config(&self.overrides);
        let id = self.resolve_id(&config, parent.as_deref());

        if self.resolved.as_ref().is_some_and(|resolved| resolved.id != id) {
            tracing::debug!(id = %id, "binding id changed, releasing previous view model");
            self.teardown(scope)?;
        }

        let existing = match scope.store() {
            Some(store) => store.peek(&id),
            None => self
                .resolved
                .as_ref()
                .filter(|resolved| resolved.id == id)
                .map(|resolved| resolved.erased.clone()),
        };

        let (erased, created) = match existing {
            Some(vm) => (vm, false),
            None => (self.create(scope, config, &id, payload.clone(), parent), true),
        };

        let vm = downcast_view_model::<VM>(erased.clone()).ok_or_else(|| {
            ViewModelError::ClassMismatch {
                id: id.clone(),
                expected: type_name::<VM>(),
                found: erased.class_name(),
            }
        })?;

        if !created {
            erased.set_payload(payload);
        }

        match &mut self.resolved {
            Some(resolved) if resolved.id == id && Rc::ptr_eq(&resolved.erased, &erased) => {}
            slot => {
                *slot = Some(Resolved {
                    id,
                    vm: vm.clone(),
                    erased,
                    store: scope.store().cloned(),
                    staged_here: created,
                    attached: false,
                });
            }
        }
        Ok(vm)
    }

    fn resolve_id(
        &mut self,
        config: &ViewModelsConfig,
        parent: Option<&dyn ViewModel>,
    ) -> String {
        if let Some(id) = &self.explicit_id {
            return id.clone();
        }
        if let Some(id) = &self.generated_id {
            return id.clone();
        }
        let ctx = IdContext::new(type_name::<VM>())
            .with_parent(parent.map(|parent| parent.id()))
            .with_site(self.site);
        // `config` already layers the store's and the scope's overrides
        let id = config.generate_id(&ctx);
        self.generated_id = Some(id.clone());
        id
    }

    fn create(
        &self,
        scope: &BindingScope,
        config: ViewModelsConfig,
        id: &str,
        payload: Payload,
        parent: Option<Rc<dyn ViewModel>>,
    ) -> Rc<dyn ViewModel> {
        let class = ViewModelClass::of::<VM>();
        let config = Rc::new(config);
        let mut params = ViewModelParams::new(id, payload)
            .with_config(config.clone())
            .with_reactive(scope.reactive().clone());
        if let Some(parent) = &parent {
            params = params.with_parent(parent);
        }
        params.anchor = self.anchor.clone();

        match scope.store() {
            Some(store) => {
                store.process_create_config(&class, &mut params);
                let vm = store.create_view_model(&class, params);
                vm.will_mount();
                store.mark_staged(&vm);
                vm
            }
            None => {
                let vm = config.construct(&class, params);
                tracing::debug!(id, "view model created in local mode");
                vm.will_mount();
                vm
            }
        }
    }

    /// Attach the resolved view model; call once the host commits
    pub fn commit(&mut self, scope: &BindingScope) -> Result<()> {
        let Some(resolved) = &mut self.resolved else {
            return Ok(());
        };
        if resolved.attached {
            return Ok(());
        }
        resolved.attached = true;

        let work = match &resolved.store {
            Some(store) => store.attach(&resolved.erased),
            None => {
                if let Some(core) = resolved.erased.core() {
                    core.mark_mounting();
                }
                resolved.erased.clone().mount()
            }
        };
        scope.spawn(work)
    }

    /// Release the view model; call once the host removes the binding
    pub fn teardown(&mut self, scope: &BindingScope) -> Result<()> {
        let Some(resolved) = self.resolved.take() else {
            return Ok(());
        };

        match (&resolved.store, resolved.attached) {
            (Some(store), true) => scope.spawn(store.detach(&resolved.id)?),
            // Never committed: discard the instance if nobody else took it
            (Some(store), false) => {
                if resolved.staged_here && store.is_staged(&resolved.id) {
                    scope.spawn(store.detach(&resolved.id)?)?;
                }
                Ok(())
            }
            (None, true) => {
                let vm = resolved.erased;
                let work = Box::pin(async move {
                    if let Some(core) = vm.core() {
                        core.mark_unmounting();
                    }
                    vm.will_unmount();
                    vm.clone().unmount().await;
                });
                scope.spawn(work)
            }
            (None, false) => Ok(()),
        }
    }

    /// Whether the bound content may render
    ///
    /// Store-backed view models render once they are live and their mount
    /// has settled. Local view models render unless their mounted flag is
    /// false; simple view models have no flag and always render.
    pub fn gate(&self) -> RenderGate<VM> {
        let Some(resolved) = &self.resolved else {
            return RenderGate::Fallback;
        };
        let ready = match &resolved.store {
            Some(store) => store.is_able_to_render_view(&resolved.id),
            None => resolved.erased.core().map_or(true, |core| core.is_mounted()),
        };
        if ready {
            RenderGate::Ready(resolved.vm.clone())
        } else {
            RenderGate::Fallback
        }
    }
}

impl<VM> fmt::Debug for ViewModelBinding<VM> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewModelBinding")
            .field("class", &type_name::<VM>())
            .field("site", &format_args!("{}:{}", self.site.file(), self.site.line()))
            .field("id", &self.resolved.as_ref().map(|resolved| &resolved.id))
            .field("attached", &self.resolved.as_ref().is_some_and(|r| r.attached))
            .finish()
    }
}
