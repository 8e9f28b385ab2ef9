//! Looking up view models from a binding
//!
//! Two questions a binding can ask about view models it does not own:
//!
//! - "which view model is registered under this id / class / anchor?"
//!   answered by [`ViewModelLookup`]
//! - "which view model encloses me?" answered by [`active_view_model`]
//!
//! Misses are errors naming what was requested. In permissive mode a
//! [`ViewModelLookup`] that has resolved before keeps returning the last
//! instance it saw instead.

use crate::scope::BindingScope;
use std::any::type_name;
use std::fmt;
use std::rc::Rc;
use vmkit_core::{
    downcast_view_model, AsViewModel, ConfigOverrides, Lookup, Result, ViewModel, ViewModelError,
};

/// A lookup held across render passes
pub struct ViewModelLookup<VM> {
    lookup: Lookup,
    strict: Option<bool>,
    last_known: Option<Rc<VM>>,
}

impl<VM: ViewModel> ViewModelLookup<VM> {
    pub fn new(lookup: impl Into<Lookup>) -> Self {
        Self {
            lookup: lookup.into(),
            strict: None,
            last_known: None,
        }
    }

    /// Look up by the class `VM`
    pub fn by_class() -> Self {
        Self::new(Lookup::class::<VM>())
    }

    /// Override the configured `strict_lookups`
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    pub fn lookup(&self) -> &Lookup {
        &self.lookup
    }

    /// Resolve against the store in `scope`
    pub fn resolve(&mut self, scope: &BindingScope) -> Result<Rc<VM>> {
        match self.find(scope) {
            Ok(vm) => {
                self.last_known = Some(vm.clone());
                Ok(vm)
            }
            Err(err) => {
                let strict = self
                    .strict
                    .unwrap_or_else(|| scope.config(&ConfigOverrides::default()).strict_lookups);
                match &self.last_known {
                    Some(vm) if !strict => {
                        tracing::warn!(lookup = %self.lookup, error = %err, "using last known view model");
                        Ok(vm.clone())
                    }
                    _ => Err(err),
                }
            }
        }
    }

    fn find(&self, scope: &BindingScope) -> Result<Rc<VM>> {
        let store = scope.store().ok_or_else(|| ViewModelError::MissingStore {
            lookup: self.lookup.to_string(),
        })?;
        let vm = store
            .get(&self.lookup)
            .ok_or_else(|| ViewModelError::NotFound {
                lookup: self.lookup.to_string(),
            })?;
        expect_class(vm)
    }
}

impl<VM> fmt::Debug for ViewModelLookup<VM> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewModelLookup")
            .field("lookup", &self.lookup)
            .field("strict", &self.strict)
            .field("has_last_known", &self.last_known.is_some())
            .finish()
    }
}

fn expect_class<VM: ViewModel>(vm: Rc<dyn ViewModel>) -> Result<Rc<VM>> {
    let id = vm.id().to_string();
    let found = vm.class_name();
    downcast_view_model(vm).ok_or(ViewModelError::ClassMismatch {
        id,
        expected: type_name::<VM>(),
        found,
    })
}

/// Nearest enclosing view model of class `VM`
///
/// Starts at the scope's active view model and follows parent references.
pub fn active_view_model<VM: ViewModel>(scope: &BindingScope) -> Result<Rc<VM>> {
    let active = scope.active().ok_or(ViewModelError::NoActiveViewModel)?;

    let mut current = Some(active.clone());
    while let Some(vm) = current {
        if let Some(found) = downcast_view_model::<VM>(vm.clone()) {
            return Ok(found);
        }
        current = vm.core().and_then(|core| core.parent_view_model());
    }

    Err(ViewModelError::ClassMismatch {
        id: active.id().to_string(),
        expected: type_name::<VM>(),
        found: active.class_name(),
    })
}
