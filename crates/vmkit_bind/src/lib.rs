//! vmkit Bind
//!
//! The glue between a UI framework's component instances and vmkit view
//! models. A host provides a [`BindingScope`] (store, enclosing view model,
//! executor) and drives each [`ViewModelBinding`] through render, commit and
//! teardown. Without a store in scope bindings fall back to local mode.
//!
//! # Example
//!
//! ```ignore
//! use futures::executor::LocalPool;
//! use vmkit_bind::prelude::*;
//!
//! let mut pool = LocalPool::new();
//! let scope = BindingScope::with_store(ViewModelStore::new(), pool.spawner());
//!
//! let mut binding = ViewModelBinding::<Counter>::new().with_id("counter");
//! let counter = binding.render(&scope, Payload::from(1))?;
//! binding.commit(&scope)?;
//! pool.run_until_stalled();
//!
//! assert!(binding.gate().is_ready());
//! ```

pub mod binding;
pub mod lookup;
pub mod scope;

pub use binding::{RenderGate, ViewModelBinding};
pub use lookup::{active_view_model, ViewModelLookup};
pub use scope::BindingScope;

/// Everything a host needs to bind view models
pub mod prelude {
    pub use crate::{active_view_model, BindingScope, RenderGate, ViewModelBinding, ViewModelLookup};
    pub use vmkit_core::{
        Anchor, ConfigOverrides, CreateViewModel, Lookup, Payload, PayloadCompare,
        PayloadComputed, PayloadObservable, ViewModel, ViewModelCore, ViewModelError,
        ViewModelParams, ViewModelStore,
    };
}
