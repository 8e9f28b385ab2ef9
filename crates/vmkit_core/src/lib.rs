//! vmkit Core
//!
//! This crate provides the lifecycle and registry layer behind vmkit view
//! models:
//!
//! - **View Models**: Plain state objects with an externally driven
//!   mount/unmount lifecycle and an observable payload
//! - **Registry**: Reference counted store with a staging heap, class index
//!   and anchor aliases for cross-binding lookup
//! - **Equality Policies**: Identity, shallow, structural, custom or disabled
//!   payload comparison
//! - **Reactive Substrate**: Tracked cells, transactions and memoized
//!   derivations
//!
//! # Example
//!
//! ```rust
//! use std::rc::Rc;
//! use vmkit_core::{
//!     CreateViewModel, Payload, ViewModel, ViewModelClass, ViewModelCore, ViewModelParams,
//!     ViewModelStore,
//! };
//!
//! struct Greeting {
//!     core: ViewModelCore,
//! }
//!
//! impl CreateViewModel for Greeting {
//!     fn create(params: ViewModelParams) -> Self {
//!         Self { core: ViewModelCore::new(&params) }
//!     }
//! }
//!
//! impl ViewModel for Greeting {
//!     fn id(&self) -> &str {
//!         self.core.id()
//!     }
//!
//!     fn core(&self) -> Option<&ViewModelCore> {
//!         Some(&self.core)
//!     }
//! }
//!
//! let store = ViewModelStore::new();
//! let class = ViewModelClass::of::<Greeting>();
//! let vm = store.create_view_model(&class, store.create_params("greeting", "hi".into()));
//! store.mark_staged(&vm);
//!
//! pollster::block_on(store.attach(&vm));
//! assert!(store.is_able_to_render_view("greeting"));
//!
//! vm.set_payload("hello".into());
//! let greeting = store.get_as::<Greeting>("greeting").unwrap();
//! assert_eq!(greeting.core.payload().as_str(), Some("hello"));
//! ```

pub mod config;
pub mod equality;
pub mod error;
pub mod id;
pub mod payload;
pub mod reactive;
pub mod settings;
pub mod store;
pub mod view_model;

pub use config::{
    configure, global_config, reset_global_config, ConfigOverrides, Factory, LifecycleCallback,
    TransitionRunner, ViewModelsConfig, ViewTransitions,
};
pub use equality::{PayloadCompare, PayloadComputed, PayloadEqFn, PayloadObservable};
pub use error::{Result, ViewModelError};
pub use id::{generate_id, GenerateId, IdContext};
pub use payload::{Payload, PayloadMap};
pub use reactive::{
    CellId, Computed, EffectHandle, Observable, ReactionId, ReactiveGraph, ReactiveStats,
    MAX_REACTION_RUNS,
};
pub use settings::ViewModelSettings;
pub use store::{Anchor, Lookup, StoreStats, ViewModelStore, WeakViewModelStore};
pub use view_model::{
    downcast_view_model, settled, AsViewModel, CreateViewModel, LifecycleState, ModelKind,
    Settle, ViewModel, ViewModelClass, ViewModelCore, ViewModelParams,
};

// Abort signal returned by `ViewModelCore::unmount_signal`
pub use tokio_util::sync::CancellationToken;
