//! View model id generation
//!
//! Ids are process-unique strings. Generated ids carry the short class name
//! and, when known, the source location of the binding that requested them so
//! a registry dump can be traced back to a call site:
//!
//! ```ignore
//! // Without a call site: "{Class}:{seq}"
//! let id = generate_id(&IdContext::new("TodoViewModel"));
//! assert!(id.starts_with("TodoViewModel:"));
//!
//! // With a call site: "{Class}@{file}:{line}:{col}#{site_seq}"
//! let ctx = IdContext::new("TodoViewModel").with_site(Location::caller());
//! ```
//!
//! An explicit id always wins over a generated one; see
//! [`ViewModelStore::generate_id`](crate::store::ViewModelStore::generate_id).

use rustc_hash::FxHashMap;
use std::panic::Location;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{LazyLock, Mutex, PoisonError};

/// Global sequence for ids generated without a call site
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Per call site sequences, keyed by `(file, line, column)`
static SITE_COUNTERS: LazyLock<Mutex<FxHashMap<(&'static str, u32, u32), u64>>> =
    LazyLock::new(|| Mutex::new(FxHashMap::default()));

/// Custom id generator installed through configuration
pub type GenerateId = Rc<dyn Fn(&IdContext<'_>) -> String>;

/// Everything known about an instantiation when an id is generated
#[derive(Clone, Copy, Debug)]
pub struct IdContext<'a> {
    /// Fully qualified type name of the view model class
    pub class_name: &'static str,
    /// Id of the nearest enclosing view model, if any
    pub parent_id: Option<&'a str>,
    /// Source location of the binding that requested the id
    pub site: Option<&'static Location<'static>>,
}

impl<'a> IdContext<'a> {
    pub fn new(class_name: &'static str) -> Self {
        Self {
            class_name,
            parent_id: None,
            site: None,
        }
    }

    pub fn with_parent(mut self, parent_id: Option<&'a str>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_site(mut self, site: &'static Location<'static>) -> Self {
        self.site = Some(site);
        self
    }

    /// Class name without its module path (`app::todo::TodoVm` -> `TodoVm`)
    pub fn short_class_name(&self) -> &'static str {
        short_type_name(self.class_name)
    }
}

/// Strip the module path and generic arguments from a type name
pub fn short_type_name(name: &'static str) -> &'static str {
    let base = name.split('<').next().unwrap_or(name);
    base.rsplit("::").next().unwrap_or(base)
}

/// Default id generator
///
/// Never returns the same string twice within a process.
pub fn generate_id(ctx: &IdContext<'_>) -> String {
    let class = ctx.short_class_name();
    match ctx.site {
        Some(site) => {
            let key = (site.file(), site.line(), site.column());
            let seq = {
                let mut counters = SITE_COUNTERS
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                let counter = counters.entry(key).or_insert(0);
                *counter += 1;
                *counter
            };
            format!("{class}@{}:{}:{}#{seq}", key.0, key.1, key.2)
        }
        None => {
            let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
            format!("{class}:{seq}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_unique_ids_without_site() {
        let ids: HashSet<_> = (0..100)
            .map(|_| generate_id(&IdContext::new("app::Counter")))
            .collect();
        assert_eq!(ids.len(), 100);
        assert!(ids.iter().all(|id| id.starts_with("Counter:")));
    }

    #[test]
    fn test_unique_ids_per_site() {
        let mut ids = Vec::new();
        for _ in 0..5 {
            // Same location on every iteration
            let ctx = IdContext::new("Dropdown").with_site(Location::caller());
            ids.push(generate_id(&ctx));
        }
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 5);
        assert!(ids[0].starts_with("Dropdown@"));
        assert!(ids[0].contains(file!()));
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("a::b::Foo"), "Foo");
        assert_eq!(short_type_name("a::Bar<c::D>"), "Bar");
        assert_eq!(short_type_name("Plain"), "Plain");
    }
}
