mod common;

use common::{Panel, Sidebar};
use futures::executor::LocalPool;
use std::rc::Rc;
use vmkit_bind::prelude::*;

#[test]
fn test_strict_lookup_reports_what_was_requested() {
    let pool = LocalPool::new();
    let scope = BindingScope::with_store(ViewModelStore::new(), pool.spawner());

    let mut by_id = ViewModelLookup::<Panel>::new("missing-panel").strict(true);
    let err = by_id.resolve(&scope).unwrap_err();
    assert!(matches!(err, ViewModelError::NotFound { .. }));
    assert!(err.to_string().contains("missing-panel"));

    let mut by_class = ViewModelLookup::<Sidebar>::by_class().strict(true);
    let err = by_class.resolve(&scope).unwrap_err();
    assert!(err.to_string().contains("Sidebar"));
}

#[test]
fn test_lookup_without_store() {
    let pool = LocalPool::new();
    let scope = BindingScope::new(pool.spawner());

    let err = ViewModelLookup::<Panel>::new("p")
        .strict(false)
        .resolve(&scope)
        .unwrap_err();
    assert!(matches!(err, ViewModelError::MissingStore { .. }));
    assert!(err.to_string().contains("'p'"));
}

#[test]
fn test_permissive_lookup_falls_back_to_last_known() {
    let mut pool = LocalPool::new();
    let scope = BindingScope::with_store(ViewModelStore::new(), pool.spawner());

    let panel = scope.resolve_and_attach::<Panel>(Payload::Null, Some("p")).unwrap();
    pool.run_until_stalled();

    let mut permissive = ViewModelLookup::<Panel>::new("p").strict(false);
    let mut strict = ViewModelLookup::<Panel>::new("p").strict(true);
    assert!(Rc::ptr_eq(&permissive.resolve(&scope).unwrap(), &panel));
    assert!(Rc::ptr_eq(&strict.resolve(&scope).unwrap(), &panel));

    scope.schedule_detach("p").unwrap();
    pool.run_until_stalled();

    assert!(Rc::ptr_eq(&permissive.resolve(&scope).unwrap(), &panel));
    assert!(matches!(
        strict.resolve(&scope),
        Err(ViewModelError::NotFound { .. })
    ));

    // Never seen before: nothing to fall back to
    let mut fresh = ViewModelLookup::<Panel>::new("p").strict(false);
    assert!(fresh.resolve(&scope).is_err());
}

#[test]
fn test_lookup_class_mismatch() {
    let mut pool = LocalPool::new();
    let scope = BindingScope::with_store(ViewModelStore::new(), pool.spawner());
    scope.resolve_and_attach::<Sidebar>(Payload::Null, Some("side")).unwrap();
    pool.run_until_stalled();

    let err = ViewModelLookup::<Panel>::new("side").resolve(&scope).unwrap_err();
    match err {
        ViewModelError::ClassMismatch { id, expected, found } => {
            assert_eq!(id, "side");
            assert!(expected.ends_with("Panel"));
            assert!(found.ends_with("Sidebar"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_active_view_model_walks_parents() {
    let pool = LocalPool::new();
    let scope = BindingScope::with_store(ViewModelStore::new(), pool.spawner());

    assert!(matches!(
        active_view_model::<Sidebar>(&scope),
        Err(ViewModelError::NoActiveViewModel)
    ));

    let mut outer = ViewModelBinding::<Sidebar>::new().with_id("outer");
    let sidebar = outer.render(&scope, Payload::Null).unwrap();
    let inside_sidebar = scope.nested(sidebar.clone());

    let mut inner = ViewModelBinding::<Panel>::new().with_id("inner");
    let panel = inner.render(&inside_sidebar, Payload::Null).unwrap();
    let inside_panel = inside_sidebar.nested(panel.clone());

    let nearest = active_view_model::<Panel>(&inside_panel).unwrap();
    assert!(Rc::ptr_eq(&nearest, &panel));
    let ancestor = active_view_model::<Sidebar>(&inside_panel).unwrap();
    assert!(Rc::ptr_eq(&ancestor, &sidebar));

    let err = active_view_model::<Panel>(&inside_sidebar).unwrap_err();
    assert!(matches!(err, ViewModelError::ClassMismatch { .. }));
}
