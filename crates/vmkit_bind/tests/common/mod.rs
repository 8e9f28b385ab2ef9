#![allow(dead_code)]

use futures::channel::oneshot;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use vmkit_core::{
    AsViewModel, CreateViewModel, Payload, Settle, ViewModel, ViewModelCore, ViewModelParams,
};

thread_local! {
    static JOURNAL: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Route diagnostics to the test output; `RUST_LOG` selects levels
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn record(event: impl Into<String>) {
    JOURNAL.with(|journal| journal.borrow_mut().push(event.into()));
}

/// Every lifecycle event recorded on this thread so far
pub fn journal() -> Vec<String> {
    JOURNAL.with(|journal| journal.borrow().clone())
}

pub fn count(event: &str) -> usize {
    JOURNAL.with(|journal| journal.borrow().iter().filter(|e| *e == event).count())
}

pub fn point(x: i64) -> Payload {
    Payload::map([("x", x.into())])
}

/// Full view model that journals its lifecycle; mount and unmount can be
/// held open with a gate
pub struct Panel {
    pub core: ViewModelCore,
    pub mount_gate: RefCell<Option<oneshot::Receiver<()>>>,
    pub unmount_gate: RefCell<Option<oneshot::Receiver<()>>>,
    pub changes: Cell<usize>,
}

impl Panel {
    /// Hold the next mount open until the returned sender fires
    pub fn hold_mount(&self) -> oneshot::Sender<()> {
        let (open, gate) = oneshot::channel();
        *self.mount_gate.borrow_mut() = Some(gate);
        open
    }

    /// Hold the next unmount open until the returned sender fires
    pub fn hold_unmount(&self) -> oneshot::Sender<()> {
        let (open, gate) = oneshot::channel();
        *self.unmount_gate.borrow_mut() = Some(gate);
        open
    }
}

impl CreateViewModel for Panel {
    fn create(params: ViewModelParams) -> Self {
        record(format!("create:{}", params.id));
        Self {
            core: ViewModelCore::new(&params),
            mount_gate: RefCell::new(None),
            unmount_gate: RefCell::new(None),
            changes: Cell::new(0),
        }
    }
}

impl ViewModel for Panel {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn core(&self) -> Option<&ViewModelCore> {
        Some(&self.core)
    }

    fn will_mount(&self) {
        record(format!("will_mount:{}", self.id()));
    }

    fn mount(self: Rc<Self>) -> Settle {
        Box::pin(async move {
            record(format!("mount:{}", self.id()));
            let gate = self.mount_gate.borrow_mut().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            self.core.mark_mounted(self.as_view_model());
            self.did_mount();
        })
    }

    fn did_mount(&self) {
        record(format!("did_mount:{}", self.id()));
    }

    fn will_unmount(&self) {
        record(format!("will_unmount:{}", self.id()));
    }

    fn unmount(self: Rc<Self>) -> Settle {
        Box::pin(async move {
            record(format!("unmount:{}", self.id()));
            let gate = self.unmount_gate.borrow_mut().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            self.core.mark_unmounted(self.as_view_model());
            self.did_unmount();
        })
    }

    fn did_unmount(&self) {
        record(format!("did_unmount:{}", self.id()));
    }

    fn payload_changed(&self, _next: &Payload, _prev: &Payload) {
        self.changes.set(self.changes.get() + 1);
    }
}

/// A second full class, used as a parent and for class mismatches
pub struct Sidebar {
    pub core: ViewModelCore,
}

impl CreateViewModel for Sidebar {
    fn create(params: ViewModelParams) -> Self {
        Self {
            core: ViewModelCore::new(&params),
        }
    }
}

impl ViewModel for Sidebar {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn core(&self) -> Option<&ViewModelCore> {
        Some(&self.core)
    }
}

/// Simple view model: an id and a hook, no core
pub struct Badge {
    id: String,
}

impl CreateViewModel for Badge {
    fn create(params: ViewModelParams) -> Self {
        Self { id: params.id }
    }
}

impl ViewModel for Badge {
    fn id(&self) -> &str {
        &self.id
    }

    fn did_mount(&self) {
        record(format!("did_mount:{}", self.id));
    }
}

impl std::fmt::Debug for Panel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Panel").field("id", &self.core.id()).finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Sidebar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sidebar").field("id", &self.core.id()).finish_non_exhaustive()
    }
}
