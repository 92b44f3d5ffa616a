//! The boundary object handed to every loaded module.
//!
//! A [`Sandbox`] owns one tree root, the doozer and evaluator registries, the
//! loaded add-ins, the event bus and the module loader. It is a cheap handle:
//! clones share state. Nothing inside the sandbox holds a strong handle back
//! to it; long-lived callbacks keep a [`WeakSandbox`].

use std::sync::{Arc, PoisonError, RwLock, Weak};

use crate::addin::AddIn;
use crate::bus::EventBus;
use crate::error::Result;
use crate::paths;
use crate::registry::{DoozerRegistry, EvaluatorRegistry};
use crate::runtime::{ModuleLoader, Runtime};
use crate::tree::Node;

struct Inner {
    root: Arc<Node>,
    doozers: DoozerRegistry,
    evaluators: EvaluatorRegistry,
    add_ins: RwLock<Vec<Arc<AddIn>>>,
    bus: EventBus,
    loader: Arc<dyn ModuleLoader>,
}

#[derive(Clone)]
pub struct Sandbox {
    inner: Arc<Inner>,
}

/// Non-owning sandbox handle.
#[derive(Clone)]
pub struct WeakSandbox {
    inner: Weak<Inner>,
}

impl WeakSandbox {
    pub fn upgrade(&self) -> Option<Sandbox> {
        self.inner.upgrade().map(|inner| Sandbox { inner })
    }
}

impl Sandbox {
    /// Creates an empty sandbox: no add-ins, no doozers, no evaluators.
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: Node::root(),
                doozers: DoozerRegistry::new(),
                evaluators: EvaluatorRegistry::new(),
                add_ins: RwLock::new(Vec::new()),
                bus: EventBus::new(),
                loader,
            }),
        }
    }

    /// Creates a sandbox with the builtin doozers and evaluators registered.
    pub fn with_defaults(loader: Arc<dyn ModuleLoader>) -> Self {
        let sandbox = Self::new(loader);
        crate::builtins::register_defaults(&sandbox);
        sandbox
    }

    pub fn downgrade(&self) -> WeakSandbox {
        WeakSandbox {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn root(&self) -> &Arc<Node> {
        &self.inner.root
    }

    /// Looks up an existing node by absolute path.
    pub fn node(&self, path: &str) -> Result<Option<Arc<Node>>> {
        self.inner.root.locate(path, false)
    }

    /// Looks up a node by absolute path, creating missing segments.
    pub fn node_or_create(&self, path: &str) -> Result<Arc<Node>> {
        let node = self.inner.root.locate(path, true)?;
        Ok(node.unwrap_or_else(|| Arc::clone(&self.inner.root)))
    }

    pub fn doozers(&self) -> &DoozerRegistry {
        &self.inner.doozers
    }

    pub fn evaluators(&self) -> &EvaluatorRegistry {
        &self.inner.evaluators
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn loader(&self) -> &Arc<dyn ModuleLoader> {
        &self.inner.loader
    }

    /// Loaded add-ins in registration order.
    pub fn add_ins(&self) -> Vec<Arc<AddIn>> {
        self.inner
            .add_ins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn add_in(&self, name: &str) -> Option<Arc<AddIn>> {
        self.inner
            .add_ins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|a| a.name() == name)
            .cloned()
    }

    pub fn register_add_in(&self, add_in: Arc<AddIn>) {
        self.inner
            .add_ins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(add_in);
    }

    /// Finds runtime `name`, searching add-in `add_in` first and then every
    /// other loaded add-in in registration order.
    pub fn runtime(&self, name: &str, add_in: Option<&str>) -> Option<Arc<Runtime>> {
        let add_ins = self.add_ins();
        if let Some(preferred) = add_in {
            let found = add_ins
                .iter()
                .find(|a| a.name() == preferred)
                .and_then(|a| a.runtime(name));
            if found.is_some() {
                return found;
            }
        }
        add_ins
            .iter()
            .filter(|a| Some(a.name()) != add_in)
            .find_map(|a| a.runtime(name))
    }

    pub fn combine_path(&self, base: &str, relative: &str) -> String {
        paths::combine([base, relative])
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("add_ins", &self.add_ins().iter().map(|a| a.name().to_string()).collect::<Vec<_>>())
            .field("doozers", &self.inner.doozers)
            .field("evaluators", &self.inner.evaluators)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::StaticModuleLoader;

    fn sandbox() -> Sandbox {
        Sandbox::new(Arc::new(StaticModuleLoader::new()))
    }

    #[test]
    fn test_runtime_lookup_prefers_named_add_in() {
        let sb = sandbox();
        sb.register_add_in(Arc::new(
            AddIn::new("a", "a").with_runtime(Runtime::import("ui", "a", "a", "ui")),
        ));
        sb.register_add_in(Arc::new(
            AddIn::new("b", "b").with_runtime(Runtime::import("ui", "b", "b", "ui")),
        ));
        assert_eq!(sb.runtime("ui", Some("b")).unwrap().add_in(), "b");
        assert_eq!(sb.runtime("ui", None).unwrap().add_in(), "a");
        assert_eq!(sb.runtime("ui", Some("ghost")).unwrap().add_in(), "a");
        assert!(sb.runtime("data", None).is_none());
    }

    #[test]
    fn test_weak_handle_does_not_keep_sandbox_alive() {
        let sb = sandbox();
        let weak = sb.downgrade();
        assert!(weak.upgrade().is_some());
        drop(sb);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_node_lookup_does_not_create() {
        let sb = sandbox();
        assert!(sb.node("/workbench").unwrap().is_none());
        let created = sb.node_or_create("/workbench").unwrap();
        assert!(Arc::ptr_eq(&created, &sb.node("/workbench").unwrap().unwrap()));
    }
}
