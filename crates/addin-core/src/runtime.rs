//! Lazily loaded module bindings.
//!
//! An import runtime loads its module through the sandbox's [`ModuleLoader`]
//! on the first [`Runtime::ready`] call and memoizes the instance; concurrent
//! callers wait for the single in-flight load. A reference runtime borrows the
//! same-named runtime of another add-in and caches what that one resolves to.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::bus::EventHandler;
use crate::declaration::DeclarationReader;
use crate::doozer::{ConditionEvaluator, Doozer, Item};
use crate::error::{AddInError, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::paths;
use crate::properties::Properties;
use crate::sandbox::Sandbox;

/// One named symbol exported by a module instance.
#[derive(Clone)]
pub enum Export {
    Doozer(Arc<dyn Doozer>),
    Evaluator(Arc<dyn ConditionEvaluator>),
    Handler(Arc<dyn EventHandler>),
    Value(Item),
}

impl Export {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Doozer(_) => "doozer",
            Self::Evaluator(_) => "evaluator",
            Self::Handler(_) => "handler",
            Self::Value(_) => "value",
        }
    }
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Export::{}", self.kind())
    }
}

/// What a module factory produces: an explicit export table.
#[derive(Default, Clone)]
pub struct ModuleInstance {
    exports: HashMap<String, Export>,
}

impl ModuleInstance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn export(mut self, name: impl Into<String>, export: Export) -> Self {
        self.exports.insert(name.into(), export);
        self
    }

    pub fn with_doozer(self, name: impl Into<String>, doozer: Arc<dyn Doozer>) -> Self {
        self.export(name, Export::Doozer(doozer))
    }

    pub fn with_evaluator(self, name: impl Into<String>, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.export(name, Export::Evaluator(evaluator))
    }

    pub fn with_handler(self, name: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.export(name, Export::Handler(handler))
    }

    pub fn with_value(self, name: impl Into<String>, value: Item) -> Self {
        self.export(name, Export::Value(value))
    }

    pub fn get(&self, name: &str) -> Option<&Export> {
        self.exports.get(name)
    }

    pub fn doozer(&self, name: &str) -> Option<Arc<dyn Doozer>> {
        match self.exports.get(name)? {
            Export::Doozer(d) => Some(Arc::clone(d)),
            _ => None,
        }
    }

    pub fn evaluator(&self, name: &str) -> Option<Arc<dyn ConditionEvaluator>> {
        match self.exports.get(name)? {
            Export::Evaluator(e) => Some(Arc::clone(e)),
            _ => None,
        }
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn EventHandler>> {
        match self.exports.get(name)? {
            Export::Handler(h) => Some(Arc::clone(h)),
            _ => None,
        }
    }

    pub fn value(&self, name: &str) -> Option<Item> {
        match self.exports.get(name)? {
            Export::Value(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Export names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.exports.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInstance").field("exports", &self.names()).finish()
    }
}

/// Turns a loaded module into an instance bound to a sandbox.
pub trait ModuleFactory: Send + Sync {
    fn instantiate(&self, sandbox: &Sandbox) -> Result<ModuleInstance>;
}

impl<F> ModuleFactory for F
where
    F: Fn(&Sandbox) -> Result<ModuleInstance> + Send + Sync,
{
    fn instantiate(&self, sandbox: &Sandbox) -> Result<ModuleInstance> {
        self(sandbox)
    }
}

/// Transport that fetches a module by locator.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(&self, locator: &str) -> Result<Arc<dyn ModuleFactory>>;
}

/// Loader backed by factories registered in-process under their locators.
#[derive(Default)]
pub struct StaticModuleLoader {
    modules: RwLock<HashMap<String, Arc<dyn ModuleFactory>>>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, locator: impl Into<String>, factory: impl ModuleFactory + 'static) {
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(locator.into(), Arc::new(factory));
    }

    pub fn with(self, locator: impl Into<String>, factory: impl ModuleFactory + 'static) -> Self {
        self.register(locator, factory);
        self
    }
}

#[async_trait]
impl ModuleLoader for StaticModuleLoader {
    async fn load(&self, locator: &str) -> Result<Arc<dyn ModuleFactory>> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(locator)
            .cloned()
            .ok_or_else(|| AddInError::ModuleLoad {
                locator: locator.to_string(),
                reason: "no module registered under this locator".to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeKind {
    /// Owns a module at `path`, relative to the add-in's base location.
    Import { path: String },
    /// Borrows the same-named runtime of add-in `from`.
    Reference { from: String },
}

pub struct Runtime {
    name: String,
    add_in: String,
    base_location: String,
    kind: RuntimeKind,
    properties: Properties,
    instance: OnceCell<Arc<ModuleInstance>>,
}

impl Runtime {
    /// Runtime that loads the module at `path`, resolved against the
    /// add-in's `base_location`.
    pub fn import(
        name: impl Into<String>,
        add_in: impl Into<String>,
        base_location: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            name.into(),
            add_in.into(),
            base_location.into(),
            RuntimeKind::Import { path: path.into() },
            Properties::new(),
        )
    }

    /// Runtime that reuses the same-named runtime of add-in `from`.
    pub fn reference(name: impl Into<String>, add_in: impl Into<String>, from: impl Into<String>) -> Self {
        Self::with_kind(
            name.into(),
            add_in.into(),
            String::new(),
            RuntimeKind::Reference { from: from.into() },
            Properties::new(),
        )
    }

    fn with_kind(
        name: String,
        add_in: String,
        base_location: String,
        kind: RuntimeKind,
        properties: Properties,
    ) -> Self {
        Self {
            name,
            add_in,
            base_location,
            kind,
            properties,
            instance: OnceCell::new(),
        }
    }

    /// Reads an `<Import name path>` or `<Reference name from>` element.
    pub fn read(reader: &dyn DeclarationReader, add_in: &str, base_location: &str) -> Result<Self> {
        let element = reader.name().to_string();
        let properties = Properties::read(reader);
        let required = |attribute: &str| -> Result<String> {
            properties
                .non_empty(attribute)
                .map(str::to_string)
                .ok_or_else(|| AddInError::missing_attribute(&element, attribute))
        };
        let name = required("name")?;
        let kind = if element == "Reference" {
            RuntimeKind::Reference { from: required("from")? }
        } else {
            RuntimeKind::Import { path: required("path")? }
        };
        Ok(Self::with_kind(
            name,
            add_in.to_string(),
            base_location.to_string(),
            kind,
            properties,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the add-in that declared this runtime.
    pub fn add_in(&self) -> &str {
        &self.add_in
    }

    pub fn kind(&self) -> &RuntimeKind {
        &self.kind
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Where an import runtime's module is loaded from.
    pub fn locator(&self) -> Option<String> {
        match &self.kind {
            RuntimeKind::Import { path } => Some(paths::combine([self.base_location.as_str(), path])),
            RuntimeKind::Reference { .. } => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.instance.initialized()
    }

    pub fn instance(&self) -> Option<Arc<ModuleInstance>> {
        self.instance.get().cloned()
    }

    /// Resolves the module instance, loading it on first use.
    pub async fn ready(&self, sandbox: &Sandbox) -> Result<Arc<ModuleInstance>> {
        if let Some(instance) = self.instance.get() {
            return Ok(Arc::clone(instance));
        }
        match &self.kind {
            RuntimeKind::Import { .. } => self.ready_import(sandbox).await,
            RuntimeKind::Reference { from } => {
                let target = self.reference_target(from, sandbox)?;
                let instance = target.ready_import(sandbox).await?;
                let _ = self.instance.set(Arc::clone(&instance));
                Ok(instance)
            }
        }
    }

    async fn ready_import(&self, sandbox: &Sandbox) -> Result<Arc<ModuleInstance>> {
        let instance = self
            .instance
            .get_or_try_init(|| self.load(sandbox))
            .await?;
        Ok(Arc::clone(instance))
    }

    async fn load(&self, sandbox: &Sandbox) -> Result<Arc<ModuleInstance>> {
        let locator = self.locator().unwrap_or_default();
        debug!(runtime = %self.name, add_in = %self.add_in, locator = %locator, "loading module");
        let factory = sandbox.loader().load(&locator).await?;
        let instance = factory.instantiate(sandbox)?;
        METRICS.inc_modules_loaded();
        obs::emit_module_loaded(&self.add_in, &self.name, &locator, instance.names().len());
        Ok(Arc::new(instance))
    }

    /// Follows `from` links until an import runtime is reached.
    fn reference_target(&self, from: &str, sandbox: &Sandbox) -> Result<Arc<Runtime>> {
        let mut chain = vec![format!("{}:{}", self.add_in, self.name)];
        let mut from = from.to_string();
        loop {
            let add_in = sandbox.add_in(&from).ok_or_else(|| AddInError::AddInNotFound {
                from: from.clone(),
                runtime: self.name.clone(),
            })?;
            let runtime = add_in.runtime(&self.name).ok_or_else(|| AddInError::RuntimeNotFound {
                runtime: self.name.clone(),
                add_in: from.clone(),
            })?;
            let key = format!("{}:{}", from, self.name);
            let repeated = chain.contains(&key);
            chain.push(key);
            if repeated {
                return Err(AddInError::RuntimeReferenceCycle { chain });
            }
            match runtime.kind() {
                RuntimeKind::Import { .. } => return Ok(runtime),
                RuntimeKind::Reference { from: next } => from = next.clone(),
            }
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("name", &self.name)
            .field("add_in", &self.add_in)
            .field("kind", &self.kind)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addin::AddIn;
    use crate::declaration::Element;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_loader(locator: &str, loads: Arc<AtomicUsize>) -> Arc<StaticModuleLoader> {
        let loader = StaticModuleLoader::new();
        loader.register(locator, move |_: &Sandbox| -> Result<ModuleInstance> {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(ModuleInstance::new().with_value("greeting", Item::new(String::from("hi"))))
        });
        Arc::new(loader)
    }

    #[test]
    fn test_locator_combines_base_location() {
        let runtime = Runtime::import("ui", "core", "addins/core/", "/ui.module");
        assert_eq!(runtime.locator().as_deref(), Some("addins/core/ui.module"));
        assert!(Runtime::reference("ui", "shell", "core").locator().is_none());
    }

    #[test]
    fn test_read_requires_path_on_import() {
        let doc = Element::new("Import").attr("name", "ui");
        let mut cursor = doc.cursor();
        cursor.advance();
        let err = Runtime::read(&cursor, "core", "").unwrap_err();
        assert!(matches!(err, AddInError::MissingAttribute { ref attribute, .. } if attribute == "path"));
    }

    #[tokio::test]
    async fn test_ready_memoizes_instance() {
        let loads = Arc::new(AtomicUsize::new(0));
        let sandbox = Sandbox::new(counting_loader("core/ui", loads.clone()));
        let runtime = Runtime::import("ui", "core", "core", "ui");

        let first = runtime.ready(&sandbox).await.unwrap();
        let second = runtime.ready(&sandbox).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(runtime.is_resolved());
    }

    #[tokio::test]
    async fn test_missing_module_is_a_load_error() {
        let sandbox = Sandbox::new(Arc::new(StaticModuleLoader::new()));
        let runtime = Runtime::import("ui", "core", "core", "ui");
        let err = runtime.ready(&sandbox).await.unwrap_err();
        assert!(matches!(err, AddInError::ModuleLoad { ref locator, .. } if locator == "core/ui"));
        assert!(!runtime.is_resolved());
    }

    #[tokio::test]
    async fn test_reference_shares_target_instance() {
        let loads = Arc::new(AtomicUsize::new(0));
        let sandbox = Sandbox::new(counting_loader("core/ui", loads.clone()));
        sandbox.register_add_in(Arc::new(
            AddIn::new("core", "core").with_runtime(Runtime::import("ui", "core", "core", "ui")),
        ));
        let reference = Runtime::reference("ui", "shell", "core");

        let borrowed = reference.ready(&sandbox).await.unwrap();
        let owned = sandbox.runtime("ui", Some("core")).unwrap().ready(&sandbox).await.unwrap();
        assert!(Arc::ptr_eq(&borrowed, &owned));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reference_to_unknown_add_in_fails() {
        let sandbox = Sandbox::new(Arc::new(StaticModuleLoader::new()));
        let err = Runtime::reference("ui", "shell", "ghost").ready(&sandbox).await.unwrap_err();
        assert!(matches!(err, AddInError::AddInNotFound { ref from, .. } if from == "ghost"));
    }

    #[tokio::test]
    async fn test_reference_cycle_is_detected() {
        let sandbox = Sandbox::new(Arc::new(StaticModuleLoader::new()));
        sandbox.register_add_in(Arc::new(
            AddIn::new("a", "a").with_runtime(Runtime::reference("ui", "a", "b")),
        ));
        sandbox.register_add_in(Arc::new(
            AddIn::new("b", "b").with_runtime(Runtime::reference("ui", "b", "a")),
        ));
        let runtime = sandbox.runtime("ui", Some("a")).unwrap();
        let err = runtime.ready(&sandbox).await.unwrap_err();
        assert!(matches!(err, AddInError::RuntimeReferenceCycle { .. }));
    }

    #[tokio::test]
    async fn test_reference_to_missing_runtime_fails() {
        let sandbox = Sandbox::new(Arc::new(StaticModuleLoader::new()));
        sandbox.register_add_in(Arc::new(AddIn::new("core", "core")));
        let err = Runtime::reference("ui", "shell", "core").ready(&sandbox).await.unwrap_err();
        assert!(matches!(err, AddInError::RuntimeNotFound { ref add_in, .. } if add_in == "core"));
    }
}
