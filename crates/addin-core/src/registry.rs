//! Name → implementation maps for doozers and condition evaluators.
//!
//! Entries are either resolved implementations or lazy bindings declared by
//! an add-in runtime. The first resolution of a lazy binding readies its
//! runtime, extracts the export named by `point`, and replaces the entry so
//! later lookups go straight to the implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::doozer::{ConditionEvaluator, Doozer};
use crate::error::{AddInError, Result};
use crate::metrics::METRICS;
use crate::runtime::{ModuleInstance, Runtime};
use crate::sandbox::Sandbox;

/// Implementation types a registry can hold, and how to pull one out of a
/// module's export table.
pub trait Exported: Send + Sync + 'static {
    const KIND: &'static str;

    fn extract(module: &ModuleInstance, point: &str) -> Option<Arc<Self>>;
}

impl Exported for dyn Doozer {
    const KIND: &'static str = "doozer";

    fn extract(module: &ModuleInstance, point: &str) -> Option<Arc<Self>> {
        module.doozer(point)
    }
}

impl Exported for dyn ConditionEvaluator {
    const KIND: &'static str = "evaluator";

    fn extract(module: &ModuleInstance, point: &str) -> Option<Arc<Self>> {
        module.evaluator(point)
    }
}

/// A deferred binding to export `point` of `runtime`.
#[derive(Clone)]
pub struct LazyBinding {
    runtime: Arc<Runtime>,
    point: String,
    handle_conditions: bool,
}

impl LazyBinding {
    pub fn new(runtime: Arc<Runtime>, point: impl Into<String>) -> Self {
        Self {
            runtime,
            point: point.into(),
            handle_conditions: false,
        }
    }

    /// Declared `handleconditions`, known before the module is loaded.
    pub fn handle_conditions(mut self, value: bool) -> Self {
        self.handle_conditions = value;
        self
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn point(&self) -> &str {
        &self.point
    }
}

pub enum Binding<T: ?Sized> {
    Unresolved(LazyBinding),
    Resolved {
        value: Arc<T>,
        /// `handleconditions` declared for the lazy binding this entry
        /// replaced; `None` for implementations registered directly.
        handle_conditions: Option<bool>,
    },
}

impl<T: ?Sized> Clone for Binding<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Unresolved(lazy) => Self::Unresolved(lazy.clone()),
            Self::Resolved {
                value,
                handle_conditions,
            } => Self::Resolved {
                value: Arc::clone(value),
                handle_conditions: *handle_conditions,
            },
        }
    }
}

impl<T: ?Sized> Binding<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }
}

impl Binding<dyn Doozer> {
    /// Whether the doozer evaluates guard conditions itself.
    ///
    /// A declared `handleconditions` wins over the implementation's own
    /// answer, before and after resolution.
    pub fn handle_conditions(&self) -> bool {
        match self {
            Self::Unresolved(lazy) => lazy.handle_conditions,
            Self::Resolved {
                value,
                handle_conditions,
            } => handle_conditions.unwrap_or_else(|| value.handle_conditions()),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Binding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolved(lazy) => write!(f, "Unresolved({}:{})", lazy.runtime.name(), lazy.point),
            Self::Resolved { .. } => f.write_str("Resolved"),
        }
    }
}

pub struct Registry<T: ?Sized + Exported> {
    entries: RwLock<HashMap<String, Binding<T>>>,
}

pub type DoozerRegistry = Registry<dyn Doozer>;
pub type EvaluatorRegistry = Registry<dyn ConditionEvaluator>;

impl<T: ?Sized + Exported> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: ?Sized + Exported> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `value` under each comma-separated name.
    pub fn set(&self, names: &str, value: Arc<T>) {
        self.insert(
            names,
            Binding::Resolved {
                value,
                handle_conditions: None,
            },
        );
    }

    /// Registers a lazy binding under each comma-separated name.
    pub fn set_lazy(&self, names: &str, binding: LazyBinding) {
        self.insert(names, Binding::Unresolved(binding));
    }

    fn insert(&self, names: &str, binding: Binding<T>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            entries.insert(name.to_string(), binding.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<Binding<T>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = entries.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Looks up `name` and resolves it. `Ok(None)` when nothing is registered.
    pub async fn resolve(&self, name: &str, sandbox: &Sandbox) -> Result<Option<Arc<T>>> {
        match self.get(name) {
            Some(binding) => self.materialize(name, binding, sandbox).await.map(Some),
            None => Ok(None),
        }
    }

    /// Turns a binding obtained from [`Registry::get`] into the implementation.
    pub async fn materialize(&self, name: &str, binding: Binding<T>, sandbox: &Sandbox) -> Result<Arc<T>> {
        let lazy = match binding {
            Binding::Resolved { value, .. } => return Ok(value),
            Binding::Unresolved(lazy) => lazy,
        };

        let module = lazy.runtime.ready(sandbox).await?;
        let value = T::extract(&module, &lazy.point).ok_or_else(|| AddInError::ExportNotFound {
            kind: T::KIND.to_string(),
            name: name.to_string(),
            point: lazy.point.clone(),
            runtime: lazy.runtime.name().to_string(),
        })?;

        {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            // Only replace the placeholder that was resolved; a newer
            // registration under the same name stays.
            let still_lazy = matches!(
                entries.get(name),
                Some(Binding::Unresolved(current))
                    if Arc::ptr_eq(&current.runtime, &lazy.runtime) && current.point == lazy.point
            );
            if still_lazy {
                entries.insert(
                    name.to_string(),
                    Binding::Resolved {
                        value: Arc::clone(&value),
                        handle_conditions: Some(lazy.handle_conditions),
                    },
                );
            }
        }

        METRICS.inc_lazy_bindings_resolved();
        debug!(
            kind = T::KIND,
            name = %name,
            runtime = %lazy.runtime.name(),
            point = %lazy.point,
            "lazy binding resolved"
        );
        Ok(value)
    }
}

impl<T: ?Sized + Exported> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &T::KIND)
            .field("names", &self.names())
            .finish()
    }
}
