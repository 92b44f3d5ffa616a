//! Add-in tree core library.
//!
//! Independently packaged add-ins contribute typed declarations (codons) to
//! shared extension points (nodes). Consumers ask a node for its items and
//! receive an ordered, guard-filtered list of objects built by pluggable
//! doozers, with contributing modules loaded lazily on first use.

pub mod addin;
pub mod build;
pub mod builtins;
pub mod bus;
pub mod condition;
pub mod config;
pub mod declaration;
pub mod doozer;
pub mod error;
pub mod host;
pub mod metrics;
pub mod obs;
pub mod ordering;
pub mod paths;
pub mod properties;
pub mod registry;
pub mod runtime;
pub mod sandbox;
pub mod telemetry;
pub mod tree;

#[cfg(test)]
mod testing;

pub use addin::AddIn;
pub use build::{BuildItemArgs, BuildItemsArgs, BuildRequest};
pub use builtins::{register_defaults, ClassDoozer, HiddenEvaluator, IncludeDoozer, ListenDoozer};
pub use bus::{EventBus, EventHandler, Propagation, SubscriptionId};
pub use condition::{failed_action, Condition, ConditionKind, FailedAction};
pub use config::{AddInConfig, HostConfig, ResolvedAddIn};
pub use declaration::{DeclarationReader, Element, ElementCursor, ElementKind};
pub use doozer::{
    command_item, BuildOutput, Command, ConditionContext, ConditionEvaluator, Doozer, Item,
};
pub use error::{AddInError, Result};
pub use host::{AddInHost, AutostartReport, AUTOSTART_PATH};
pub use properties::Properties;
pub use registry::{Binding, DoozerRegistry, EvaluatorRegistry, LazyBinding};
pub use runtime::{
    Export, ModuleFactory, ModuleInstance, ModuleLoader, Runtime, RuntimeKind,
    StaticModuleLoader,
};
pub use sandbox::{Sandbox, WeakSandbox};
pub use tree::{Codon, Node};

pub use metrics::METRICS;
pub use obs::{
    emit_add_in_loaded, emit_autostart_command_failed, emit_codon_excluded, emit_items_built,
    emit_module_loaded, node_span, HostSpan,
};
pub use telemetry::init_tracing;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
