//! Doozers and evaluators every host registers: `Class`, `Include`,
//! `Listen` and the `Hidden` evaluator.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::build::{BuildItemArgs, BuildItemsArgs, BuildRequest};
use crate::bus::{EventHandler, Propagation};
use crate::doozer::{BuildOutput, ConditionContext, ConditionEvaluator, Doozer, Item};
use crate::error::{AddInError, Result};
use crate::runtime::{Export, ModuleInstance};
use crate::sandbox::{Sandbox, WeakSandbox};

pub fn register_defaults(sandbox: &Sandbox) {
    sandbox.doozers().set("Class", Arc::new(ClassDoozer));
    sandbox.doozers().set("Include", Arc::new(IncludeDoozer));
    sandbox.doozers().set("Listen", Arc::new(ListenDoozer));
    sandbox.evaluators().set("Hidden", Arc::new(HiddenEvaluator));
}

fn required<'a>(request: &'a BuildRequest, element: &str, attribute: &str) -> Result<&'a str> {
    request
        .codon()
        .properties()
        .non_empty(attribute)
        .ok_or_else(|| AddInError::missing_attribute(element, attribute))
}

/// Builds a module instance, or one of its exports when `point` is set.
///
/// The module comes from runtime `from` (searched in `addin`, then the
/// codon's add-in, then every add-in) or is loaded directly from `path`.
pub struct ClassDoozer;

impl ClassDoozer {
    async fn module(&self, request: &BuildRequest) -> Result<(Arc<ModuleInstance>, String)> {
        let codon = request.codon();
        let properties = codon.properties();
        let sandbox = request.sandbox();

        match (properties.non_empty("path"), properties.non_empty("from")) {
            (Some(_), Some(_)) => Err(AddInError::InvalidAttribute {
                element: "Class".to_string(),
                attribute: "path".to_string(),
                reason: "'path' and 'from' are mutually exclusive".to_string(),
            }),
            (Some(path), None) => {
                let factory = sandbox.loader().load(path).await?;
                Ok((Arc::new(factory.instantiate(sandbox)?), path.to_string()))
            }
            (None, Some(from)) => {
                let add_in = properties.non_empty("addin").or(codon.add_in());
                let runtime = sandbox
                    .runtime(from, add_in)
                    .ok_or_else(|| AddInError::RuntimeNotFound {
                        runtime: from.to_string(),
                        add_in: add_in.unwrap_or("*").to_string(),
                    })?;
                Ok((runtime.ready(sandbox).await?, from.to_string()))
            }
            (None, None) => Err(AddInError::missing_attribute("Class", "from")),
        }
    }
}

#[async_trait]
impl Doozer for ClassDoozer {
    async fn build_item(&self, request: BuildRequest) -> Result<BuildOutput> {
        let (module, source) = self.module(&request).await?;
        let codon = request.codon();
        let Some(point) = codon.properties().non_empty("point") else {
            return Ok(BuildOutput::Single(Item::from_arc(module)));
        };
        let export = module.get(point).ok_or_else(|| AddInError::ExportNotFound {
            kind: "export".to_string(),
            name: codon.id().to_string(),
            point: point.to_string(),
            runtime: source,
        })?;
        let item = match export {
            Export::Value(value) => value.clone(),
            other => Item::new(other.clone()),
        };
        Ok(BuildOutput::Single(item))
    }
}

/// Builds codons declared elsewhere: `item` builds the first codon of that
/// node, `path` builds all of its items as one multi-item result. Guards of
/// the include are forwarded to the included codons.
pub struct IncludeDoozer;

#[async_trait]
impl Doozer for IncludeDoozer {
    fn handle_conditions(&self) -> bool {
        true
    }

    async fn build_item(&self, request: BuildRequest) -> Result<BuildOutput> {
        let properties = request.codon().properties();
        let sandbox = request.sandbox();
        let lookup = |path: &str| -> Result<_> {
            sandbox.node(path)?.ok_or_else(|| AddInError::NodeNotFound {
                path: path.to_string(),
            })
        };

        if let Some(item) = properties.non_empty("item") {
            let node = lookup(item)?;
            let args = BuildItemArgs::new()
                .parameter(request.parameter().clone())
                .conditions(request.conditions().to_vec());
            node.build_item(args, sandbox).await
        } else if let Some(path) = properties.non_empty("path") {
            let node = lookup(path)?;
            let args = BuildItemsArgs::new()
                .parameter(request.parameter().clone())
                .conditions(request.conditions().to_vec());
            Ok(BuildOutput::Multiple(node.build_items(args, sandbox).await?))
        } else {
            Err(AddInError::missing_attribute("Include", "item"))
        }
    }
}

/// Subscribes `event` on the bus. When raised, readies runtime `runtime`
/// and forwards to its exported handler `point`. Builds nothing.
pub struct ListenDoozer;

#[async_trait]
impl Doozer for ListenDoozer {
    async fn build_item(&self, request: BuildRequest) -> Result<BuildOutput> {
        let event = required(&request, "Listen", "event")?;
        let handler = ListenHandler {
            sandbox: request.sandbox().downgrade(),
            add_in: request
                .codon()
                .properties()
                .non_empty("addin")
                .or(request.codon().add_in())
                .map(str::to_string),
            runtime: required(&request, "Listen", "runtime")?.to_string(),
            point: required(&request, "Listen", "point")?.to_string(),
        };
        request.sandbox().bus().on(event, Arc::new(handler));
        Ok(BuildOutput::Nothing)
    }
}

struct ListenHandler {
    sandbox: WeakSandbox,
    add_in: Option<String>,
    runtime: String,
    point: String,
}

#[async_trait]
impl EventHandler for ListenHandler {
    async fn handle(&self, event: &str, payload: &Value) -> Result<Propagation> {
        let Some(sandbox) = self.sandbox.upgrade() else {
            return Ok(Propagation::Continue);
        };
        let runtime = sandbox
            .runtime(&self.runtime, self.add_in.as_deref())
            .ok_or_else(|| AddInError::RuntimeNotFound {
                runtime: self.runtime.clone(),
                add_in: self.add_in.clone().unwrap_or_else(|| "*".to_string()),
            })?;
        let module = runtime.ready(&sandbox).await?;
        let handler = module.handler(&self.point).ok_or_else(|| AddInError::ExportNotFound {
            kind: "handler".to_string(),
            name: event.to_string(),
            point: self.point.clone(),
            runtime: self.runtime.clone(),
        })?;
        handler.handle(event, payload).await
    }
}

/// Always invalid.
pub struct HiddenEvaluator;

#[async_trait]
impl ConditionEvaluator for HiddenEvaluator {
    async fn validate(&self, _ctx: &ConditionContext<'_>) -> Result<bool> {
        Ok(false)
    }
}
