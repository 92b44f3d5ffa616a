//! Materialization: node → codons → doozer invocations.
//!
//! `Node::build_items` builds every selected codon concurrently and writes
//! each result into the slot of its codon, so the output follows the final
//! codon order no matter which build completes first. Any error fails the
//! whole call.

use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::Value;
use tracing::Instrument;

use crate::condition::{self, Condition, FailedAction};
use crate::doozer::{BuildOutput, Item};
use crate::error::{AddInError, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::sandbox::Sandbox;
use crate::tree::{Codon, Node};

/// Arguments of [`Node::build_items`].
#[derive(Debug, Clone, Default)]
pub struct BuildItemsArgs {
    /// Only codons of this type are built when set.
    pub name: Option<String>,
    /// Build parameter; `None` means null, or the parent's parameter for
    /// sub-item builds.
    pub parameter: Option<Value>,
    /// Extra guards applied to every selected codon. `None` means none, or
    /// the parent's guards for sub-item builds.
    pub conditions: Option<Vec<Arc<Condition>>>,
}

impl BuildItemsArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the build to codons of type `name`.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn parameter(mut self, parameter: Value) -> Self {
        self.parameter = Some(parameter);
        self
    }

    /// Sets the guards explicitly; an empty list still counts as supplied.
    pub fn conditions(mut self, conditions: Vec<Arc<Condition>>) -> Self {
        self.conditions = Some(conditions);
        self
    }
}

/// Arguments of [`Node::build_item`] and [`Codon::build_item`].
#[derive(Debug, Clone, Default)]
pub struct BuildItemArgs {
    /// Codon to build; a node defaults to its first codon.
    pub codon: Option<Arc<Codon>>,
    pub parameter: Value,
    pub conditions: Vec<Arc<Condition>>,
    /// Node holding the codon's sub-items.
    pub sub_item_node: Option<Arc<Node>>,
}

impl BuildItemArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn codon(mut self, codon: Arc<Codon>) -> Self {
        self.codon = Some(codon);
        self
    }

    pub fn parameter(mut self, parameter: Value) -> Self {
        self.parameter = parameter;
        self
    }

    pub fn conditions(mut self, conditions: Vec<Arc<Condition>>) -> Self {
        self.conditions = conditions;
        self
    }
}

/// Normalized request handed to a doozer.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    parameter: Value,
    codon: Arc<Codon>,
    conditions: Vec<Arc<Condition>>,
    sub_item_node: Option<Arc<Node>>,
    failed_action: FailedAction,
    sandbox: Sandbox,
}

impl BuildRequest {
    pub fn parameter(&self) -> &Value {
        &self.parameter
    }

    pub fn codon(&self) -> &Arc<Codon> {
        &self.codon
    }

    /// Effective guards: the caller's followed by the codon's own.
    pub fn conditions(&self) -> &[Arc<Condition>] {
        &self.conditions
    }

    pub fn sub_item_node(&self) -> Option<&Arc<Node>> {
        self.sub_item_node.as_ref()
    }

    /// Outcome of central guard evaluation. `Disable` means the item should
    /// be built in a disabled state. Always `Nothing` for doozers that handle
    /// conditions themselves.
    pub fn failed_action(&self) -> FailedAction {
        self.failed_action
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Evaluates the effective guards; for doozers that handle conditions.
    pub async fn evaluate_conditions(&self) -> Result<FailedAction> {
        condition::failed_action(&self.conditions, &self.parameter, &self.sandbox).await
    }

    /// Builds the codon's sub-items with this request's parameter and guards.
    pub async fn build_sub_items(&self) -> Result<Vec<Item>> {
        self.build_sub_items_with(BuildItemsArgs::new()).await
    }

    /// Builds the codon's sub-items. A parameter or guard list left unset in
    /// `args` is taken from this request.
    pub async fn build_sub_items_with(&self, mut args: BuildItemsArgs) -> Result<Vec<Item>> {
        let Some(node) = &self.sub_item_node else {
            return Ok(Vec::new());
        };
        args.parameter.get_or_insert_with(|| self.parameter.clone());
        args.conditions.get_or_insert_with(|| self.conditions.clone());
        node.build_items(args, &self.sandbox).await
    }
}

impl Node {
    /// Builds the selected codons in final order, splicing multi-item results.
    pub async fn build_items(&self, args: BuildItemsArgs, sandbox: &Sandbox) -> Result<Vec<Item>> {
        let span = obs::node_span(self.path());
        async move {
            let selected: Vec<Arc<Codon>> = self
                .ordered_codons()?
                .into_iter()
                .filter(|c| args.name.as_deref().map_or(true, |n| c.name() == n))
                .collect();
            let codon_count = selected.len();
            let parameter = args.parameter.unwrap_or_default();
            let conditions = args.conditions.unwrap_or_default();

            let builds = selected.into_iter().map(|codon| {
                let item_args = BuildItemArgs {
                    codon: Some(codon),
                    parameter: parameter.clone(),
                    conditions: conditions.clone(),
                    sub_item_node: None,
                };
                self.build_item(item_args, sandbox)
            });
            let outputs = try_join_all(builds).await?;

            let mut items = Vec::new();
            for output in outputs {
                output.append_to(&mut items);
            }
            METRICS.add_items_built(items.len() as u64);
            obs::emit_items_built(self.path(), codon_count, items.len());
            Ok(items)
        }
        .instrument(span)
        .await
    }

    /// Builds one codon of this node, by default the first declared one.
    pub async fn build_item(&self, args: BuildItemArgs, sandbox: &Sandbox) -> Result<BuildOutput> {
        let codon = match args.codon {
            Some(codon) => codon,
            None => self
                .codons()
                .into_iter()
                .next()
                .ok_or_else(|| AddInError::NoCodons {
                    path: self.path().to_string(),
                })?,
        };

        let mut conditions = args.conditions;
        conditions.extend(codon.conditions().iter().cloned());
        let sub_item_node = self.child(codon.id());

        let item_args = BuildItemArgs {
            codon: Some(Arc::clone(&codon)),
            parameter: args.parameter,
            conditions,
            sub_item_node,
        };
        codon.build_item(item_args, sandbox).await
    }
}

impl Codon {
    /// Resolves this codon's doozer, applies guards unless the doozer handles
    /// them, and invokes it. `args.conditions` must already be the effective
    /// guard list.
    pub async fn build_item(self: &Arc<Self>, args: BuildItemArgs, sandbox: &Sandbox) -> Result<BuildOutput> {
        let binding = sandbox
            .doozers()
            .get(self.name())
            .ok_or_else(|| AddInError::DoozerNotFound {
                name: self.name().to_string(),
                codon: self.to_string(),
            })?;

        let failed_action = if binding.handle_conditions() {
            FailedAction::Nothing
        } else {
            condition::failed_action(&args.conditions, &args.parameter, sandbox).await?
        };
        if failed_action == FailedAction::Exclude {
            METRICS.inc_codons_excluded();
            obs::emit_codon_excluded(self.name(), self.id());
            return Ok(BuildOutput::Nothing);
        }

        let doozer = sandbox.doozers().materialize(self.name(), binding, sandbox).await?;
        let request = BuildRequest {
            parameter: args.parameter,
            codon: Arc::clone(self),
            conditions: args.conditions,
            sub_item_node: args.sub_item_node,
            failed_action,
            sandbox: sandbox.clone(),
        };
        doozer.build_item(request).await
    }
}
