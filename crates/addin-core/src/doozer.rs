//! Contracts implemented by contributed modules: doozers build items, evaluators
//! decide conditions, commands run at autostart.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::build::BuildRequest;
use crate::properties::Properties;
use crate::sandbox::Sandbox;
use crate::Result;

/// A materialized, domain-agnostic object produced by a doozer.
#[derive(Clone)]
pub struct Item(Arc<dyn Any + Send + Sync>);

impl Item {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self(value)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).downcast::<T>().ok()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    /// True when both handles point at the same object.
    pub fn ptr_eq(&self, other: &Item) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.downcast_ref::<String>() {
            return f.debug_tuple("Item").field(s).finish();
        }
        f.write_str("Item(..)")
    }
}

/// What one doozer invocation produced.
#[derive(Debug, Clone, Default)]
pub enum BuildOutput {
    /// Excluded by a condition, or the doozer produced nothing.
    #[default]
    Nothing,
    Single(Item),
    /// A sequence to splice into the parent's result list.
    Multiple(Vec<Item>),
}

impl BuildOutput {
    pub fn is_nothing(&self) -> bool {
        matches!(self, Self::Nothing)
    }

    /// Flattens into `out`, preserving relative order.
    pub fn append_to(self, out: &mut Vec<Item>) {
        match self {
            Self::Nothing => {}
            Self::Single(item) => out.push(item),
            Self::Multiple(items) => out.extend(items),
        }
    }

    pub fn into_vec(self) -> Vec<Item> {
        let mut out = Vec::new();
        self.append_to(&mut out);
        out
    }
}

/// Builder that turns a codon into a concrete runtime object.
#[async_trait]
pub trait Doozer: Send + Sync {
    /// When true the doozer runs regardless of guard conditions and is
    /// responsible for them itself.
    fn handle_conditions(&self) -> bool {
        false
    }

    async fn build_item(&self, request: BuildRequest) -> Result<BuildOutput>;
}

/// Inputs visible to an evaluator while deciding one leaf condition.
pub struct ConditionContext<'a> {
    /// Attributes declared on the `<Condition>` element.
    pub properties: &'a Properties,
    /// Caller-supplied build parameter.
    pub parameter: &'a Value,
    pub sandbox: &'a Sandbox,
}

/// Implementation behind a named condition.
///
/// Failures must be reported through the returned `Result`; the tree turns
/// them into [`crate::AddInError::EvaluatorFailed`] for the branch being built.
#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    async fn validate(&self, ctx: &ConditionContext<'_>) -> Result<bool>;
}

/// Item shape expected under `/autostart`.
pub trait Command: Send + Sync {
    fn execute(&self) -> anyhow::Result<()>;
}

/// Wraps a command so it can travel through the build pipeline as an [`Item`].
pub fn command_item(command: Arc<dyn Command>) -> Item {
    Item::new(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_downcasts_to_stored_type() {
        let item = Item::new(String::from("Open"));
        assert_eq!(item.downcast_ref::<String>().map(String::as_str), Some("Open"));
        assert!(item.downcast_ref::<u32>().is_none());
        assert!(item.is::<String>());
        let shared = item.downcast::<String>().unwrap();
        assert_eq!(shared.as_str(), "Open");
    }

    #[test]
    fn test_build_output_flattens_in_order() {
        let mut out = vec![Item::new(0u8)];
        BuildOutput::Multiple(vec![Item::new(1u8), Item::new(2u8)]).append_to(&mut out);
        BuildOutput::Nothing.append_to(&mut out);
        BuildOutput::Single(Item::new(3u8)).append_to(&mut out);
        let got: Vec<u8> = out.iter().map(|i| *i.downcast_ref::<u8>().unwrap()).collect();
        assert_eq!(got, vec![0, 1, 2, 3]);
    }
}
