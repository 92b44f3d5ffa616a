//! Condition algebra: leaf conditions delegate to named evaluators, composites
//! (AND / OR / NOT) combine them, and [`failed_action`] reduces a guard list to
//! one [`FailedAction`].
//!
//! Every fold is short-circuiting and visits conditions in declaration order,
//! so evaluator side effects are deterministic.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::declaration::{DeclarationReader, ElementKind};
use crate::doozer::ConditionContext;
use crate::error::{AddInError, Result};
use crate::properties::Properties;
use crate::sandbox::Sandbox;

/// What happens to a codon whose guard condition is invalid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedAction {
    Nothing,
    #[default]
    Exclude,
    Disable,
}

impl FailedAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nothing => "nothing",
            Self::Exclude => "exclude",
            Self::Disable => "disable",
        }
    }

    /// Reads the `action` attribute. Unknown values behave like `exclude`.
    pub fn from_attribute(value: Option<&str>) -> Self {
        value.and_then(|v| v.parse().ok()).unwrap_or_default()
    }
}

impl FromStr for FailedAction {
    type Err = AddInError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nothing" => Ok(Self::Nothing),
            "exclude" => Ok(Self::Exclude),
            "disable" => Ok(Self::Disable),
            other => Err(AddInError::InvalidCondition {
                reason: format!("unknown failure action '{other}'"),
            }),
        }
    }
}

impl fmt::Display for FailedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum ConditionKind {
    /// Delegates to the evaluator registered under `evaluator`.
    Leaf {
        evaluator: String,
        properties: Properties,
    },
    And(Vec<Arc<Condition>>),
    Or(Vec<Arc<Condition>>),
    Not(Arc<Condition>),
}

/// One guard. Immutable once read; shared by every codon declared in its scope.
#[derive(Debug)]
pub struct Condition {
    kind: ConditionKind,
    action: FailedAction,
    add_in: Option<String>,
}

impl Condition {
    pub fn leaf(evaluator: impl Into<String>, properties: Properties) -> Self {
        let action = FailedAction::from_attribute(properties.get("action"));
        Self {
            kind: ConditionKind::Leaf {
                evaluator: evaluator.into(),
                properties,
            },
            action,
            add_in: None,
        }
    }

    pub fn and(conditions: Vec<Arc<Condition>>) -> Self {
        Self::composite(ConditionKind::And(conditions))
    }

    pub fn or(conditions: Vec<Arc<Condition>>) -> Self {
        Self::composite(ConditionKind::Or(conditions))
    }

    pub fn not(condition: Arc<Condition>) -> Self {
        Self::composite(ConditionKind::Not(condition))
    }

    fn composite(kind: ConditionKind) -> Self {
        Self {
            kind,
            action: FailedAction::default(),
            add_in: None,
        }
    }

    pub fn with_action(mut self, action: FailedAction) -> Self {
        self.action = action;
        self
    }

    pub fn with_add_in(mut self, add_in: Option<&str>) -> Self {
        self.add_in = add_in.map(str::to_string);
        self
    }

    pub fn kind(&self) -> &ConditionKind {
        &self.kind
    }

    pub fn action(&self) -> FailedAction {
        self.action
    }

    /// Name of the add-in that declared this condition, if any.
    pub fn add_in(&self) -> Option<&str> {
        self.add_in.as_deref()
    }

    /// Decides the condition. Composites short-circuit in list order.
    pub fn validate<'a>(
        &'a self,
        parameter: &'a Value,
        sandbox: &'a Sandbox,
    ) -> BoxFuture<'a, Result<bool>> {
        async move {
            match &self.kind {
                ConditionKind::Leaf {
                    evaluator,
                    properties,
                } => {
                    let implementation = sandbox
                        .evaluators()
                        .resolve(evaluator, sandbox)
                        .await?
                        .ok_or_else(|| AddInError::EvaluatorNotFound {
                            name: evaluator.clone(),
                        })?;
                    let ctx = ConditionContext {
                        properties,
                        parameter,
                        sandbox,
                    };
                    implementation.validate(&ctx).await.map_err(|err| {
                        warn!(evaluator = %evaluator, error = %err, "condition evaluation failed");
                        AddInError::EvaluatorFailed {
                            name: evaluator.clone(),
                            source: Box::new(err),
                        }
                    })
                }
                ConditionKind::And(conditions) => {
                    for condition in conditions {
                        if !condition.validate(parameter, sandbox).await? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                ConditionKind::Or(conditions) => {
                    for condition in conditions {
                        if condition.validate(parameter, sandbox).await? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                ConditionKind::Not(condition) => {
                    Ok(!condition.validate(parameter, sandbox).await?)
                }
            }
        }
        .boxed()
    }

    /// Reads a leaf `<Condition name=..>`; the reader is on its start event.
    pub fn read(reader: &dyn DeclarationReader, add_in: Option<&str>) -> Result<Self> {
        let properties = Properties::read(reader);
        let name = properties
            .non_empty("name")
            .map(str::to_string)
            .ok_or_else(|| AddInError::missing_attribute("Condition", "name"))?;
        Ok(Self::leaf(name, properties).with_add_in(add_in))
    }

    /// Reads a `<ComplexCondition>` whose first entry must be `<And>`, `<Or>` or
    /// `<Not>`. Leaves the reader on that entry's end event; the remaining
    /// children are codons guarded by the returned condition.
    pub fn read_complex(reader: &mut dyn DeclarationReader, add_in: Option<&str>) -> Result<Self> {
        let action = FailedAction::from_attribute(reader.attributes().get("action").map(String::as_str));
        if reader.is_empty() {
            return Err(AddInError::InvalidCondition {
                reason: "<ComplexCondition> must contain <And>, <Or> or <Not>".to_string(),
            });
        }

        while reader.advance() {
            if reader.kind() != Some(ElementKind::Start) {
                continue;
            }
            let condition = match reader.name() {
                "And" => Self::and(read_condition_list(reader, "And", add_in)?),
                "Or" => Self::or(read_condition_list(reader, "Or", add_in)?),
                "Not" => Self::not(read_single(reader, add_in)?),
                other => {
                    return Err(AddInError::InvalidConditionElement {
                        element: other.to_string(),
                        parent: "ComplexCondition".to_string(),
                        expected: "<And>, <Or> or <Not> as the first entry".to_string(),
                    })
                }
            };
            return Ok(condition.with_action(action).with_add_in(add_in));
        }

        Err(AddInError::InvalidCondition {
            reason: "document ended inside <ComplexCondition>".to_string(),
        })
    }
}

fn read_single(reader: &mut dyn DeclarationReader, add_in: Option<&str>) -> Result<Arc<Condition>> {
    let mut inner = read_condition_list(reader, "Not", add_in)?;
    if inner.len() != 1 {
        return Err(AddInError::InvalidCondition {
            reason: format!("<Not> must contain exactly one condition, found {}", inner.len()),
        });
    }
    Ok(inner.remove(0))
}

/// Reads sibling conditions until the end event of `end_element`.
pub fn read_condition_list(
    reader: &mut dyn DeclarationReader,
    end_element: &str,
    add_in: Option<&str>,
) -> Result<Vec<Arc<Condition>>> {
    let mut conditions = Vec::new();
    while reader.advance() {
        match reader.kind() {
            Some(ElementKind::End) if reader.name() == end_element => return Ok(conditions),
            Some(ElementKind::Start) => {
                let condition = match reader.name() {
                    "And" => Condition::and(read_condition_list(reader, "And", add_in)?),
                    "Or" => Condition::or(read_condition_list(reader, "Or", add_in)?),
                    "Not" => Condition::not(read_single(reader, add_in)?),
                    "Condition" => Condition::read(reader, add_in)?,
                    other => {
                        return Err(AddInError::InvalidConditionElement {
                            element: other.to_string(),
                            parent: end_element.to_string(),
                            expected: "<And>, <Or>, <Not> or <Condition>".to_string(),
                        })
                    }
                };
                conditions.push(Arc::new(condition.with_add_in(add_in)));
            }
            _ => {}
        }
    }
    Ok(conditions)
}

/// Folds a guard list into one action.
///
/// Starts at `Nothing`. An invalid condition declared `disable` moves the
/// running result to `Disable` and evaluation continues; any other invalid
/// condition halts with `Exclude`. `Exclude` therefore dominates `Disable`.
pub async fn failed_action(
    conditions: &[Arc<Condition>],
    parameter: &Value,
    sandbox: &Sandbox,
) -> Result<FailedAction> {
    let mut action = FailedAction::Nothing;
    for condition in conditions {
        if condition.validate(parameter, sandbox).await? {
            continue;
        }
        match condition.action() {
            FailedAction::Disable => action = FailedAction::Disable,
            _ => return Ok(FailedAction::Exclude),
        }
    }
    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::Element;
    use crate::runtime::StaticModuleLoader;
    use crate::testing::{Constant, Counting};

    fn sandbox() -> Sandbox {
        let sandbox = Sandbox::new(Arc::new(StaticModuleLoader::new()));
        sandbox.evaluators().set("True", Arc::new(Constant(true)));
        sandbox.evaluators().set("False", Arc::new(Constant(false)));
        sandbox
    }

    fn leaf(name: &str) -> Arc<Condition> {
        Arc::new(Condition::leaf(name, Properties::new()))
    }

    fn leaf_with(name: &str, action: &str) -> Arc<Condition> {
        Arc::new(Condition::leaf(name, Properties::new().with("action", action)))
    }

    #[tokio::test]
    async fn test_empty_and_is_valid_and_empty_or_is_invalid() {
        let sb = sandbox();
        assert!(Condition::and(vec![]).validate(&Value::Null, &sb).await.unwrap());
        assert!(!Condition::or(vec![]).validate(&Value::Null, &sb).await.unwrap());
    }

    #[tokio::test]
    async fn test_double_negation_is_identity() {
        let sb = sandbox();
        for name in ["True", "False"] {
            let plain = leaf(name).validate(&Value::Null, &sb).await.unwrap();
            let twice = Condition::not(Arc::new(Condition::not(leaf(name))));
            assert_eq!(twice.validate(&Value::Null, &sb).await.unwrap(), plain);
        }
    }

    #[tokio::test]
    async fn test_and_stops_at_first_invalid() {
        let sb = sandbox();
        let counter = Arc::new(Counting::new(true));
        sb.evaluators().set("Counted", counter.clone());
        let and = Condition::and(vec![leaf("False"), leaf("Counted")]);
        assert!(!and.validate(&Value::Null, &sb).await.unwrap());
        assert_eq!(counter.calls(), 0);
    }

    #[tokio::test]
    async fn test_or_stops_at_first_valid() {
        let sb = sandbox();
        let counter = Arc::new(Counting::new(false));
        sb.evaluators().set("Counted", counter.clone());
        let or = Condition::or(vec![leaf("True"), leaf("Counted")]);
        assert!(or.validate(&Value::Null, &sb).await.unwrap());
        assert_eq!(counter.calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_action_exclude_dominates_disable() {
        let sb = sandbox();
        let p = Value::Null;
        assert_eq!(
            failed_action(&[leaf("True"), leaf_with("False", "exclude")], &p, &sb).await.unwrap(),
            FailedAction::Exclude
        );
        assert_eq!(
            failed_action(&[leaf_with("False", "disable"), leaf_with("False", "exclude")], &p, &sb)
                .await
                .unwrap(),
            FailedAction::Exclude
        );
        assert_eq!(
            failed_action(&[leaf_with("False", "disable")], &p, &sb).await.unwrap(),
            FailedAction::Disable
        );
        assert_eq!(
            failed_action(&[leaf("True"), leaf("True")], &p, &sb).await.unwrap(),
            FailedAction::Nothing
        );
        assert_eq!(failed_action(&[], &p, &sb).await.unwrap(), FailedAction::Nothing);
    }

    #[tokio::test]
    async fn test_missing_evaluator_is_fatal() {
        let sb = sandbox();
        let err = leaf("Nope").validate(&Value::Null, &sb).await.unwrap_err();
        assert!(matches!(err, AddInError::EvaluatorNotFound { ref name } if name == "Nope"));
    }

    #[tokio::test]
    async fn test_evaluator_error_fails_branch_instead_of_hanging() {
        let sb = sandbox();
        sb.evaluators().set("Broken", Arc::new(crate::testing::Failing));
        let err = leaf("Broken").validate(&Value::Null, &sb).await.unwrap_err();
        assert!(matches!(err, AddInError::EvaluatorFailed { ref name, .. } if name == "Broken"));
    }

    #[test]
    fn test_failed_action_parses_case_insensitively() {
        assert_eq!(FailedAction::from_attribute(Some("Disable")), FailedAction::Disable);
        assert_eq!(FailedAction::from_attribute(Some("bogus")), FailedAction::Exclude);
        assert_eq!(FailedAction::from_attribute(None), FailedAction::Exclude);
    }

    #[test]
    fn test_read_complex_rejects_condition_as_first_entry() {
        let doc = Element::new("ComplexCondition").child(Element::new("Condition").attr("name", "X"));
        let mut cursor = doc.cursor();
        cursor.advance();
        let err = Condition::read_complex(&mut cursor, None).unwrap_err();
        assert!(matches!(err, AddInError::InvalidConditionElement { ref element, .. } if element == "Condition"));
    }

    #[test]
    fn test_read_condition_list_rejects_unknown_element() {
        let doc = Element::new("And")
            .child(Element::new("Condition").attr("name", "X"))
            .child(Element::new("Button"));
        let mut cursor = doc.cursor();
        cursor.advance();
        let err = read_condition_list(&mut cursor, "And", None).unwrap_err();
        assert!(matches!(err, AddInError::InvalidConditionElement { ref parent, .. } if parent == "And"));
    }

    #[test]
    fn test_read_complex_builds_nested_tree() {
        let doc = Element::new("ComplexCondition").attr("action", "disable").child(
            Element::new("Or")
                .child(Element::new("Condition").attr("name", "A"))
                .child(Element::new("Not").child(Element::new("Condition").attr("name", "B"))),
        );
        let mut cursor = doc.cursor();
        cursor.advance();
        let condition = Condition::read_complex(&mut cursor, Some("core")).unwrap();
        assert_eq!(condition.action(), FailedAction::Disable);
        assert_eq!(condition.add_in(), Some("core"));
        match condition.kind() {
            ConditionKind::Or(list) => {
                assert_eq!(list.len(), 2);
                assert!(matches!(list[1].kind(), ConditionKind::Not(_)));
            }
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn test_leaf_without_name_is_rejected() {
        let doc = Element::new("Condition");
        let mut cursor = doc.cursor();
        cursor.advance();
        let err = Condition::read(&cursor, None).unwrap_err();
        assert!(matches!(err, AddInError::MissingAttribute { .. }));
    }
}
