use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use addin_core::{
    failed_action, AddInError, BuildItemsArgs, BuildOutput, BuildRequest, Codon, Condition,
    ConditionContext, ConditionEvaluator, Doozer, FailedAction, Item, Properties, Result, Sandbox,
    StaticModuleLoader,
};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Sleeps for the codon's `delay` (ms), records completion, returns the id.
struct Delayed {
    finished: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Doozer for Delayed {
    async fn build_item(&self, request: BuildRequest) -> Result<BuildOutput> {
        let codon = request.codon();
        let delay: u64 = codon.properties().parse_or("delay", 0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.finished.lock().unwrap().push(codon.id().to_string());
        Ok(BuildOutput::Single(Item::new(codon.id().to_string())))
    }
}

/// Returns `count` items named after the codon.
struct Splice;

#[async_trait]
impl Doozer for Splice {
    async fn build_item(&self, request: BuildRequest) -> Result<BuildOutput> {
        let codon = request.codon();
        let count: usize = codon.properties().parse_or("count", 1);
        Ok(BuildOutput::Multiple(
            (0..count).map(|i| Item::new(format!("{}.{i}", codon.id()))).collect(),
        ))
    }
}

/// Returns the id, tagged when the doozer was told to disable it.
struct Tagged;

#[async_trait]
impl Doozer for Tagged {
    async fn build_item(&self, request: BuildRequest) -> Result<BuildOutput> {
        let id = request.codon().id().to_string();
        let text = match request.failed_action() {
            FailedAction::Disable => format!("{id}:disabled"),
            _ => id,
        };
        Ok(BuildOutput::Single(Item::new(text)))
    }
}

/// Compares the build parameter's `role` with the condition's `role`.
struct Role {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ConditionEvaluator for Role {
    async fn validate(&self, ctx: &ConditionContext<'_>) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let wanted = ctx.properties.get("role").unwrap_or_default();
        Ok(ctx.parameter.get("role").and_then(Value::as_str) == Some(wanted))
    }
}

struct Broken;

#[async_trait]
impl ConditionEvaluator for Broken {
    async fn validate(&self, _ctx: &ConditionContext<'_>) -> Result<bool> {
        Err(anyhow::anyhow!("license server unreachable").into())
    }
}

struct Fixture {
    sandbox: Sandbox,
    finished: Arc<Mutex<Vec<String>>>,
    role_calls: Arc<AtomicUsize>,
}

fn fixture() -> Fixture {
    let finished = Arc::new(Mutex::new(Vec::new()));
    let role_calls = Arc::new(AtomicUsize::new(0));
    let sandbox = Sandbox::with_defaults(Arc::new(StaticModuleLoader::new()));
    sandbox.doozers().set(
        "Delayed",
        Arc::new(Delayed {
            finished: Arc::clone(&finished),
        }),
    );
    sandbox.doozers().set("Splice", Arc::new(Splice));
    sandbox.doozers().set("Tagged", Arc::new(Tagged));
    sandbox.evaluators().set(
        "Role",
        Arc::new(Role {
            calls: Arc::clone(&role_calls),
        }),
    );
    sandbox.evaluators().set("Broken", Arc::new(Broken));
    Fixture {
        sandbox,
        finished,
        role_calls,
    }
}

fn codon(name: &str, id: &str) -> Codon {
    Codon::new(name, Properties::new().with("id", id))
}

fn role(name: &str) -> Arc<Condition> {
    Arc::new(Condition::leaf("Role", Properties::new().with("role", name)))
}

fn strings(items: &[Item]) -> Vec<String> {
    items
        .iter()
        .map(|i| i.downcast_ref::<String>().cloned().expect("string item"))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_results_keep_order_when_builds_finish_out_of_order() {
    let fx = fixture();
    let node = fx.sandbox.node_or_create("/slow").unwrap();
    node.add_codons([
        Codon::new("Delayed", Properties::new().with("id", "a").with("delay", "30")),
        Codon::new("Delayed", Properties::new().with("id", "b").with("delay", "10")),
        Codon::new("Delayed", Properties::new().with("id", "c").with("delay", "0")),
    ]);

    let items = node.build_items(BuildItemsArgs::new(), &fx.sandbox).await.unwrap();
    assert_eq!(strings(&items), vec!["a", "b", "c"]);
    assert_eq!(*fx.finished.lock().unwrap(), vec!["c", "b", "a"]);
}

#[tokio::test]
async fn test_multiple_results_are_spliced_in_place() {
    let fx = fixture();
    let node = fx.sandbox.node_or_create("/splice").unwrap();
    node.add_codons([
        codon("Tagged", "head"),
        Codon::new("Splice", Properties::new().with("id", "mid").with("count", "3")),
        Codon::new("Splice", Properties::new().with("id", "none").with("count", "0")),
        codon("Tagged", "tail"),
    ]);
    let items = node.build_items(BuildItemsArgs::new(), &fx.sandbox).await.unwrap();
    assert_eq!(strings(&items), vec!["head", "mid.0", "mid.1", "mid.2", "tail"]);
}

#[tokio::test]
async fn test_parameter_reaches_evaluators() {
    let fx = fixture();
    let node = fx.sandbox.node_or_create("/admin").unwrap();
    node.add_codons([
        codon("Tagged", "dashboard").with_conditions(vec![role("admin")]),
        codon("Tagged", "help"),
    ]);

    let admin = node
        .build_items(BuildItemsArgs::new().parameter(json!({ "role": "admin" })), &fx.sandbox)
        .await
        .unwrap();
    assert_eq!(strings(&admin), vec!["dashboard", "help"]);

    let guest = node
        .build_items(BuildItemsArgs::new().parameter(json!({ "role": "guest" })), &fx.sandbox)
        .await
        .unwrap();
    assert_eq!(strings(&guest), vec!["help"]);
}

#[tokio::test]
async fn test_failing_evaluator_fails_the_build() {
    let fx = fixture();
    let node = fx.sandbox.node_or_create("/licensed").unwrap();
    node.add_codons([codon("Tagged", "pro").with_conditions(vec![Arc::new(Condition::leaf(
        "Broken",
        Properties::new(),
    ))])]);
    let err = node.build_items(BuildItemsArgs::new(), &fx.sandbox).await.unwrap_err();
    assert!(matches!(err, AddInError::EvaluatorFailed { ref name, .. } if name == "Broken"));
}

#[tokio::test]
async fn test_unknown_evaluator_is_fatal() {
    let fx = fixture();
    let node = fx.sandbox.node_or_create("/typo").unwrap();
    node.add_codons([codon("Tagged", "x").with_conditions(vec![Arc::new(Condition::leaf(
        "Rol",
        Properties::new(),
    ))])]);
    let err = node.build_items(BuildItemsArgs::new(), &fx.sandbox).await.unwrap_err();
    assert!(matches!(err, AddInError::EvaluatorNotFound { ref name } if name == "Rol"));
}

#[tokio::test]
async fn test_composite_identities() {
    let fx = fixture();
    let sb = &fx.sandbox;
    let admin = json!({ "role": "admin" });

    assert!(Condition::and(Vec::new()).validate(&Value::Null, sb).await.unwrap());
    assert!(!Condition::or(Vec::new()).validate(&Value::Null, sb).await.unwrap());

    let inner = role("admin");
    let double = Condition::not(Arc::new(Condition::not(Arc::clone(&inner))));
    for parameter in [admin.clone(), json!({ "role": "guest" })] {
        assert_eq!(
            double.validate(&parameter, sb).await.unwrap(),
            inner.validate(&parameter, sb).await.unwrap()
        );
    }
}

#[tokio::test]
async fn test_composites_short_circuit_in_declaration_order() {
    let fx = fixture();
    let sb = &fx.sandbox;
    let parameter = json!({ "role": "admin" });

    let or = Condition::or(vec![role("admin"), role("guest"), role("owner")]);
    assert!(or.validate(&parameter, sb).await.unwrap());
    assert_eq!(fx.role_calls.load(Ordering::SeqCst), 1);

    let and = Condition::and(vec![role("guest"), role("admin")]);
    assert!(!and.validate(&parameter, sb).await.unwrap());
    assert_eq!(fx.role_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_action_combinations() {
    let fx = fixture();
    let sb = &fx.sandbox;
    let guest = json!({ "role": "guest" });
    let failing = |action: FailedAction| {
        Arc::new(Condition::leaf("Role", Properties::new().with("role", "admin")).with_action(action))
    };

    assert_eq!(failed_action(&[], &guest, sb).await.unwrap(), FailedAction::Nothing);
    assert_eq!(
        failed_action(&[role("guest")], &guest, sb).await.unwrap(),
        FailedAction::Nothing
    );
    assert_eq!(
        failed_action(&[failing(FailedAction::Disable)], &guest, sb).await.unwrap(),
        FailedAction::Disable
    );
    assert_eq!(
        failed_action(&[failing(FailedAction::Disable), failing(FailedAction::Exclude)], &guest, sb)
            .await
            .unwrap(),
        FailedAction::Exclude
    );
    assert_eq!(
        failed_action(&[failing(FailedAction::Nothing)], &guest, sb).await.unwrap(),
        FailedAction::Exclude
    );
}

#[tokio::test]
async fn test_disabled_codon_is_still_built() {
    let fx = fixture();
    let node = fx.sandbox.node_or_create("/tools").unwrap();
    let guard = Arc::new(
        Condition::leaf("Role", Properties::new().with("role", "admin")).with_action(FailedAction::Disable),
    );
    node.add_codons([codon("Tagged", "purge").with_conditions(vec![guard]), codon("Tagged", "list")]);
    let items = node
        .build_items(BuildItemsArgs::new().parameter(json!({ "role": "guest" })), &fx.sandbox)
        .await
        .unwrap();
    assert_eq!(strings(&items), vec!["purge:disabled", "list"]);
}
