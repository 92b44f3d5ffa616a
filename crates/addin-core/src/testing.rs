//! Small doozers and evaluators shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::build::BuildRequest;
use crate::condition::FailedAction;
use crate::doozer::{BuildOutput, ConditionContext, ConditionEvaluator, Doozer, Item};
use crate::Result;

/// Evaluator with a fixed answer.
pub struct Constant(pub bool);

#[async_trait]
impl ConditionEvaluator for Constant {
    async fn validate(&self, _ctx: &ConditionContext<'_>) -> Result<bool> {
        Ok(self.0)
    }
}

/// Fixed answer plus a call counter.
pub struct Counting {
    answer: bool,
    calls: AtomicUsize,
}

impl Counting {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConditionEvaluator for Counting {
    async fn validate(&self, _ctx: &ConditionContext<'_>) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer)
    }
}

pub struct Failing;

#[async_trait]
impl ConditionEvaluator for Failing {
    async fn validate(&self, _ctx: &ConditionContext<'_>) -> Result<bool> {
        Err(anyhow::anyhow!("backing store unavailable").into())
    }
}

/// Builds the codon id as a `String`, suffixed when disabled.
pub struct Echo;

#[async_trait]
impl Doozer for Echo {
    async fn build_item(&self, request: BuildRequest) -> Result<BuildOutput> {
        let id = request.codon().id();
        let text = match request.failed_action() {
            FailedAction::Disable => format!("{id} (disabled)"),
            _ => id.to_string(),
        };
        Ok(BuildOutput::Single(Item::new(text)))
    }
}

/// Builds `n` strings `<id>-<i>` as one multi-item result.
pub struct Many(pub usize);

#[async_trait]
impl Doozer for Many {
    async fn build_item(&self, request: BuildRequest) -> Result<BuildOutput> {
        let id = request.codon().id();
        Ok(BuildOutput::Multiple(
            (0..self.0).map(|i| Item::new(format!("{id}-{i}"))).collect(),
        ))
    }
}
