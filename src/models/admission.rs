//! Admission decisions for metered calls.

use serde::Serialize;
use uuid::Uuid;

use crate::models::{policy::RuleAction, usage::ApiUsage};

/// Outcome of evaluating a policy for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allowed,
    Throttled { rule_id: Uuid },
    Blocked { rule_id: Uuid },
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// A rule whose limit was reached during evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggeredRule {
    pub rule_id: Uuid,
    pub action: RuleAction,
    pub usage: f64,
    pub limit: f64,
}

/// Decision plus every rule that matched on the way to it, in evaluation order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub decision: Decision,
    pub triggered: Vec<TriggeredRule>,
}

impl Evaluation {
    pub fn allowed() -> Self {
        Self {
            decision: Decision::Allowed,
            triggered: Vec::new(),
        }
    }
}

/// A metered call: the admission decision and the ledger row written for it.
#[derive(Debug, Clone, Serialize)]
pub struct MeteredCall {
    pub evaluation: Evaluation,
    pub usage: ApiUsage,
}
