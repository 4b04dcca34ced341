//! Call admission - decides whether a consumer's call to an API goes through.
//!
//! # Rule evaluation
//!
//! Rules are walked in ascending priority (ties broken by id). A rule matches once the
//! consumer's admitted usage in the rule's current window has reached its limit:
//!
//! - `block` / `throttle`: evaluation stops and the rule decides the call
//! - `notify` / `log`: the match is recorded and evaluation continues
//!
//! A call with no terminal match is allowed. An API without a policy, or bound to an inactive
//! one, admits every call from a consumer with an active grant.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        access::AccessLevel,
        admission::{Decision, Evaluation, MeteredCall, TriggeredRule},
        policy::{PolicyRule, RuleAction},
        usage::NewUsage,
    },
    services::{
        access_service::has_access, api_service::fetch_api, policy_service, usage_service,
    },
};

/// Evaluate rules against usage figures supplied by `usage_of`.
///
/// Pure: `usage_of` returns the measured usage for a rule.
pub fn evaluate_rules<F>(rules: &[PolicyRule], mut usage_of: F) -> Evaluation
where
    F: FnMut(&PolicyRule) -> f64,
{
    let mut ordered: Vec<&PolicyRule> = rules.iter().collect();
    ordered.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));

    let mut evaluation = Evaluation::allowed();
    for rule in ordered {
        let usage = usage_of(rule);
        if usage < rule.limit_value {
            continue;
        }

        evaluation.triggered.push(TriggeredRule {
            rule_id: rule.id,
            action: rule.action,
            usage,
            limit: rule.limit_value,
        });

        match rule.action {
            RuleAction::Block => {
                evaluation.decision = Decision::Blocked { rule_id: rule.id };
                break;
            }
            RuleAction::Throttle => {
                evaluation.decision = Decision::Throttled { rule_id: rule.id };
                break;
            }
            RuleAction::Notify | RuleAction::Log => {}
        }
    }
    evaluation
}

/// Decide a call without recording it.
///
/// # Errors
///
/// - `NotFound`: unknown API
/// - `PermissionDenied`: the API is inactive or the consumer has no active grant
pub async fn admit_call(
    pool: &DbPool,
    api_id: Uuid,
    consumer_id: &str,
    now: DateTime<Utc>,
) -> Result<Evaluation, AppError> {
    let mut conn = pool.acquire().await?;
    admit(&mut conn, api_id, consumer_id, now).await
}

/// Admit a call and append it to the ledger in one transaction.
///
/// Throttled and blocked calls are still recorded, flagged accordingly. A blocked call is
/// recorded with zero tokens, credits and execution time.
#[tracing::instrument(skip(pool, event), fields(api_id = %event.api_id, consumer = %event.consumer_id))]
pub async fn meter_call(pool: &DbPool, mut event: NewUsage) -> Result<MeteredCall, AppError> {
    let now = *event.timestamp.get_or_insert_with(Utc::now);

    let mut tx = pool.begin().await?;
    let evaluation = admit(&mut tx, event.api_id, &event.consumer_id, now).await?;

    event.was_throttled = matches!(evaluation.decision, Decision::Throttled { .. });
    event.was_blocked = matches!(evaluation.decision, Decision::Blocked { .. });
    if event.was_blocked {
        // Refused calls are audited but consume nothing.
        event.tokens_used = 0;
        event.credits_used = 0.0;
        event.execution_time_ms = 0;
    }

    let usage = usage_service::record_usage(&mut *tx, event).await?;
    tx.commit().await?;

    match evaluation.decision {
        Decision::Allowed => {}
        Decision::Throttled { rule_id } => tracing::info!(%rule_id, "call throttled"),
        Decision::Blocked { rule_id } => tracing::warn!(%rule_id, "call blocked"),
    }
    Ok(MeteredCall { evaluation, usage })
}

async fn admit(
    conn: &mut SqliteConnection,
    api_id: Uuid,
    consumer_id: &str,
    now: DateTime<Utc>,
) -> Result<Evaluation, AppError> {
    let api = fetch_api(conn, api_id)
        .await?
        .ok_or(AppError::NotFound("API"))?;
    if !api.is_active {
        return Err(AppError::PermissionDenied("API is inactive".to_string()));
    }
    if !has_access(conn, api_id, consumer_id, AccessLevel::Read).await? {
        return Err(AppError::PermissionDenied(format!(
            "{consumer_id} has no active access to this API"
        )));
    }

    let Some(policy_id) = api.policy_id else {
        return Ok(Evaluation::allowed());
    };
    match policy_service::fetch_policy(conn, policy_id).await? {
        Some(policy) if policy.is_active => {}
        _ => return Ok(Evaluation::allowed()),
    }

    let rules = policy_service::rules_for_policy(conn, policy_id).await?;
    let mut usage = Vec::with_capacity(rules.len());
    for rule in &rules {
        let window = rule.period.window(now);
        let totals =
            usage_service::totals_between(conn, api_id, consumer_id, window.start, window.end, true)
                .await?;
        usage.push((rule.id, totals.measure(rule.rule_type)));
    }

    Ok(evaluate_rules(&rules, |rule| {
        usage
            .iter()
            .find(|(id, _)| *id == rule.id)
            .map_or(0.0, |(_, measured)| *measured)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        period::Period,
        policy::RuleType,
    };

    fn rule(priority: i64, action: RuleAction, limit: f64) -> PolicyRule {
        PolicyRule {
            id: Uuid::new_v4(),
            policy_id: Uuid::nil(),
            rule_type: RuleType::Token,
            limit_value: limit,
            period: Period::Day,
            action,
            priority,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn lower_priority_number_decides() {
        let throttle = rule(50, RuleAction::Throttle, 100.0);
        let block = rule(100, RuleAction::Block, 100.0);
        // Listed out of order on purpose
        let rules = vec![block.clone(), throttle.clone()];

        let evaluation = evaluate_rules(&rules, |_| 500.0);
        assert_eq!(
            evaluation.decision,
            Decision::Throttled {
                rule_id: throttle.id
            }
        );
        assert_eq!(evaluation.triggered.len(), 1);
    }

    #[test]
    fn notify_rules_do_not_stop_evaluation() {
        let notify = rule(10, RuleAction::Notify, 10.0);
        let block = rule(20, RuleAction::Block, 10.0);

        let evaluation = evaluate_rules(&[notify.clone(), block.clone()], |_| 10.0);
        assert_eq!(evaluation.decision, Decision::Blocked { rule_id: block.id });
        let actions: Vec<_> = evaluation.triggered.iter().map(|t| t.action).collect();
        assert_eq!(actions, vec![RuleAction::Notify, RuleAction::Block]);
    }

    #[test]
    fn usage_below_limit_is_allowed() {
        let block = rule(1, RuleAction::Block, 1000.0);
        let evaluation = evaluate_rules(&[block], |_| 999.0);
        assert!(evaluation.decision.is_allowed());
        assert!(evaluation.triggered.is_empty());
    }

    #[test]
    fn equal_priorities_break_ties_by_id() {
        let mut a = rule(5, RuleAction::Throttle, 1.0);
        let mut b = rule(5, RuleAction::Block, 1.0);
        a.id = Uuid::from_u128(1);
        b.id = Uuid::from_u128(2);

        let evaluation = evaluate_rules(&[b, a], |_| 1.0);
        assert_eq!(
            evaluation.decision,
            Decision::Throttled {
                rule_id: Uuid::from_u128(1)
            }
        );
    }
}
