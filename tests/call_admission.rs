mod common;

use api_governance::{
    error::AppError,
    models::{
        admission::Decision,
        period::Period,
        policy::{RuleAction, UpdatePolicyRequest},
        usage::NewUsage,
    },
    services::{access_service, admission_service, policy_service, usage_service},
};
use chrono::Utc;

#[tokio::test]
async fn consumer_over_limit_is_blocked_and_recorded() {
    let pool = common::store().await;
    let policy = common::policy(&pool, "capped").await;
    common::token_rule(&pool, policy.id, 100.0, Period::Day, RuleAction::Block, 10).await;
    let api = common::api(&pool, Some(policy.id)).await;
    common::grant(&pool, api.id, "consumer-1", "read").await;
    let now = Utc::now();

    let first = admission_service::meter_call(&pool, NewUsage::new(api.id, "consumer-1").tokens(100).at(now))
        .await
        .expect("meter");
    assert_eq!(first.evaluation.decision, Decision::Allowed);
    assert!(!first.usage.was_blocked);

    let second = admission_service::meter_call(&pool, NewUsage::new(api.id, "consumer-1").tokens(5).at(now))
        .await
        .expect("meter");
    assert!(matches!(second.evaluation.decision, Decision::Blocked { .. }));
    assert!(second.usage.was_blocked);
    assert_eq!(second.usage.tokens_used, 0);

    // Blocked calls do not count toward the limit, so the decision is stable
    let third = admission_service::admit_call(&pool, api.id, "consumer-1", now)
        .await
        .expect("admit");
    assert!(matches!(third.decision, Decision::Blocked { .. }));
    assert_eq!(third.triggered[0].usage, 100.0);

    let recent = usage_service::get_recent_usage(&pool, api.id, "consumer-1", 10)
        .await
        .expect("recent");
    assert_eq!(recent.len(), 2);
}

#[tokio::test]
async fn higher_priority_throttle_beats_block() {
    let pool = common::store().await;
    let policy = common::policy(&pool, "layered").await;
    common::token_rule(&pool, policy.id, 10.0, Period::Day, RuleAction::Block, 100).await;
    common::token_rule(&pool, policy.id, 10.0, Period::Hour, RuleAction::Throttle, 50).await;
    let api = common::api(&pool, Some(policy.id)).await;
    common::grant(&pool, api.id, "consumer-1", "write").await;
    let now = Utc::now();

    usage_service::record_usage(&pool, NewUsage::new(api.id, "consumer-1").tokens(20).at(now))
        .await
        .expect("record");

    let metered = admission_service::meter_call(&pool, NewUsage::new(api.id, "consumer-1").at(now))
        .await
        .expect("meter");
    assert!(matches!(metered.evaluation.decision, Decision::Throttled { .. }));
    assert!(metered.usage.was_throttled);
    assert!(!metered.usage.was_blocked);
}

#[tokio::test]
async fn inactive_policy_admits_everything() {
    let pool = common::store().await;
    let policy = common::policy(&pool, "paused").await;
    common::token_rule(&pool, policy.id, 1.0, Period::Day, RuleAction::Block, 1).await;
    let api = common::api(&pool, Some(policy.id)).await;
    common::grant(&pool, api.id, "consumer-1", "read").await;
    let now = Utc::now();
    usage_service::record_usage(&pool, NewUsage::new(api.id, "consumer-1").tokens(50).at(now))
        .await
        .expect("record");

    policy_service::update_policy(
        &pool,
        policy.id,
        UpdatePolicyRequest {
            is_active: Some(false),
            ..Default::default()
        },
    )
    .await
    .expect("deactivate");

    let evaluation = admission_service::admit_call(&pool, api.id, "consumer-1", now)
        .await
        .expect("admit");
    assert!(evaluation.decision.is_allowed());
}

#[tokio::test]
async fn calls_without_access_are_refused_unrecorded() {
    let pool = common::store().await;
    let api = common::api(&pool, None).await;
    common::grant(&pool, api.id, "consumer-1", "read").await;
    access_service::revoke_access(&pool, api.id, "consumer-1")
        .await
        .expect("revoke");

    for consumer in ["consumer-1", "stranger"] {
        let err = admission_service::meter_call(&pool, NewUsage::new(api.id, consumer).tokens(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    let recent = usage_service::get_recent_usage(&pool, api.id, "consumer-1", 10)
        .await
        .expect("recent");
    assert!(recent.is_empty());
}
