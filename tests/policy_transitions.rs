mod common;

use api_governance::{
    error::AppError,
    models::{
        notification::NotificationType,
        policy::{CreatePolicyRequest, PolicyType},
        policy_change::PolicyChangeRequest,
    },
    services::{api_service, notification_service, policy_service, transition_service},
};
use chrono::{Duration, Utc};

#[tokio::test]
async fn due_change_applies_exactly_once() {
    let pool = common::store().await;
    let basic = common::policy(&pool, "basic").await;
    let premium = common::policy(&pool, "premium").await;
    let api = common::api(&pool, Some(basic.id)).await;
    common::grant(&pool, api.id, "consumer-1", "read").await;

    let effective = Utc::now() + Duration::hours(1);
    let recorded = transition_service::request_policy_change(
        &pool,
        PolicyChangeRequest::new(api.id, Some(premium.id), common::HOST)
            .effective_at(effective)
            .reason("upgrade"),
    )
    .await
    .expect("request");
    assert!(!recorded.applied);
    assert_eq!(recorded.change.old_policy_id, Some(basic.id));

    let later = effective + Duration::minutes(5);
    assert!(
        transition_service::get_pending_changes_at(&pool, Utc::now())
            .await
            .expect("pending")
            .is_empty()
    );
    let pending = transition_service::get_pending_changes_at(&pool, later)
        .await
        .expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, recorded.change.id);

    assert!(
        !transition_service::apply_pending_change(&pool, &pending[0])
            .await
            .expect("not due yet")
    );
    assert!(
        transition_service::apply_pending_change_at(&pool, &pending[0], later)
            .await
            .expect("apply")
    );
    assert!(
        transition_service::get_pending_changes_at(&pool, later)
            .await
            .expect("pending")
            .is_empty()
    );
    assert!(
        !transition_service::apply_pending_change_at(&pool, &pending[0], later)
            .await
            .expect("second apply")
    );

    let api = api_service::get_api(&pool, api.id).await.expect("api");
    assert_eq!(api.policy_id, Some(premium.id));

    let history = transition_service::get_change_history(&pool, api.id).await.expect("history");
    assert_eq!(history, vec![recorded.change]);

    let notified = notification_service::get_user_notifications(&pool, "consumer-1", false, 10, 0)
        .await
        .expect("notifications");
    assert_eq!(notified.len(), 1);
    assert_eq!(notified[0].notification_type, NotificationType::PolicyChanged);
}

#[tokio::test]
async fn immediate_change_updates_api_in_same_call() {
    let pool = common::store().await;
    let premium = common::policy(&pool, "premium").await;
    let api = common::api(&pool, None).await;

    let recorded = transition_service::request_policy_change(
        &pool,
        PolicyChangeRequest::new(api.id, Some(premium.id), common::HOST),
    )
    .await
    .expect("request");
    assert!(recorded.applied);
    assert_eq!(recorded.change.old_policy_id, None);

    let api = api_service::get_api(&pool, api.id).await.expect("api");
    assert_eq!(api.policy_id, Some(premium.id));
    assert!(
        transition_service::get_pending_changes(&pool)
            .await
            .expect("pending")
            .is_empty()
    );
}

#[tokio::test]
async fn removing_a_policy_is_immediate_only() {
    let pool = common::store().await;
    let basic = common::policy(&pool, "basic").await;
    let api = common::api(&pool, Some(basic.id)).await;

    let err = transition_service::request_policy_change(
        &pool,
        PolicyChangeRequest::new(api.id, None, common::HOST)
            .effective_at(Utc::now() + Duration::days(1)),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::InvalidRequest(_)));

    let recorded = transition_service::request_policy_change(
        &pool,
        PolicyChangeRequest::new(api.id, None, common::HOST),
    )
    .await
    .expect("remove");
    assert!(recorded.applied);
    assert_eq!(api_service::get_api(&pool, api.id).await.expect("api").policy_id, None);

    let err = transition_service::apply_pending_change(&pool, &recorded.change)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidRequest(_)));
}

#[tokio::test]
async fn only_owner_or_admin_may_request() {
    let pool = common::store().await;
    let premium = common::policy(&pool, "premium").await;
    let api = common::api(&pool, None).await;
    common::grant(&pool, api.id, "writer", "write").await;
    common::grant(&pool, api.id, "operator", "admin").await;

    for requester in ["stranger", "writer"] {
        let err = transition_service::request_policy_change(
            &pool,
            PolicyChangeRequest::new(api.id, Some(premium.id), requester),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    transition_service::request_policy_change(
        &pool,
        PolicyChangeRequest::new(api.id, Some(premium.id), "operator"),
    )
    .await
    .expect("admin may change");
}

#[tokio::test]
async fn target_policy_must_exist_and_be_active() {
    let pool = common::store().await;
    let api = common::api(&pool, None).await;
    let mut retired = CreatePolicyRequest::new("retired", PolicyType::Free, common::HOST);
    retired.is_active = false;
    let retired = policy_service::create_policy(&pool, retired).await.expect("create");

    let err = transition_service::request_policy_change(
        &pool,
        PolicyChangeRequest::new(api.id, Some(retired.id), common::HOST),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::InvalidRequest(_)));

    let err = transition_service::request_policy_change(
        &pool,
        PolicyChangeRequest::new(api.id, Some(uuid::Uuid::new_v4()), common::HOST),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound("Policy")));

    assert!(
        transition_service::get_change_history(&pool, api.id)
            .await
            .expect("history")
            .is_empty()
    );
}

#[tokio::test]
async fn latest_due_change_wins() {
    let pool = common::store().await;
    let basic = common::policy(&pool, "basic").await;
    let silver = common::policy(&pool, "silver").await;
    let gold = common::policy(&pool, "gold").await;
    let api = common::api(&pool, Some(basic.id)).await;
    let now = Utc::now();

    for (policy_id, hours) in [(silver.id, 1), (gold.id, 2)] {
        transition_service::request_policy_change(
            &pool,
            PolicyChangeRequest::new(api.id, Some(policy_id), common::HOST)
                .effective_at(now + Duration::hours(hours)),
        )
        .await
        .expect("schedule");
    }

    let tick = now + Duration::hours(3);
    let report = transition_service::process_due_changes_at(&pool, tick)
        .await
        .expect("tick");
    assert_eq!(report.pending, 1);
    assert_eq!(report.applied, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(
        api_service::get_api(&pool, api.id).await.expect("api").policy_id,
        Some(gold.id)
    );

    let report = transition_service::process_due_changes_at(&pool, tick)
        .await
        .expect("tick");
    assert_eq!(report.pending, 0);
}

#[tokio::test]
async fn stale_or_early_change_is_not_applied() {
    let pool = common::store().await;
    let basic = common::policy(&pool, "basic").await;
    let silver = common::policy(&pool, "silver").await;
    let gold = common::policy(&pool, "gold").await;
    let api = common::api(&pool, Some(basic.id)).await;
    common::grant(&pool, api.id, "consumer-1", "read").await;
    let now = Utc::now();

    for (policy_id, minutes) in [(silver.id, 1), (gold.id, 2)] {
        transition_service::request_policy_change(
            &pool,
            PolicyChangeRequest::new(api.id, Some(policy_id), common::HOST)
                .effective_at(now + Duration::minutes(minutes)),
        )
        .await
        .expect("schedule");
    }

    // Read while silver is the latest due change, applied after gold became due.
    let stale = transition_service::get_pending_changes_at(&pool, now + Duration::seconds(90))
        .await
        .expect("pending");
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].new_policy_id, Some(silver.id));

    let later = now + Duration::minutes(3);
    assert!(
        !transition_service::apply_pending_change_at(&pool, &stale[0], later)
            .await
            .expect("stale apply")
    );
    assert_eq!(
        api_service::get_api(&pool, api.id).await.expect("api").policy_id,
        Some(basic.id)
    );

    let report = transition_service::process_due_changes_at(&pool, later)
        .await
        .expect("tick");
    assert_eq!(report.applied, 1);
    let report = transition_service::process_due_changes_at(&pool, later)
        .await
        .expect("tick");
    assert_eq!(report.pending, 0);
    assert_eq!(
        api_service::get_api(&pool, api.id).await.expect("api").policy_id,
        Some(gold.id)
    );

    let future = transition_service::request_policy_change(
        &pool,
        PolicyChangeRequest::new(api.id, Some(silver.id), common::HOST)
            .effective_at(now + Duration::days(30)),
    )
    .await
    .expect("schedule")
    .change;
    assert!(
        !transition_service::apply_pending_change(&pool, &future)
            .await
            .expect("early apply")
    );
    assert_eq!(
        api_service::get_api(&pool, api.id).await.expect("api").policy_id,
        Some(gold.id)
    );

    let notified = notification_service::get_user_notifications(&pool, "consumer-1", false, 10, 0)
        .await
        .expect("notifications");
    assert_eq!(notified.len(), 1);
}
