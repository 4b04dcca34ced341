mod common;

use api_governance::{
    error::AppError,
    models::access::{AccessLevel, GrantAccessRequest},
    services::{access_service, api_service},
};
use chrono::Utc;
use uuid::Uuid;

#[tokio::test]
async fn unknown_access_level_is_rejected() {
    let pool = common::store().await;
    let api = common::api(&pool, None).await;

    let err = access_service::grant_access(
        &pool,
        GrantAccessRequest {
            api_id: api.id,
            consumer_id: "consumer-1".into(),
            access_level: "superuser".into(),
            granted_by: common::HOST.into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::InvalidRequest(_)));

    for level in ["read", "write", "admin"] {
        let grant = common::grant(&pool, api.id, &format!("c-{level}"), level).await;
        assert_eq!(grant.access_level.as_str(), level);
    }
}

#[tokio::test]
async fn schema_rejects_unknown_level_written_directly() {
    let pool = common::store().await;
    let api = common::api(&pool, None).await;

    let result = sqlx::query(
        r#"
        INSERT INTO api_user_access (id, api_id, consumer_id, access_level, granted_by, granted_at, is_active)
        VALUES ($1, $2, 'rogue', 'superuser', 'host-1', $3, 1)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(api.id)
    .bind(Utc::now())
    .execute(&pool)
    .await;

    let err = result.map_err(|e| AppError::from_constraint(e, "access grant")).unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn regranting_updates_in_place() {
    let pool = common::store().await;
    let api = common::api(&pool, None).await;

    let first = common::grant(&pool, api.id, "consumer-1", "read").await;
    let second = common::grant(&pool, api.id, "consumer-1", "write").await;

    assert_eq!(first.id, second.id);
    assert_eq!(second.access_level, AccessLevel::Write);
    assert_eq!(second.granted_at, first.granted_at);

    let grants = access_service::list_access(&pool, api.id, false).await.expect("list");
    assert_eq!(grants.len(), 1);
}

#[tokio::test]
async fn revoke_then_restore_round_trips() {
    let pool = common::store().await;
    let api = common::api(&pool, None).await;
    let before = common::grant(&pool, api.id, "consumer-1", "write").await;

    let revoked = access_service::revoke_access(&pool, api.id, "consumer-1")
        .await
        .expect("revoke");
    assert!(!revoked.is_active);
    assert!(revoked.revoked_at.is_some());
    assert!(
        !access_service::check_access(&pool, api.id, "consumer-1", AccessLevel::Read)
            .await
            .expect("check")
    );

    let active = access_service::list_access(&pool, api.id, true).await.expect("list");
    assert!(active.is_empty());

    let restored = access_service::restore_access(&pool, api.id, "consumer-1")
        .await
        .expect("restore");
    assert_eq!(restored.id, before.id);
    assert_eq!(restored.access_level, before.access_level);
    assert_eq!(restored.granted_by, before.granted_by);
    assert!(restored.is_active);
    assert_eq!(restored.revoked_at, None);
    assert!(restored.granted_at >= before.granted_at);
}

#[tokio::test]
async fn access_check_respects_level_order() {
    let pool = common::store().await;
    let api = common::api(&pool, None).await;
    common::grant(&pool, api.id, "writer", "write").await;

    let check = |level| access_service::check_access(&pool, api.id, "writer", level);
    assert!(check(AccessLevel::Read).await.expect("check"));
    assert!(check(AccessLevel::Write).await.expect("check"));
    assert!(!check(AccessLevel::Admin).await.expect("check"));
    assert!(
        !access_service::check_access(&pool, api.id, "stranger", AccessLevel::Read)
            .await
            .expect("check")
    );
}

#[tokio::test]
async fn consumer_sees_grants_across_apis() {
    let pool = common::store().await;
    let a = common::api(&pool, None).await;
    let b = common::api(&pool, None).await;
    common::grant(&pool, a.id, "consumer-1", "read").await;
    common::grant(&pool, b.id, "consumer-1", "admin").await;
    access_service::revoke_access(&pool, b.id, "consumer-1")
        .await
        .expect("revoke");

    let all = access_service::list_consumer_access(&pool, "consumer-1", false)
        .await
        .expect("list");
    assert_eq!(all.len(), 2);
    let active = access_service::list_consumer_access(&pool, "consumer-1", true)
        .await
        .expect("list");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].api_id, a.id);
}

#[tokio::test]
async fn deleting_an_api_drops_its_grants() {
    let pool = common::store().await;
    let api = common::api(&pool, None).await;
    common::grant(&pool, api.id, "consumer-1", "read").await;

    api_service::delete_api(&pool, api.id).await.expect("delete");

    let err = access_service::get_access(&pool, api.id, "consumer-1").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert!(matches!(
        access_service::revoke_access(&pool, api.id, "consumer-1").await,
        Err(AppError::NotFound(_))
    ));
}
