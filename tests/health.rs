mod common;

use api_governance::{handlers::health::health_check, services::transition_service};
use axum::extract::State;
use chrono::{Duration, Utc};
use uuid::Uuid;

#[tokio::test]
async fn health_reports_scheduler_backlog() {
    let pool = common::store().await;
    let basic = common::policy(&pool, "basic").await;
    let premium = common::policy(&pool, "premium").await;
    let api = common::api(&pool, Some(basic.id)).await;

    let body = health_check(State(pool.clone())).await.expect("health").0;
    assert_eq!(body.status, "healthy");
    assert_eq!(body.database, "connected");
    assert_eq!(body.pending_policy_changes, 0);

    // A due change the scheduler has not picked up yet
    let due = Utc::now() - Duration::minutes(5);
    sqlx::query(
        r#"
        INSERT INTO policy_changes (id, api_id, old_policy_id, new_policy_id, changed_by, effective_date, changed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(api.id)
    .bind(basic.id)
    .bind(premium.id)
    .bind(common::HOST)
    .bind(due)
    .execute(&pool)
    .await
    .expect("insert change");

    let body = health_check(State(pool.clone())).await.expect("health").0;
    assert_eq!(body.pending_policy_changes, 1);

    transition_service::process_due_changes(&pool).await.expect("tick");
    let body = health_check(State(pool)).await.expect("health").0;
    assert_eq!(body.pending_policy_changes, 0);
}
