//! Shared fixtures: one isolated in-memory store per test.

#![allow(dead_code)]

use api_governance::{
    db::{self, DbPool},
    models::{
        access::{ApiUserAccess, GrantAccessRequest},
        api::{Api, CreateApiRequest},
        period::Period,
        policy::{CreatePolicyRequest, CreateRuleRequest, Policy, PolicyType, RuleAction, RuleType},
    },
    services::{access_service, api_service, policy_service},
};
use uuid::Uuid;

pub const HOST: &str = "host-1";

pub async fn store() -> DbPool {
    db::connect_in_memory().await.expect("in-memory store")
}

pub async fn policy(pool: &DbPool, name: &str) -> Policy {
    policy_service::create_policy(pool, CreatePolicyRequest::new(name, PolicyType::Token, HOST))
        .await
        .expect("create policy")
}

pub async fn token_rule(
    pool: &DbPool,
    policy_id: Uuid,
    limit: f64,
    period: Period,
    action: RuleAction,
    priority: i64,
) {
    policy_service::create_rule(
        pool,
        policy_id,
        CreateRuleRequest::new(RuleType::Token, limit, period, action, priority),
    )
    .await
    .expect("create rule");
}

pub async fn api(pool: &DbPool, policy_id: Option<Uuid>) -> Api {
    let mut request = CreateApiRequest::new("search", HOST);
    request.policy_id = policy_id;
    api_service::create_api(pool, request).await.expect("create api")
}

pub async fn grant(pool: &DbPool, api_id: Uuid, consumer: &str, level: &str) -> ApiUserAccess {
    access_service::grant_access(
        pool,
        GrantAccessRequest {
            api_id,
            consumer_id: consumer.to_string(),
            access_level: level.to_string(),
            granted_by: HOST.to_string(),
        },
    )
    .await
    .expect("grant access")
}
